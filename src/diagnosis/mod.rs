//! Diagnosis: root cause, blast radius and recovery planning.

pub mod correlation;
pub mod dependency;
pub mod engine;
pub mod knowledge;

pub use correlation::{Correlation, CorrelationEngine, CorrelationKind, CorrelationRule, EventPattern, FaultEvent};
pub use dependency::DependencyGraph;
pub use engine::{
    assess_risk, should_auto_recover, DependencyImpactAssessor, Diagnosis, DiagnosisContext,
    DiagnosisEngine, DiagnosisEngineConfig, EvidenceWeightedAnalyzer, ImpactAssessor,
    RootCauseAnalyzer, StrategyMapping,
};
pub use knowledge::{FaultCase, KnowledgeBase, SolutionStats, PRIOR_SUCCESS_RATE};
