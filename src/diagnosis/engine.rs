//! Diagnosis engine: root cause, impact and recovery plan for a fault.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::correlation::{Correlation, CorrelationEngine, CorrelationKind, FaultEvent};
use super::dependency::DependencyGraph;
use super::knowledge::{FaultCase, KnowledgeBase};
use crate::clock::Clock;
use crate::error::HealingError;
use crate::fault::{
    DetectionMethod, Evidence, Fault, ImpactAssessment, ImpactScope, RecoveryPlan, RiskAssessment,
    RiskFactor, RootCause,
};
use crate::recovery::strategy::{RecoveryStrategy, StrategyCatalog};
use crate::types::{RiskLevel, Severity};

/// Outcomes needed before the knowledge base may override the strategy table.
const MIN_SAMPLES_FOR_SWAP: u32 = 3;

/// Maps a component (and optionally a fault type) to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMapping {
    pub component: String,
    #[serde(default)]
    pub fault_type: Option<String>,
    pub strategy: String,
    #[serde(default)]
    pub alternates: Vec<String>,
}

/// Everything a root-cause analyzer may consult.
pub struct DiagnosisContext<'a> {
    pub fault: &'a Fault,
    pub correlations: &'a [Correlation],
    /// Other active faults on components this one depends on
    pub upstream_faults: Vec<&'a Fault>,
    pub historical_cases: &'a [FaultCase],
}

/// Pluggable root-cause scoring.
pub trait RootCauseAnalyzer: Send + Sync {
    fn analyze(&self, ctx: &DiagnosisContext<'_>) -> RootCause;
}

/// Pluggable blast-radius scoring.
pub trait ImpactAssessor: Send + Sync {
    fn assess(
        &self,
        fault: &Fault,
        dependents: &[String],
        historical_recovery_time: Option<Duration>,
    ) -> ImpactAssessment;
}

/// Weighs detection evidence, upstream faults, correlations and history.
#[derive(Debug, Default)]
pub struct EvidenceWeightedAnalyzer;

impl EvidenceWeightedAnalyzer {
    fn cause_type(fault_type: &str) -> &'static str {
        match fault_type {
            "high_response_time" => "performance_degradation",
            "high_error_rate" => "application_error",
            "database_connection_failure" => "connectivity_failure",
            "exchange_api_timeout" => "external_dependency_timeout",
            t if t.starts_with("anomaly_") => "anomalous_behavior",
            _ => "unknown",
        }
    }
}

impl RootCauseAnalyzer for EvidenceWeightedAnalyzer {
    fn analyze(&self, ctx: &DiagnosisContext<'_>) -> RootCause {
        let fault = ctx.fault;
        let mut evidence = Vec::new();

        let (mut confidence, detection_weight) = match fault.detection.method {
            DetectionMethod::Rule => (0.6, 0.5),
            DetectionMethod::Anomaly => (0.4, 0.3),
        };
        evidence.push(Evidence::new(
            format!("detection:{}", fault.detection.method),
            format!(
                "{} = {} against threshold {}",
                fault.detection.metric, fault.detection.value, fault.detection.threshold
            ),
            detection_weight,
        ));

        let mut cause_type = Self::cause_type(&fault.fault_type).to_string();
        let mut component = fault.component.clone();
        let mut reason = fault.description.clone();

        if let Some(upstream) = ctx.upstream_faults.first() {
            cause_type = "upstream_dependency_failure".to_string();
            component = upstream.component.clone();
            reason = format!(
                "{} depends on {}, which has active fault {} ({})",
                fault.component, upstream.component, upstream.id, upstream.fault_type
            );
            confidence += 0.2;
            evidence.push(Evidence::new(
                "dependency_graph",
                format!("upstream {} is faulted", upstream.component),
                0.3,
            ));
        }

        if let Some(causal) = ctx
            .correlations
            .iter()
            .find(|c| c.kind == CorrelationKind::Causal)
        {
            if causal.strength > confidence || component == fault.component {
                component = causal.related.component.clone();
                cause_type = "correlated_cascade".to_string();
                reason = causal.description.clone();
            }
            confidence = confidence.max(causal.strength);
            evidence.push(Evidence::new(
                "correlation",
                causal.description.clone(),
                causal.strength,
            ));
        }

        if !ctx.historical_cases.is_empty() {
            let seen = ctx.historical_cases.len().min(3);
            confidence += 0.1 * seen as f64;
            evidence.push(Evidence::new(
                "knowledge_base",
                format!(
                    "{} prior successful recoveries of {} on {}",
                    ctx.historical_cases.len(),
                    fault.fault_type,
                    fault.component
                ),
                0.2,
            ));
        }

        RootCause {
            cause_type,
            component,
            reason,
            confidence: confidence.clamp(0.0, 1.0),
            evidence,
            related_faults: ctx
                .correlations
                .iter()
                .map(|c| c.related.fault_id.clone())
                .collect(),
        }
    }
}

/// Scope from transitive dependents, time from history or severity.
#[derive(Debug, Default)]
pub struct DependencyImpactAssessor;

impl ImpactAssessor for DependencyImpactAssessor {
    fn assess(
        &self,
        fault: &Fault,
        dependents: &[String],
        historical_recovery_time: Option<Duration>,
    ) -> ImpactAssessment {
        let scope = DependencyGraph::scope_for(dependents.len());
        let base = historical_recovery_time.unwrap_or(match fault.severity {
            Severity::Low => Duration::from_secs(60),
            Severity::Medium => Duration::from_secs(120),
            Severity::High => Duration::from_secs(300),
            Severity::Critical => Duration::from_secs(600),
        });
        let recovery_time_estimate = if scope == ImpactScope::System {
            base * 2
        } else {
            base
        };

        let mut affected_components = vec![fault.component.clone()];
        affected_components.extend(dependents.iter().cloned());

        let business_impact = match scope {
            ImpactScope::Component => format!("Degraded {} only", fault.component),
            ImpactScope::Service => format!(
                "{} and {} dependent service(s) degraded",
                fault.component,
                dependents.len()
            ),
            ImpactScope::System => "Trading platform broadly degraded".to_string(),
        };

        ImpactAssessment {
            scope,
            severity: fault.severity,
            affected_components,
            business_impact,
            recovery_time_estimate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub root_cause: RootCause,
    pub impact: ImpactAssessment,
    pub plan: RecoveryPlan,
}

pub struct DiagnosisEngineConfig {
    pub strategy_table: Vec<StrategyMapping>,
    pub default_strategy: String,
    pub default_alternates: Vec<String>,
    pub confidence_floor: f64,
}

pub struct DiagnosisEngine {
    correlation: CorrelationEngine,
    knowledge: Arc<KnowledgeBase>,
    graph: DependencyGraph,
    catalog: Arc<StrategyCatalog>,
    config: DiagnosisEngineConfig,
    analyzer: Arc<dyn RootCauseAnalyzer>,
    impact: Arc<dyn ImpactAssessor>,
    clock: Arc<dyn Clock>,
}

impl DiagnosisEngine {
    pub fn new(
        correlation: CorrelationEngine,
        knowledge: Arc<KnowledgeBase>,
        graph: DependencyGraph,
        catalog: Arc<StrategyCatalog>,
        config: DiagnosisEngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            correlation,
            knowledge,
            graph,
            catalog,
            config,
            analyzer: Arc::new(EvidenceWeightedAnalyzer),
            impact: Arc::new(DependencyImpactAssessor),
            clock,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn RootCauseAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_impact_assessor(mut self, impact: Arc<dyn ImpactAssessor>) -> Self {
        self.impact = impact;
        self
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    /// Make a newly detected fault visible to correlation.
    pub async fn record_detection(&self, fault: &Fault) {
        self.correlation.record(FaultEvent::from(fault)).await;
    }

    /// Root cause, impact and plan for `fault`. `active` is every other active fault.
    pub async fn diagnose(&self, fault: &Fault, active: &[Fault]) -> Result<Diagnosis, HealingError> {
        let correlations = self.correlation.correlate(fault).await;
        let upstream = self.graph.upstream(&fault.component);
        let upstream_faults: Vec<&Fault> = active
            .iter()
            .filter(|f| f.id != fault.id && upstream.contains(&f.component))
            .collect();
        let historical_cases = self
            .knowledge
            .matching_cases(&fault.fault_type, &fault.component)
            .await;

        let mut root_cause = self.analyzer.analyze(&DiagnosisContext {
            fault,
            correlations: &correlations,
            upstream_faults,
            historical_cases: &historical_cases,
        });
        let below_floor = root_cause.confidence < self.config.confidence_floor;
        if below_floor {
            warn!(
                fault_id = %fault.id,
                confidence = root_cause.confidence,
                floor = self.config.confidence_floor,
                "Root cause below confidence floor, planning best effort"
            );
            root_cause.reason = format!("best effort: {}", root_cause.reason);
        }

        let (selected, alternates) = self.select_strategy(fault).await?;
        let strategy = self
            .catalog
            .get(&selected)
            .ok_or_else(|| HealingError::UnknownStrategy(selected.clone()))?;

        let historical_time = self
            .knowledge
            .stats(&fault.fault_type, &selected)
            .await
            .and_then(|s| s.average_recovery_time());
        let dependents = self.graph.downstream(&fault.component);
        let impact = self.impact.assess(fault, &dependents, historical_time);

        let risk_assessment = assess_risk(fault, &strategy, &impact, below_floor);
        let approval_required = strategy.requires_approval
            || fault.severity == Severity::Critical
            || risk_assessment.overall_risk >= RiskLevel::High;

        let plan = RecoveryPlan {
            fault_id: fault.id.clone(),
            selected_strategy: selected,
            alternative_strategies: alternates,
            estimated_recovery_time: historical_time
                .unwrap_or_else(|| strategy.estimated_duration()),
            risk_assessment,
            approval_required,
            confidence: root_cause.confidence,
            created_at: self.clock.now(),
        };

        info!(
            fault_id = %fault.id,
            cause = %root_cause.cause_type,
            cause_component = %root_cause.component,
            confidence = root_cause.confidence,
            scope = %impact.scope,
            strategy = %plan.selected_strategy,
            risk = %plan.risk_assessment.overall_risk,
            approval_required = plan.approval_required,
            "Fault diagnosed"
        );

        Ok(Diagnosis {
            root_cause,
            impact,
            plan,
        })
    }

    fn table_lookup(&self, fault: &Fault) -> (String, Vec<String>) {
        let mapping = self
            .config
            .strategy_table
            .iter()
            .filter(|m| m.component == fault.component)
            .find(|m| m.fault_type.as_deref() == Some(fault.fault_type.as_str()))
            .or_else(|| {
                self.config
                    .strategy_table
                    .iter()
                    .find(|m| m.component == fault.component && m.fault_type.is_none())
            });
        match mapping {
            Some(m) => (m.strategy.clone(), m.alternates.clone()),
            None => (
                self.config.default_strategy.clone(),
                self.config.default_alternates.clone(),
            ),
        }
    }

    /// Strategy and alternates for `fault`, after knowledge-base demotion.
    pub async fn select_strategy(&self, fault: &Fault) -> Result<(String, Vec<String>), HealingError> {
        let (mut selected, raw_alternates) = self.table_lookup(fault);
        if !self.catalog.contains(&selected) {
            return Err(HealingError::UnknownStrategy(selected));
        }

        let mut alternates: Vec<String> = Vec::new();
        for id in raw_alternates {
            if id != selected && self.catalog.contains(&id) && !alternates.contains(&id) {
                alternates.push(id);
            }
        }

        if let (Some(stats), Some(strategy)) = (
            self.knowledge.stats(&fault.fault_type, &selected).await,
            self.catalog.get(&selected),
        ) {
            let current_rate = stats.smoothed_success_rate();
            if stats.attempts >= MIN_SAMPLES_FOR_SWAP && current_rate < strategy.success_threshold {
                let mut best: Option<(usize, f64)> = None;
                for (idx, alt) in alternates.iter().enumerate() {
                    let rate = self.knowledge.success_rate(&fault.fault_type, alt).await;
                    if best.map_or(true, |(_, r)| rate > r) {
                        best = Some((idx, rate));
                    }
                }
                if let Some((idx, rate)) = best {
                    if rate > current_rate {
                        let promoted = alternates.remove(idx);
                        debug!(
                            fault_type = %fault.fault_type,
                            demoted = %selected,
                            promoted = %promoted,
                            demoted_rate = current_rate,
                            promoted_rate = rate,
                            "Knowledge base swapped recovery strategy"
                        );
                        alternates.push(std::mem::replace(&mut selected, promoted));
                    }
                }
            }
        }

        Ok((selected, alternates))
    }
}

/// Overall risk starts at the strategy's own level and is raised one step for
/// system-wide impact and one step for a best-effort diagnosis.
pub fn assess_risk(
    fault: &Fault,
    strategy: &RecoveryStrategy,
    impact: &ImpactAssessment,
    low_confidence: bool,
) -> RiskAssessment {
    let mut overall = strategy.risk_level;
    let mut factors = vec![RiskFactor {
        factor: "strategy_risk".to_string(),
        severity: strategy.risk_level,
        probability: 1.0,
        impact: format!("{} declared {} risk", strategy.id, strategy.risk_level),
        mitigation: format!("bounded by {}s timeout", strategy.timeout_secs),
    }];

    if impact.scope == ImpactScope::System {
        overall = overall.raised();
        factors.push(RiskFactor {
            factor: "system_wide_impact".to_string(),
            severity: RiskLevel::High,
            probability: 0.5,
            impact: format!("{} components affected", impact.affected_components.len()),
            mitigation: "operator review".to_string(),
        });
    }

    if low_confidence {
        overall = overall.raised();
        factors.push(RiskFactor {
            factor: "low_diagnosis_confidence".to_string(),
            severity: RiskLevel::Medium,
            probability: 0.5,
            impact: "remediation may target the wrong cause".to_string(),
            mitigation: "alternates kept for escalation".to_string(),
        });
    }

    if fault.severity == Severity::Critical {
        factors.push(RiskFactor {
            factor: "critical_fault".to_string(),
            severity: RiskLevel::Critical,
            probability: 1.0,
            impact: "trading may be halted".to_string(),
            mitigation: "manual approval".to_string(),
        });
    }

    RiskAssessment {
        overall_risk: overall,
        risk_factors: factors,
    }
}

/// Automatic execution is allowed only with auto-restart on, a non-CRITICAL
/// fault, a plan below HIGH risk, and no approval requirement.
pub fn should_auto_recover(auto_restart: bool, fault: &Fault, plan: &RecoveryPlan) -> bool {
    auto_restart
        && fault.severity != Severity::Critical
        && plan.risk_assessment.overall_risk < RiskLevel::High
        && !plan.approval_required
}
