//! Execution backend for recovery steps.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::strategy::{RecoveryStep, StepKind};

#[derive(Error, Debug)]
pub enum StepError {
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    #[error("step failed: {0}")]
    Failed(String),

    #[error("{0} steps are not supported by this executor")]
    Unsupported(StepKind),

    #[error("empty payload")]
    EmptyPayload,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs a single step against a component and returns its output.
///
/// Implementations do not apply the step timeout; the recovery executor does.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, component: &str, step: &RecoveryStep) -> Result<String, StepError>;
}

/// Runs COMMAND steps as child processes. Other kinds are unsupported.
///
/// Children are killed when the returned future is dropped, so a timed out
/// step never leaves a process behind.
#[derive(Debug, Default, Clone)]
pub struct ProcessStepExecutor;

#[async_trait]
impl StepExecutor for ProcessStepExecutor {
    async fn execute(&self, component: &str, step: &RecoveryStep) -> Result<String, StepError> {
        if step.kind != StepKind::Command {
            return Err(StepError::Unsupported(step.kind));
        }
        let payload = step.render_payload(component);
        let mut parts = payload.split_whitespace();
        let program = parts.next().ok_or(StepError::EmptyPayload)?;

        debug!(step_id = %step.id, component, command = %payload, "Running recovery command");
        let output = Command::new(program)
            .args(parts)
            .envs(&step.parameters)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(StepError::Failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                if stderr.is_empty() { stdout } else { stderr }
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::strategy::FailurePolicy;
    use std::collections::HashMap;

    fn step(kind: StepKind, payload: &str) -> RecoveryStep {
        RecoveryStep {
            id: "s1".to_string(),
            name: "step".to_string(),
            kind,
            payload: payload.to_string(),
            parameters: HashMap::new(),
            timeout_secs: 5,
            on_failure: FailurePolicy::Abort,
        }
    }

    #[tokio::test]
    async fn test_non_command_kinds_are_unsupported() {
        let err = ProcessStepExecutor
            .execute("api_server", &step(StepKind::ApiCall, "GET /health"))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Unsupported(StepKind::ApiCall)));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let err = ProcessStepExecutor
            .execute("api_server", &step(StepKind::Command, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::EmptyPayload));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_and_exit_status() {
        let out = ProcessStepExecutor
            .execute("api_server", &step(StepKind::Command, "echo {component}"))
            .await
            .unwrap();
        assert_eq!(out, "api_server");

        let err = ProcessStepExecutor
            .execute("api_server", &step(StepKind::Command, "false"))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let mut mock = MockStepExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|component, _| Ok(format!("ok {}", component)));
        let out = mock
            .execute("redis", &step(StepKind::Command, "noop"))
            .await
            .unwrap();
        assert_eq!(out, "ok redis");
    }
}
