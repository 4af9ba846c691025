use crate::config::secs;
use crate::decision_log::{DecisionEntry, DecisionType};
use crate::retry::{is_retryable, RetryPolicy};
use crate::spawner::{AgentSpawner, SpawnOptions, CANCELLED};
use crate::types::{
    AgentStatus, ExecutionRecord, SpawnRequest, StepResult, WorkflowDefinition, WorkflowResult,
    WorkflowStatus, WorkflowStep,
};
use chrono::Utc;
use oliver_core::{Metadata, OliverError, OliverResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Placeholder replaced by the caller's initial request in step prompts.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Sequences workflow steps through the spawner, carrying results forward.
pub struct WorkflowEngine {
    spawner: Arc<AgentSpawner>,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    backoff: RetryPolicy,
    shutdown: CancellationToken,
}

impl WorkflowEngine {
    /// `backoff` supplies the retry delays; the per-step retry count comes from each
    /// definition. Step executions run under children of `shutdown`, and no new attempt
    /// starts once it is cancelled.
    pub fn new(
        spawner: Arc<AgentSpawner>,
        backoff: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            spawner,
            workflows: RwLock::new(HashMap::new()),
            backoff,
            shutdown,
        }
    }

    /// Validate and register a definition (last write wins).
    pub fn register(&self, mut workflow: WorkflowDefinition) -> OliverResult<()> {
        workflow.validate()?;
        workflow.status = WorkflowStatus::Idle;
        info!(
            workflow = %workflow.id,
            steps = workflow.steps.len(),
            "Registered workflow"
        );
        self.workflows.write().insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Definition for `id`, with its last status.
    pub fn get(&self, id: &str) -> Option<WorkflowDefinition> {
        self.workflows.read().get(id).cloned()
    }

    /// All definitions, sorted by id.
    pub fn definitions(&self) -> Vec<WorkflowDefinition> {
        let mut defs: Vec<WorkflowDefinition> = self.workflows.read().values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Status of every definition, for metrics.
    pub fn statuses(&self) -> Vec<WorkflowStatus> {
        self.workflows.read().values().map(|w| w.status).collect()
    }

    /// Run every step of `workflow_id` in declared order.
    ///
    /// An unknown workflow is an `Err`. Step failures and unmet dependencies end the run
    /// early and come back as a `failed` result with the steps executed so far.
    pub async fn execute(
        &self,
        workflow_id: &str,
        initial_input: &str,
        metadata: Metadata,
    ) -> OliverResult<WorkflowResult> {
        let workflow = self
            .get(workflow_id)
            .ok_or_else(|| OliverError::WorkflowNotFound(workflow_id.to_string()))?;

        self.set_status(workflow_id, WorkflowStatus::Running);
        info!(workflow = %workflow_id, steps = workflow.steps.len(), "Executing workflow");

        let started_at = Utc::now();
        let mut results: Vec<StepResult> = Vec::new();
        let mut outputs: Vec<(String, String)> = Vec::new();
        let mut failure: Option<String> = None;
        let mut last_provider = String::new();

        for (index, step) in workflow.steps.iter().enumerate() {
            if let Some(missing) = step
                .dependencies
                .iter()
                .find(|dep| !outputs.iter().any(|(id, _)| id == *dep))
            {
                let err = OliverError::Dependency(format!(
                    "step {} requires {missing}, which has not produced a result",
                    step.id
                ));
                error!(workflow = %workflow_id, step = %step.id, error = %err, "Workflow aborted");
                failure = Some(err.to_string());
                break;
            }

            let prompt = render_step_prompt(&step.prompt, initial_input, &outputs);
            let mut step_metadata = metadata.clone();
            step_metadata.insert("workflow_id".into(), workflow_id.into());
            step_metadata.insert("step_id".into(), step.id.clone().into());
            step_metadata.insert("step_index".into(), index.into());
            let request = SpawnRequest {
                agent_type: step.agent.clone(),
                prompt: prompt.clone(),
                metadata: step_metadata,
            };

            let result = self.run_step(&workflow, step, request).await;
            if let Some(provider) = &result.provider {
                last_provider.clone_from(provider);
            }
            self.spawner.sink().record(DecisionEntry::new(
                DecisionType::WorkflowStep,
                result.provider.clone().unwrap_or_default(),
                &prompt,
                result.raw.as_deref().unwrap_or_default(),
                step_trace(workflow_id, &result.step),
            ));

            let step_result = result.step;
            let completed = step_result.status == AgentStatus::Completed;
            match (completed, result.raw) {
                (true, Some(raw)) => {
                    outputs.push((step.id.clone(), raw));
                    results.push(step_result);
                }
                _ => {
                    let reason = step_result
                        .error
                        .clone()
                        .unwrap_or_else(|| step_result.status.to_string());
                    error!(
                        workflow = %workflow_id,
                        step = %step.id,
                        attempts = step_result.attempts,
                        error = %reason,
                        "Workflow step failed, aborting"
                    );
                    failure = Some(format!("step {} failed: {reason}", step.id));
                    results.push(step_result);
                    break;
                }
            }
        }

        let status = if failure.is_some() {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        };
        self.set_status(workflow_id, status);

        let result = WorkflowResult {
            workflow_id: workflow_id.to_string(),
            status,
            duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
            error: failure,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            workflow = %workflow_id,
            status = ?result.status,
            steps_run = result.results.len(),
            duration_ms = result.duration_ms,
            "Workflow finished"
        );

        let mut trace = metadata;
        trace.insert("workflow_id".into(), workflow_id.into());
        trace.insert(
            "status".into(),
            serde_json::to_value(status).unwrap_or_default(),
        );
        let last_response = outputs.last().map(|(_, raw)| raw.as_str()).unwrap_or_default();
        self.spawner.sink().record(DecisionEntry::new(
            DecisionType::WorkflowExecution,
            last_provider,
            initial_input,
            last_response,
            trace,
        ));

        Ok(result)
    }

    /// Spawn one step with its retry allowance and per-attempt deadline.
    async fn run_step(
        &self,
        workflow: &WorkflowDefinition,
        step: &WorkflowStep,
        request: SpawnRequest,
    ) -> StepRun {
        let policy = self
            .backoff
            .with_retries(step.retries.unwrap_or(workflow.settings.retry_attempts));
        let timeout = step.timeout.or(workflow.settings.default_timeout).map(secs);

        let mut attempts = 0;
        let mut last: Option<ExecutionRecord> = None;
        let mut last_error: Option<String> = None;

        while attempts < policy.max_attempts() {
            if attempts > 0 {
                let delay = policy.backoff(attempts - 1);
                warn!(
                    step = %step.id,
                    attempt = attempts + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying workflow step"
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.shutdown.is_cancelled() {
                info!(step = %step.id, attempts, "Shutdown requested, no further attempts");
                last_error = Some(CANCELLED.to_string());
                break;
            }
            attempts += 1;

            let options = SpawnOptions {
                cancel: Some(self.shutdown.clone()),
                timeout,
            };
            match self.spawner.spawn_with(request.clone(), options).await {
                Ok(record) if record.status == AgentStatus::Completed => {
                    last = Some(record);
                    last_error = None;
                    break;
                }
                Ok(record) => {
                    // Cancellation means shutdown; do not retry it.
                    let stopped = record.status == AgentStatus::Stopped;
                    last_error = record.error.clone();
                    last = Some(record);
                    if stopped {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if !is_retryable(&e) {
                        break;
                    }
                }
            }
        }

        let status = match &last {
            Some(record) if last_error.is_none() => record.status,
            Some(record) if record.status.is_terminal() => record.status,
            _ => AgentStatus::Failed,
        };
        let raw = last
            .as_ref()
            .filter(|r| r.status == AgentStatus::Completed)
            .and_then(|r| r.raw_response().map(str::to_string));

        StepRun {
            provider: last.as_ref().and_then(|r| r.model_provider_used.clone()),
            raw,
            step: StepResult {
                step_id: step.id.clone(),
                agent: step.agent.clone(),
                execution_id: last.as_ref().map(|r| r.id.clone()),
                status,
                attempts,
                duration_ms: last.as_ref().and_then(|r| r.duration_ms).unwrap_or_default(),
                result: last.as_ref().and_then(|r| r.result.clone()),
                error: last_error,
            },
        }
    }

    fn set_status(&self, id: &str, status: WorkflowStatus) {
        if let Some(workflow) = self.workflows.write().get_mut(id) {
            workflow.status = status;
        }
    }
}

struct StepRun {
    provider: Option<String>,
    raw: Option<String>,
    step: StepResult,
}

fn step_trace(workflow_id: &str, step: &StepResult) -> Metadata {
    let mut trace = Metadata::new();
    trace.insert("workflow_id".into(), workflow_id.into());
    trace.insert("step_id".into(), step.step_id.clone().into());
    trace.insert("status".into(), step.status.to_string().into());
    trace.insert("attempts".into(), step.attempts.into());
    trace
}

/// Build a step prompt from its template, the initial request and earlier results.
///
/// `{input}` in the template is replaced by the request; without the placeholder the
/// request is appended. Earlier results follow as `Step {id}: {result}` lines.
pub fn render_step_prompt(template: &str, initial_input: &str, previous: &[(String, String)]) -> String {
    let mut prompt = if template.contains(INPUT_PLACEHOLDER) {
        template.replace(INPUT_PLACEHOLDER, initial_input)
    } else if initial_input.is_empty() {
        template.to_string()
    } else {
        format!("{template}\n\nRequest: {initial_input}")
    };

    if !previous.is_empty() {
        let rendered: Vec<String> = previous
            .iter()
            .map(|(id, result)| format!("Step {id}: {result}"))
            .collect();
        prompt.push_str("\n\nPrevious results:\n");
        prompt.push_str(&rendered.join("\n"));
    }
    prompt
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholder() {
        let prompt = render_step_prompt("Plan: {input}", "build a CLI", &[]);
        assert_eq!(prompt, "Plan: build a CLI");
    }

    #[test]
    fn test_render_appends_request_and_previous() {
        let previous = vec![
            ("wf-step-0".to_string(), "plan A".to_string()),
            ("wf-step-1".to_string(), "code B".to_string()),
        ];
        let prompt = render_step_prompt("Review it.", "build a CLI", &previous);
        assert_eq!(
            prompt,
            "Review it.\n\nRequest: build a CLI\n\nPrevious results:\n\
             Step wf-step-0: plan A\nStep wf-step-1: code B"
        );
    }

    #[test]
    fn test_render_without_input() {
        assert_eq!(render_step_prompt("Just do it", "", &[]), "Just do it");
    }
}
