//! Parallel spawn coordinator.
//!
//! Every request runs as its own task in a [`JoinSet`] with a child of the group token.
//! The call returns only after every branch has finished or unwound.

use crate::spawner::{AgentSpawner, SpawnOptions};
use crate::types::{AgentStatus, ExecutionRecord, SpawnRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one fan-out branch.
#[derive(Debug)]
pub enum BranchOutcome {
    /// The execution completed.
    Completed(ExecutionRecord),
    /// The execution failed, was refused, or its task panicked.
    Failed {
        /// Position of the request in the input.
        index: usize,
        /// Requested agent type.
        agent_type: String,
        /// Record id, when one was created.
        execution_id: Option<String>,
        /// Error text.
        reason: String,
        /// Admission refused the request, so no record exists.
        rejected: bool,
    },
    /// The execution was stopped, or its task was aborted.
    Cancelled {
        /// Position of the request in the input.
        index: usize,
        /// Requested agent type.
        agent_type: String,
        /// Record id, when one was created.
        execution_id: Option<String>,
    },
}

/// Run one execution per request concurrently and collect a tagged outcome per branch,
/// in request order.
pub async fn run_branches(
    spawner: Arc<AgentSpawner>,
    requests: Vec<SpawnRequest>,
    group: &CancellationToken,
) -> Vec<BranchOutcome> {
    let mut set = JoinSet::new();
    let mut branches = HashMap::with_capacity(requests.len());
    let mut agent_types = Vec::with_capacity(requests.len());

    for (index, request) in requests.into_iter().enumerate() {
        agent_types.push(request.agent_type.clone());
        let spawner = spawner.clone();
        let options = SpawnOptions {
            cancel: Some(group.child_token()),
            timeout: None,
        };
        let handle = set.spawn(async move {
            let agent_type = request.agent_type.clone();
            match spawner.spawn_with(request, options).await {
                Ok(record) => match record.status {
                    AgentStatus::Completed => BranchOutcome::Completed(record),
                    AgentStatus::Stopped => BranchOutcome::Cancelled {
                        index,
                        agent_type,
                        execution_id: Some(record.id),
                    },
                    _ => BranchOutcome::Failed {
                        index,
                        agent_type,
                        reason: record
                            .error
                            .unwrap_or_else(|| format!("ended {}", record.status)),
                        execution_id: Some(record.id),
                        rejected: false,
                    },
                },
                Err(e) => BranchOutcome::Failed {
                    index,
                    agent_type,
                    execution_id: None,
                    reason: e.to_string(),
                    rejected: e.is_admission(),
                },
            }
        });
        branches.insert(handle.id(), index);
    }

    let mut outcomes: Vec<(usize, BranchOutcome)> = Vec::with_capacity(agent_types.len());
    while let Some(res) = set.join_next_with_id().await {
        let (id, outcome) = match res {
            Ok((id, outcome)) => (id, Ok(outcome)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(&index) = branches.get(&id) else {
            continue;
        };
        let outcome = outcome.unwrap_or_else(|e| lost_branch(index, &agent_types[index], &e));
        outcomes.push((index, outcome));
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Outcome for a branch whose task ended without returning.
fn lost_branch(index: usize, agent_type: &str, err: &JoinError) -> BranchOutcome {
    if err.is_cancelled() {
        warn!(index, agent = %agent_type, "Fan-out branch aborted");
        BranchOutcome::Cancelled {
            index,
            agent_type: agent_type.to_string(),
            execution_id: None,
        }
    } else {
        warn!(index, agent = %agent_type, error = %err, "Fan-out branch panicked");
        BranchOutcome::Failed {
            index,
            agent_type: agent_type.to_string(),
            execution_id: None,
            reason: "branch task panicked".into(),
            rejected: false,
        }
    }
}

/// Fan out `requests` and return only the completed records.
///
/// Failed and cancelled branches are logged and skipped. If `group` is cancelled, every
/// branch is cancelled and awaited, and the result is empty.
pub async fn spawn_multiple(
    spawner: Arc<AgentSpawner>,
    requests: Vec<SpawnRequest>,
    group: &CancellationToken,
) -> Vec<ExecutionRecord> {
    let total = requests.len();
    info!(count = total, "Spawning agents in parallel");

    let outcomes = run_branches(spawner, requests, group).await;

    if group.is_cancelled() {
        warn!(count = total, "Parallel spawn cancelled, all branches reported as cancelled");
        return Vec::new();
    }

    let mut completed = Vec::new();
    for outcome in outcomes {
        match outcome {
            BranchOutcome::Completed(record) => completed.push(record),
            BranchOutcome::Failed {
                index,
                agent_type,
                execution_id,
                reason,
                rejected,
            } => warn!(
                index,
                agent = %agent_type,
                execution_id = ?execution_id,
                reason = %reason,
                rejected,
                "Parallel spawn branch failed"
            ),
            BranchOutcome::Cancelled {
                index,
                agent_type,
                execution_id,
            } => warn!(
                index,
                agent = %agent_type,
                execution_id = ?execution_id,
                "Parallel spawn branch cancelled"
            ),
        }
    }
    info!(
        requested = total,
        completed = completed.len(),
        "Parallel spawn finished"
    );
    completed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::decision_log::NoopDecisionSink;
    use crate::registry::AgentRegistry;
    use crate::spawner::{SpawnLimits, PANICKED};
    use crate::store::ExecutionStore;
    use crate::types::AgentDefinition;
    use async_trait::async_trait;
    use oliver_core::OliverResult;
    use oliver_llm::{LanguageModel, ModelRouter};

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn model(&self) -> &str {
            "echo-1"
        }
        async fn generate(&self, prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            Ok(prompt.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl LanguageModel for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn model(&self) -> &str {
            "broken-1"
        }
        async fn generate(&self, _prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            panic!("backend bug")
        }
    }

    fn spawner(max_active: usize) -> Arc<AgentSpawner> {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(AgentDefinition::new("echo", "Echo", "echo/echo-1", "Repeat."));
        registry.register(AgentDefinition::new("broken", "Broken", "broken/x", "Crash."));
        let router =
            ModelRouter::new("echo", Arc::new(Echo)).with_provider("broken", Arc::new(Broken));
        Arc::new(AgentSpawner::new(
            registry,
            Arc::new(ExecutionStore::new()),
            Arc::new(router),
            Arc::new(NoopDecisionSink),
            2,
            SpawnLimits {
                max_active,
                heartbeat_interval_secs: 30.0,
            },
        ))
    }

    #[tokio::test]
    async fn test_panicking_branch_fails_alone() {
        let spawner = spawner(4);
        let requests = vec![
            SpawnRequest::new("echo", "a"),
            SpawnRequest::new("broken", "b"),
            SpawnRequest::new("echo", "c"),
        ];
        let outcomes = run_branches(spawner.clone(), requests, &CancellationToken::new()).await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], BranchOutcome::Completed(_)));
        assert!(matches!(
            &outcomes[1],
            BranchOutcome::Failed { index: 1, reason, rejected: false, .. }
                if reason == "branch task panicked"
        ));
        assert!(matches!(outcomes[2], BranchOutcome::Completed(_)));

        let broken = spawner
            .store()
            .records()
            .into_iter()
            .find(|r| r.agent_type == "broken")
            .unwrap();
        assert_eq!(broken.status, AgentStatus::Failed);
        assert_eq!(broken.error.as_deref(), Some(PANICKED));
        assert_eq!(spawner.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_branch_is_marked_rejected() {
        let outcomes = run_branches(
            spawner(4),
            vec![SpawnRequest::new("nobody", "x"), SpawnRequest::new("echo", "y")],
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(
            &outcomes[0],
            BranchOutcome::Failed { execution_id: None, rejected: true, .. }
        ));
        assert!(matches!(outcomes[1], BranchOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_lost_branch_tells_abort_from_panic() {
        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        let err = aborted.await.unwrap_err();
        assert!(matches!(
            lost_branch(0, "echo", &err),
            BranchOutcome::Cancelled { index: 0, execution_id: None, .. }
        ));

        let panicked = tokio::spawn(async {
            panic!("boom");
        })
        .await
        .unwrap_err();
        assert!(matches!(
            lost_branch(1, "echo", &panicked),
            BranchOutcome::Failed { index: 1, rejected: false, .. }
        ));
    }
}
