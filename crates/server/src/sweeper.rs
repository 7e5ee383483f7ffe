use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use opsgate_engine::WorkflowService;

/// Background escalation monitor. The first pass runs at startup so overdue
/// steps are not left waiting a full interval after a restart.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub fn spawn(service: Arc<WorkflowService>, every: Duration) -> SweeperHandle {
    let (shutdown, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => run_once(&service).await,
                _ = stopped.changed() => break,
            }
        }
    });
    SweeperHandle { shutdown, task }
}

impl SweeperHandle {
    /// Signals the loop to exit and waits up to `grace` for a pass in
    /// flight to finish before aborting the task.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.shutdown.send(true);
        match timeout(grace, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(event_name = "system.sweeper.error", %error, "sweeper task ended abnormally");
            }
            Err(_) => {
                warn!(
                    event_name = "system.sweeper.abort",
                    "sweeper did not stop within the grace period, aborting"
                );
                self.task.abort();
            }
        }
    }
}

async fn run_once(service: &WorkflowService) {
    match service.run_escalation_sweep().await {
        Ok(report) if report.due > 0 => {
            info!(
                event_name = "system.sweeper.cycle",
                scanned = report.scanned,
                due = report.due,
                escalated = report.escalated,
                "escalation sweep completed"
            );
        }
        Ok(report) => {
            debug!(
                event_name = "system.sweeper.cycle",
                scanned = report.scanned,
                "escalation sweep found nothing due"
            );
        }
        Err(error) => {
            warn!(event_name = "system.sweeper.error", %error, "escalation sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use opsgate_core::config::EngineConfig;
    use opsgate_core::domain::action::{ActionId, Environment, RiskScore, ServerCriticality};
    use opsgate_core::domain::workflow::StepStatus;
    use opsgate_core::roles::RolePolicyTable;
    use opsgate_core::templates::{CreateWorkflowRequest, RoutingPolicy, TemplateSelector};
    use opsgate_engine::{
        InMemoryAuditSink, InMemoryNotificationSink, InMemoryWorkflowStore, WorkflowService,
        WorkflowStore,
    };

    use super::spawn;

    fn service_over(store: Arc<InMemoryWorkflowStore>) -> Arc<WorkflowService> {
        let audit = Arc::new(InMemoryAuditSink::default());
        Arc::new(WorkflowService::new(
            store,
            audit.clone(),
            audit,
            Arc::new(InMemoryNotificationSink::default()),
            RoutingPolicy::default(),
            RolePolicyTable::builtin(),
            EngineConfig {
                lock_retry_attempts: 5,
                lock_retry_base_delay_ms: 1,
                sweep_interval_secs: 300,
            },
        ))
    }

    #[tokio::test]
    async fn sweeper_escalates_overdue_steps_on_schedule() {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let selector = TemplateSelector::new(RoutingPolicy::default(), RolePolicyTable::builtin());
        let overdue = selector.instantiate(
            &CreateWorkflowRequest {
                action_id: ActionId("ra-overdue".to_string()),
                risk_score: RiskScore::new(40).expect("valid risk"),
                environment: Environment::Staging,
                server_criticality: ServerCriticality::Medium,
                impact_assessment: "cache flush".to_string(),
                business_justification: "stale config".to_string(),
            },
            Utc::now() - chrono::Duration::hours(30),
        );
        store.insert(overdue.clone()).await.expect("insert");

        let handle = spawn(service_over(store.clone()), Duration::from_millis(20));

        let mut escalated = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let record = store.find(&overdue.workflow.id).await.expect("find").expect("present");
            if record.steps[0].status == StepStatus::Escalated {
                escalated = true;
                break;
            }
        }
        handle.stop(Duration::from_secs(1)).await;

        assert!(escalated, "the sweeper should escalate the overdue step within a few ticks");
    }

    #[tokio::test]
    async fn stop_returns_promptly_between_ticks() {
        let store = Arc::new(InMemoryWorkflowStore::default());
        let handle = spawn(service_over(store), Duration::from_secs(3600));

        // The long interval means the loop is parked on its ticker; stop
        // must not wait for the next tick.
        tokio::time::timeout(Duration::from_secs(2), handle.stop(Duration::from_secs(1)))
            .await
            .expect("stop should complete without waiting for the next tick");
    }
}
