//! Long-running simulation task supervisor: dispatch, progress, cooperative
//! cancellation, dedup, and startup reclaim of stuck RUNNING rows (spec §4.9).

use crate::domain::repositories::SimulationTaskRepository;
use crate::domain::{SimulationStatus, SimulationTask, SimulationTaskType};
use std::sync::Arc;
use tracing::{info, warn};

pub struct SimulationSupervisor {
    owner_instance_id: String,
    tasks: Arc<dyn SimulationTaskRepository>,
}

impl SimulationSupervisor {
    /// Constructs the supervisor and, per spec §4.9, immediately reclaims any
    /// RUNNING rows owned by this instance id left over from a crash — they
    /// are marked FAILED with "interrupted" rather than silently resumed.
    pub async fn new(owner_instance_id: String, tasks: Arc<dyn SimulationTaskRepository>) -> anyhow::Result<Self> {
        let supervisor = Self { owner_instance_id, tasks };
        supervisor.reclaim_stuck().await?;
        Ok(supervisor)
    }

    async fn reclaim_stuck(&self) -> anyhow::Result<()> {
        let stuck = self.tasks.find_stuck_running(&self.owner_instance_id).await?;
        for mut task in stuck {
            warn!(task_id = %task.id, "reclaiming a RUNNING task left over from a previous process instance");
            task.status = SimulationStatus::Failed;
            task.error = Some("interrupted".to_string());
            task.updated_at = chrono::Utc::now();
            self.tasks.update(&task).await?;
        }
        Ok(())
    }

    /// Submits a new job. If an active (PENDING/RUNNING) task with the same
    /// param hash already exists, returns its id instead of creating a
    /// duplicate.
    pub async fn submit(&self, task_type: SimulationTaskType, param_hash: String, total_markets: u32) -> anyhow::Result<uuid::Uuid> {
        if let Some(existing) = self.tasks.find_active_by_param_hash(&param_hash).await? {
            info!(task_id = %existing.id, %param_hash, "submission deduplicated against an active task");
            return Ok(existing.id);
        }
        let task = SimulationTask::new_pending(task_type, param_hash, total_markets, self.owner_instance_id.clone());
        let id = task.id;
        self.tasks.insert(&task).await?;
        Ok(id)
    }

    pub async fn mark_running(&self, id: uuid::Uuid) -> anyhow::Result<()> {
        let Some(mut task) = self.tasks.find_by_id(id).await? else {
            anyhow::bail!("task {id} not found");
        };
        task.status = SimulationStatus::Running;
        task.updated_at = chrono::Utc::now();
        self.tasks.update(&task).await?;
        Ok(())
    }

    /// Updates market/combination progress counters. Call this between
    /// markets so [`Self::is_cancel_requested`] stays current for the caller.
    pub async fn update_progress(&self, id: uuid::Uuid, markets_processed: u32, combinations_tested: u32) -> anyhow::Result<()> {
        let Some(mut task) = self.tasks.find_by_id(id).await? else {
            anyhow::bail!("task {id} not found");
        };
        task.markets_processed = markets_processed;
        task.combinations_tested = combinations_tested;
        task.updated_at = chrono::Utc::now();
        self.tasks.update(&task).await?;
        Ok(())
    }

    /// Cooperative cancellation check; callers are expected to poll this
    /// between markets and stop early when it returns true.
    pub async fn is_cancel_requested(&self, id: uuid::Uuid) -> anyhow::Result<bool> {
        Ok(self.tasks.find_by_id(id).await?.map(|t| t.cancel_requested).unwrap_or(false))
    }

    pub async fn request_cancel(&self, id: uuid::Uuid) -> anyhow::Result<()> {
        let Some(mut task) = self.tasks.find_by_id(id).await? else {
            anyhow::bail!("task {id} not found");
        };
        task.cancel_requested = true;
        task.updated_at = chrono::Utc::now();
        self.tasks.update(&task).await?;
        Ok(())
    }

    pub async fn complete(&self, id: uuid::Uuid, result_payload: serde_json::Value) -> anyhow::Result<()> {
        let Some(mut task) = self.tasks.find_by_id(id).await? else {
            anyhow::bail!("task {id} not found");
        };
        task.status = if task.cancel_requested { SimulationStatus::Cancelled } else { SimulationStatus::Completed };
        task.result_payload = Some(result_payload);
        task.updated_at = chrono::Utc::now();
        self.tasks.update(&task).await?;
        Ok(())
    }

    pub async fn fail(&self, id: uuid::Uuid, error: String) -> anyhow::Result<()> {
        let Some(mut task) = self.tasks.find_by_id(id).await? else {
            anyhow::bail!("task {id} not found");
        };
        task.status = SimulationStatus::Failed;
        task.error = Some(error);
        task.updated_at = chrono::Utc::now();
        self.tasks.update(&task).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemorySimulationTaskRepository;

    fn supervisor_with(tasks: Arc<InMemorySimulationTaskRepository>) -> Arc<dyn SimulationTaskRepository> {
        tasks
    }

    #[tokio::test]
    async fn startup_reclaims_stuck_running_tasks_as_failed() {
        let repo = Arc::new(InMemorySimulationTaskRepository::new());
        let mut stuck = SimulationTask::new_pending(SimulationTaskType::SingleMarketBacktest, "hash-a".into(), 1, "instance-1".into());
        stuck.status = SimulationStatus::Running;
        repo.insert(&stuck).await.unwrap();

        let supervisor = SimulationSupervisor::new("instance-1".into(), supervisor_with(repo.clone())).await.unwrap();
        let _ = supervisor;

        let reloaded = repo.find_by_id(stuck.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, SimulationStatus::Failed);
        assert_eq!(reloaded.error.as_deref(), Some("interrupted"));
    }

    #[tokio::test]
    async fn duplicate_param_hash_against_an_active_task_is_deduplicated() {
        let repo = Arc::new(InMemorySimulationTaskRepository::new());
        let supervisor = SimulationSupervisor::new("instance-1".into(), supervisor_with(repo.clone())).await.unwrap();

        let first = supervisor.submit(SimulationTaskType::MultiMarketBacktest, "hash-b".into(), 3).await.unwrap();
        let second = supervisor.submit(SimulationTaskType::MultiMarketBacktest, "hash-b".into(), 3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancel_request_is_observed_cooperatively() {
        let repo = Arc::new(InMemorySimulationTaskRepository::new());
        let supervisor = SimulationSupervisor::new("instance-1".into(), supervisor_with(repo.clone())).await.unwrap();
        let id = supervisor.submit(SimulationTaskType::SingleMarketBacktest, "hash-c".into(), 5).await.unwrap();
        supervisor.mark_running(id).await.unwrap();

        assert!(!supervisor.is_cancel_requested(id).await.unwrap());
        supervisor.request_cancel(id).await.unwrap();
        assert!(supervisor.is_cancel_requested(id).await.unwrap());

        supervisor.complete(id, serde_json::json!({"marketsProcessed": 2})).await.unwrap();
        let task = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, SimulationStatus::Cancelled);
    }
}
