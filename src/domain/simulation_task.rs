use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationTaskType {
    SingleMarketBacktest,
    MultiMarketBacktest,
    ParameterSweep,
}

/// Long-running job record (spec §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationTask {
    pub id: uuid::Uuid,
    pub status: SimulationStatus,
    pub task_type: SimulationTaskType,
    pub param_hash: String,
    pub markets_processed: u32,
    pub total_markets: u32,
    pub combinations_tested: u32,
    pub total_combinations: u32,
    pub result_payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_instance_id: String,
}

impl SimulationTask {
    pub fn new_pending(
        task_type: SimulationTaskType,
        param_hash: String,
        total_markets: u32,
        owner_instance_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            status: SimulationStatus::Pending,
            task_type,
            param_hash,
            markets_processed: 0,
            total_markets,
            combinations_tested: 0,
            total_combinations: 0,
            result_payload: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            owner_instance_id,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SimulationStatus::Pending | SimulationStatus::Running)
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.total_markets > 0 {
            self.markets_processed as f64 / self.total_markets as f64
        } else if self.total_combinations > 0 {
            self.combinations_tested as f64 / self.total_combinations as f64
        } else {
            0.0
        }
    }
}
