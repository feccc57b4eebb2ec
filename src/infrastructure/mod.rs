pub mod in_memory;
pub mod mock;
pub mod sqlite;

pub use in_memory::{
    InMemoryCandleRepository, InMemoryHourParamRepository, InMemoryPositionRepository, InMemorySimulationTaskRepository,
    InMemoryTradeRecordRepository, InMemoryTradeStatRepository,
};
pub use mock::MockExchangeAdapter;
pub use sqlite::{
    SqliteCandleRepository, SqliteDatabase, SqliteHourParamRepository, SqlitePositionRepository, SqliteSimulationTaskRepository,
    SqliteTradeRecordRepository, SqliteTradeStatRepository,
};
