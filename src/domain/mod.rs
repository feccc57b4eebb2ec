pub mod candle;
pub mod errors;
pub mod hour_param;
pub mod ports;
pub mod position;
pub mod repositories;
pub mod signal;
pub mod simulation_task;
pub mod trade;

pub use candle::{Candle, CandleWindow};
pub use errors::{ConfigError, ExchangeError, PersistenceError, PositionError, RiskDenial, StrategyError};
pub use hour_param::HourParam;
pub use position::{Position, PositionStatus};
pub use signal::{ExitReason, Signal, SignalKind};
pub use simulation_task::{SimulationStatus, SimulationTask, SimulationTaskType};
pub use trade::{OrderSide, TradeRecord, TradeStat};
