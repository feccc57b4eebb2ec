//! SQLite-backed persistence. Schema is created on connect with
//! `CREATE TABLE IF NOT EXISTS` plus best-effort `ALTER TABLE` migrations
//! that ignore "duplicate column" errors, matching the teacher's
//! `Database::init` idiom.

use crate::domain::errors::PersistenceError;
use crate::domain::repositories::{
    CandleRepository, HourParamRepository, HourlyAggregate, PositionRepository, SimulationTaskRepository, TradeRecordRepository,
    TradeStatRepository,
};
use crate::domain::{
    Candle, ExitReason, HourParam, OrderSide, Position, PositionStatus, SimulationStatus, SimulationTask, SimulationTaskType, TradeRecord,
    TradeStat,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::warn;

#[derive(Clone)]
pub struct SqliteDatabase {
    pub pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                market TEXT NOT NULL,
                unit_minutes INTEGER NOT NULL,
                candle_at_kst TEXT NOT NULL,
                candle_at_utc TEXT NOT NULL,
                opening_price TEXT NOT NULL,
                high_price TEXT NOT NULL,
                low_price TEXT NOT NULL,
                trade_price TEXT NOT NULL,
                candle_acc_trade_volume TEXT NOT NULL,
                candle_acc_trade_price TEXT NOT NULL,
                PRIMARY KEY (market, unit_minutes, candle_at_kst)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                market TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_phase INTEGER NOT NULL,
                avg_entry_price TEXT NOT NULL,
                total_invested TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss_price TEXT NOT NULL,
                highest_since_entry TEXT NOT NULL,
                trailing_stop_price TEXT,
                strategy_name TEXT NOT NULL,
                entry_timestamps TEXT NOT NULL,
                first_entry_at TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                unrealized_pnl TEXT NOT NULL,
                final_exit_time TEXT,
                exit_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_user_market_status ON positions (user_id, market, status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                market TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                volume TEXT NOT NULL,
                fee TEXT NOT NULL,
                krw_balance_after TEXT NOT NULL,
                coin_balance_after TEXT NOT NULL,
                total_asset_after TEXT NOT NULL,
                running_profit_rate TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                exit_reason TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_stats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                market TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                profit_rate TEXT NOT NULL,
                entry_z_score REAL NOT NULL,
                entry_execution_strength REAL NOT NULL,
                entry_hour INTEGER NOT NULL,
                success INTEGER NOT NULL,
                exit_reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hour_params (
                hour INTEGER PRIMARY KEY,
                min_execution_strength REAL NOT NULL,
                min_z_score REAL NOT NULL,
                volume_multiplier REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                avg_profit_rate REAL NOT NULL,
                enabled INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS simulation_tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                task_type TEXT NOT NULL,
                param_hash TEXT NOT NULL,
                markets_processed INTEGER NOT NULL,
                total_markets INTEGER NOT NULL,
                combinations_tested INTEGER NOT NULL,
                total_combinations INTEGER NOT NULL,
                result_payload TEXT,
                error TEXT,
                cancel_requested INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                owner_instance_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Best-effort migrations for columns added after the initial release;
        // sqlite has no "ADD COLUMN IF NOT EXISTS", so duplicate-column errors
        // from an already-migrated database are swallowed.
        if let Err(e) = sqlx::query("ALTER TABLE positions ADD COLUMN trailing_stop_price TEXT").execute(&self.pool).await {
            warn!("position migration skipped (likely already applied): {e}");
        }

        Ok(())
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, PersistenceError> {
    Decimal::from_str(raw).map_err(|e| PersistenceError::Backend(format!("invalid decimal column value {raw}: {e}")))
}

fn status_to_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Pending => "PENDING",
        PositionStatus::Entering => "ENTERING",
        PositionStatus::Active => "ACTIVE",
        PositionStatus::Exiting => "EXITING",
        PositionStatus::Closed => "CLOSED",
    }
}

fn status_from_str(raw: &str) -> Result<PositionStatus, PersistenceError> {
    match raw {
        "PENDING" => Ok(PositionStatus::Pending),
        "ENTERING" => Ok(PositionStatus::Entering),
        "ACTIVE" => Ok(PositionStatus::Active),
        "EXITING" => Ok(PositionStatus::Exiting),
        "CLOSED" => Ok(PositionStatus::Closed),
        other => Err(PersistenceError::Backend(format!("unknown position status {other}"))),
    }
}

fn exit_reason_to_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::StopLossFixed => "STOP_LOSS_FIXED",
        ExitReason::StopLossAtr => "STOP_LOSS_ATR",
        ExitReason::TrailingStop => "TRAILING_STOP",
        ExitReason::TakeProfit => "TAKE_PROFIT",
        ExitReason::SignalInvalid => "SIGNAL_INVALID",
        ExitReason::FakeRebound => "FAKE_REBOUND",
        ExitReason::VolumeDrop => "VOLUME_DROP",
        ExitReason::Overheated => "OVERHEATED",
        ExitReason::Timeout => "TIMEOUT",
        ExitReason::EmergencyClose => "EMERGENCY_CLOSE",
    }
}

fn exit_reason_from_str(raw: &str) -> Result<ExitReason, PersistenceError> {
    match raw {
        "STOP_LOSS_FIXED" => Ok(ExitReason::StopLossFixed),
        "STOP_LOSS_ATR" => Ok(ExitReason::StopLossAtr),
        "TRAILING_STOP" => Ok(ExitReason::TrailingStop),
        "TAKE_PROFIT" => Ok(ExitReason::TakeProfit),
        "SIGNAL_INVALID" => Ok(ExitReason::SignalInvalid),
        "FAKE_REBOUND" => Ok(ExitReason::FakeRebound),
        "VOLUME_DROP" => Ok(ExitReason::VolumeDrop),
        "OVERHEATED" => Ok(ExitReason::Overheated),
        "TIMEOUT" => Ok(ExitReason::Timeout),
        "EMERGENCY_CLOSE" => Ok(ExitReason::EmergencyClose),
        other => Err(PersistenceError::Backend(format!("unknown exit reason {other}"))),
    }
}

pub struct SqliteCandleRepository {
    db: SqliteDatabase,
}

impl SqliteCandleRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    pub async fn insert(&self, candle: &Candle) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT OR REPLACE INTO candles (market, unit_minutes, candle_at_kst, candle_at_utc, opening_price, high_price, low_price, trade_price, candle_acc_trade_volume, candle_acc_trade_price) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&candle.market)
        .bind(candle.unit_minutes)
        .bind(candle.candle_at_kst.to_rfc3339())
        .bind(candle.candle_at_utc.to_rfc3339())
        .bind(candle.opening_price.to_string())
        .bind(candle.high_price.to_string())
        .bind(candle.low_price.to_string())
        .bind(candle.trade_price.to_string())
        .bind(candle.candle_acc_trade_volume.to_string())
        .bind(candle.candle_acc_trade_price.to_string())
        .execute(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn get_range(&self, market: &str, unit_minutes: u32, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Candle>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM candles WHERE market = ? AND unit_minutes = ? AND candle_at_kst >= ? AND candle_at_kst <= ? ORDER BY candle_at_kst ASC",
        )
        .bind(market)
        .bind(unit_minutes)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let kst: String = row.try_get("candle_at_kst").map_err(|e| PersistenceError::Backend(e.to_string()))?;
                let utc: String = row.try_get("candle_at_utc").map_err(|e| PersistenceError::Backend(e.to_string()))?;
                Ok(Candle {
                    market: row.try_get("market").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    candle_at_kst: DateTime::parse_from_rfc3339(&kst).map_err(|e| PersistenceError::Backend(e.to_string()))?.with_timezone(&Utc),
                    candle_at_utc: DateTime::parse_from_rfc3339(&utc).map_err(|e| PersistenceError::Backend(e.to_string()))?.with_timezone(&Utc),
                    opening_price: parse_decimal(&row.try_get::<String, _>("opening_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    high_price: parse_decimal(&row.try_get::<String, _>("high_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    low_price: parse_decimal(&row.try_get::<String, _>("low_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    trade_price: parse_decimal(&row.try_get::<String, _>("trade_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    candle_acc_trade_volume: parse_decimal(
                        &row.try_get::<String, _>("candle_acc_trade_volume").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    candle_acc_trade_price: parse_decimal(
                        &row.try_get::<String, _>("candle_acc_trade_price").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    unit_minutes: row.try_get::<i64, _>("unit_minutes").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
                })
            })
            .collect()
    }

    async fn distinct_markets(&self) -> Result<Vec<String>, PersistenceError> {
        let rows = sqlx::query("SELECT DISTINCT market FROM candles ORDER BY market ASC")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| row.try_get("market").map_err(|e| PersistenceError::Backend(e.to_string())))
            .collect()
    }
}

pub struct SqlitePositionRepository {
    db: SqliteDatabase,
}

impl SqlitePositionRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position, PersistenceError> {
        let entry_timestamps_raw: String = row.try_get("entry_timestamps").map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let entry_timestamps = entry_timestamps_raw
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).map_err(|e| PersistenceError::Backend(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let trailing_stop_price: Option<String> = row.try_get("trailing_stop_price").ok();
        let final_exit_time: Option<String> = row.try_get("final_exit_time").ok().flatten();
        let exit_reason: Option<String> = row.try_get("exit_reason").ok().flatten();

        Ok(Position {
            user_id: row.try_get("user_id").map_err(|e| PersistenceError::Backend(e.to_string()))?,
            market: row.try_get("market").map_err(|e| PersistenceError::Backend(e.to_string()))?,
            status: status_from_str(&row.try_get::<String, _>("status").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            entry_phase: row.try_get::<i64, _>("entry_phase").map_err(|e| PersistenceError::Backend(e.to_string()))? as u8,
            avg_entry_price: parse_decimal(&row.try_get::<String, _>("avg_entry_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            total_invested: parse_decimal(&row.try_get::<String, _>("total_invested").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            quantity: parse_decimal(&row.try_get::<String, _>("quantity").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            stop_loss_price: parse_decimal(&row.try_get::<String, _>("stop_loss_price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            highest_since_entry: parse_decimal(
                &row.try_get::<String, _>("highest_since_entry").map_err(|e| PersistenceError::Backend(e.to_string()))?,
            )?,
            trailing_stop_price: trailing_stop_price.map(|s| parse_decimal(&s)).transpose()?,
            strategy_name: row.try_get("strategy_name").map_err(|e| PersistenceError::Backend(e.to_string()))?,
            entry_timestamps,
            realized_pnl: parse_decimal(&row.try_get::<String, _>("realized_pnl").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            unrealized_pnl: parse_decimal(&row.try_get::<String, _>("unrealized_pnl").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
            final_exit_time: final_exit_time
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).map_err(|e| PersistenceError::Backend(e.to_string())))
                .transpose()?,
            exit_reason: exit_reason.map(|s| exit_reason_from_str(&s)).transpose()?,
        })
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn save(&self, position: &Position) -> Result<(), PersistenceError> {
        let entry_timestamps = position.entry_timestamps.iter().map(|t| t.to_rfc3339()).collect::<Vec<_>>().join(",");
        let first_entry_at = position
            .entry_timestamps
            .first()
            .copied()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        // Mirrors the in-memory repository: a non-CLOSED row for this
        // (user, market) is updated in place; anything else (including every
        // CLOSED transition) becomes a new history row, so `recent_closed`
        // keeps every past trade instead of only the latest one.
        let existing_open_id: Option<i64> = sqlx::query("SELECT id FROM positions WHERE user_id = ? AND market = ? AND status != 'CLOSED'")
            .bind(&position.user_id)
            .bind(&position.market)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?
            .map(|row| row.try_get::<i64, _>("id"))
            .transpose()
            .map_err(|e: sqlx::Error| PersistenceError::Backend(e.to_string()))?;

        if let Some(id) = existing_open_id {
            sqlx::query(
                r#"UPDATE positions SET
                     status = ?, entry_phase = ?, avg_entry_price = ?, total_invested = ?, quantity = ?,
                     stop_loss_price = ?, highest_since_entry = ?, trailing_stop_price = ?, entry_timestamps = ?,
                     realized_pnl = ?, unrealized_pnl = ?, final_exit_time = ?, exit_reason = ?
                   WHERE id = ?"#,
            )
            .bind(status_to_str(position.status))
            .bind(position.entry_phase as i64)
            .bind(position.avg_entry_price.to_string())
            .bind(position.total_invested.to_string())
            .bind(position.quantity.to_string())
            .bind(position.stop_loss_price.to_string())
            .bind(position.highest_since_entry.to_string())
            .bind(position.trailing_stop_price.map(|p| p.to_string()))
            .bind(entry_timestamps)
            .bind(position.realized_pnl.to_string())
            .bind(position.unrealized_pnl.to_string())
            .bind(position.final_exit_time.map(|t| t.to_rfc3339()))
            .bind(position.exit_reason.map(exit_reason_to_str))
            .bind(id)
            .execute(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        } else {
            sqlx::query(
                r#"INSERT INTO positions (user_id, market, status, entry_phase, avg_entry_price, total_invested, quantity, stop_loss_price, highest_since_entry, trailing_stop_price, strategy_name, entry_timestamps, first_entry_at, realized_pnl, unrealized_pnl, final_exit_time, exit_reason)
                   VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
            )
            .bind(&position.user_id)
            .bind(&position.market)
            .bind(status_to_str(position.status))
            .bind(position.entry_phase as i64)
            .bind(position.avg_entry_price.to_string())
            .bind(position.total_invested.to_string())
            .bind(position.quantity.to_string())
            .bind(position.stop_loss_price.to_string())
            .bind(position.highest_since_entry.to_string())
            .bind(position.trailing_stop_price.map(|p| p.to_string()))
            .bind(&position.strategy_name)
            .bind(entry_timestamps)
            .bind(first_entry_at)
            .bind(position.realized_pnl.to_string())
            .bind(position.unrealized_pnl.to_string())
            .bind(position.final_exit_time.map(|t| t.to_rfc3339()))
            .bind(position.exit_reason.map(exit_reason_to_str))
            .execute(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn find_active(&self, user_id: &str, market: &str) -> Result<Option<Position>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM positions WHERE user_id = ? AND market = ? AND status != 'CLOSED'")
            .bind(user_id)
            .bind(market)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        row.as_ref().map(Self::row_to_position).transpose()
    }

    async fn count_active(&self, user_id: &str) -> Result<usize, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM positions WHERE user_id = ? AND status != 'CLOSED'")
            .bind(user_id)
            .fetch_one(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(row.try_get::<i64, _>("cnt").map_err(|e| PersistenceError::Backend(e.to_string()))? as usize)
    }

    async fn todays_realized_loss_sum(&self, user_id: &str, now: DateTime<Utc>) -> Result<Decimal, PersistenceError> {
        let day_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc().to_rfc3339();
        let rows = sqlx::query(
            "SELECT realized_pnl FROM positions WHERE user_id = ? AND status = 'CLOSED' AND final_exit_time >= ? AND realized_pnl < '0'",
        )
        .bind(user_id)
        .bind(day_start)
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let mut sum = Decimal::ZERO;
        for row in rows {
            let raw: String = row.try_get("realized_pnl").map_err(|e| PersistenceError::Backend(e.to_string()))?;
            sum += parse_decimal(&raw)?;
        }
        Ok(sum)
    }

    async fn recent_closed(&self, user_id: &str, limit: usize) -> Result<Vec<Position>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE user_id = ? AND status = 'CLOSED' ORDER BY final_exit_time DESC LIMIT ?")
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn find_stale_non_closed(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM positions WHERE status != 'CLOSED' AND first_entry_at < ?")
            .bind(older_than.to_rfc3339())
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.iter().map(Self::row_to_position).collect()
    }
}

pub struct SqliteTradeRecordRepository {
    db: SqliteDatabase,
}

impl SqliteTradeRecordRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradeRecordRepository for SqliteTradeRecordRepository {
    async fn save(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO trade_records (id, user_id, market, timestamp, side, price, volume, fee, krw_balance_after, coin_balance_after, total_asset_after, running_profit_rate, strategy_name, exit_reason)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.market)
        .bind(record.timestamp.to_rfc3339())
        .bind(if record.side == OrderSide::Buy { "BUY" } else { "SELL" })
        .bind(record.price.to_string())
        .bind(record.volume.to_string())
        .bind(record.fee.to_string())
        .bind(record.krw_balance_after.to_string())
        .bind(record.coin_balance_after.to_string())
        .bind(record.total_asset_after.to_string())
        .bind(record.running_profit_rate.to_string())
        .bind(&record.strategy_name)
        .bind(record.exit_reason.map(exit_reason_to_str))
        .execute(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<TradeRecord>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM trade_records WHERE user_id = ? ORDER BY timestamp DESC LIMIT ?")
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let side_raw: String = row.try_get("side").map_err(|e| PersistenceError::Backend(e.to_string()))?;
                let exit_reason: Option<String> = row.try_get("exit_reason").ok().flatten();
                let ts: String = row.try_get("timestamp").map_err(|e| PersistenceError::Backend(e.to_string()))?;
                Ok(TradeRecord {
                    id: row.try_get("id").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    user_id: row.try_get("user_id").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    market: row.try_get("market").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    timestamp: DateTime::parse_from_rfc3339(&ts).map_err(|e| PersistenceError::Backend(e.to_string()))?.with_timezone(&Utc),
                    side: if side_raw == "BUY" { OrderSide::Buy } else { OrderSide::Sell },
                    price: parse_decimal(&row.try_get::<String, _>("price").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    volume: parse_decimal(&row.try_get::<String, _>("volume").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    fee: parse_decimal(&row.try_get::<String, _>("fee").map_err(|e| PersistenceError::Backend(e.to_string()))?)?,
                    krw_balance_after: parse_decimal(
                        &row.try_get::<String, _>("krw_balance_after").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    coin_balance_after: parse_decimal(
                        &row.try_get::<String, _>("coin_balance_after").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    total_asset_after: parse_decimal(
                        &row.try_get::<String, _>("total_asset_after").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    running_profit_rate: parse_decimal(
                        &row.try_get::<String, _>("running_profit_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    )?,
                    strategy_name: row.try_get("strategy_name").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    exit_reason: exit_reason.map(|s| exit_reason_from_str(&s)).transpose()?,
                })
            })
            .collect()
    }
}

pub struct SqliteTradeStatRepository {
    db: SqliteDatabase,
}

impl SqliteTradeStatRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradeStatRepository for SqliteTradeStatRepository {
    async fn save(&self, stat: &TradeStat) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO trade_stats (id, user_id, market, entry_time, exit_time, entry_price, exit_price, profit_rate, entry_z_score, entry_execution_strength, entry_hour, success, exit_reason)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(&stat.id)
        .bind(&stat.user_id)
        .bind(&stat.market)
        .bind(stat.entry_time.to_rfc3339())
        .bind(stat.exit_time.to_rfc3339())
        .bind(stat.entry_price.to_string())
        .bind(stat.exit_price.to_string())
        .bind(stat.profit_rate.to_string())
        .bind(stat.entry_z_score)
        .bind(stat.entry_execution_strength)
        .bind(stat.entry_hour as i64)
        .bind(stat.success as i64)
        .bind(exit_reason_to_str(stat.exit_reason))
        .execute(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn hourly_aggregate(&self, from: DateTime<Utc>, to: DateTime<Utc>, min_samples: u32) -> Result<Vec<HourlyAggregate>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT entry_hour, COUNT(*) as cnt, AVG(success) as win_rate, AVG(profit_rate) as avg_profit_rate FROM trade_stats WHERE entry_time >= ? AND entry_time <= ? GROUP BY entry_hour HAVING COUNT(*) >= ?",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .bind(min_samples as i64)
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(HourlyAggregate {
                    hour: row.try_get::<i64, _>("entry_hour").map_err(|e| PersistenceError::Backend(e.to_string()))? as u8,
                    sample_count: row.try_get::<i64, _>("cnt").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
                    win_rate: row.try_get("win_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    avg_profit_rate: row.try_get("avg_profit_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                })
            })
            .collect()
    }
}

pub struct SqliteHourParamRepository {
    db: SqliteDatabase,
}

impl SqliteHourParamRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HourParamRepository for SqliteHourParamRepository {
    async fn upsert(&self, param: &HourParam) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO hour_params (hour, min_execution_strength, min_z_score, volume_multiplier, sample_count, win_rate, avg_profit_rate, enabled)
               VALUES (?,?,?,?,?,?,?,?)
               ON CONFLICT(hour) DO UPDATE SET
                 min_execution_strength = excluded.min_execution_strength,
                 min_z_score = excluded.min_z_score,
                 volume_multiplier = excluded.volume_multiplier,
                 sample_count = excluded.sample_count,
                 win_rate = excluded.win_rate,
                 avg_profit_rate = excluded.avg_profit_rate,
                 enabled = excluded.enabled
            "#,
        )
        .bind(param.hour as i64)
        .bind(param.min_execution_strength)
        .bind(param.min_z_score)
        .bind(param.volume_multiplier)
        .bind(param.sample_count as i64)
        .bind(param.win_rate)
        .bind(param.avg_profit_rate)
        .bind(param.enabled as i64)
        .execute(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, hour: u8) -> Result<Option<HourParam>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM hour_params WHERE hour = ?")
            .bind(hour as i64)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        row.map(|row| {
            Ok(HourParam {
                hour: row.try_get::<i64, _>("hour").map_err(|e| PersistenceError::Backend(e.to_string()))? as u8,
                min_execution_strength: row.try_get("min_execution_strength").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                min_z_score: row.try_get("min_z_score").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                volume_multiplier: row.try_get("volume_multiplier").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                sample_count: row.try_get::<i64, _>("sample_count").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
                win_rate: row.try_get("win_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                avg_profit_rate: row.try_get("avg_profit_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                enabled: row.try_get::<i64, _>("enabled").map_err(|e| PersistenceError::Backend(e.to_string()))? != 0,
            })
        })
        .transpose()
    }

    async fn all(&self) -> Result<Vec<HourParam>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM hour_params ORDER BY hour ASC")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(HourParam {
                    hour: row.try_get::<i64, _>("hour").map_err(|e| PersistenceError::Backend(e.to_string()))? as u8,
                    min_execution_strength: row.try_get("min_execution_strength").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    min_z_score: row.try_get("min_z_score").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    volume_multiplier: row.try_get("volume_multiplier").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    sample_count: row.try_get::<i64, _>("sample_count").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
                    win_rate: row.try_get("win_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    avg_profit_rate: row.try_get("avg_profit_rate").map_err(|e| PersistenceError::Backend(e.to_string()))?,
                    enabled: row.try_get::<i64, _>("enabled").map_err(|e| PersistenceError::Backend(e.to_string()))? != 0,
                })
            })
            .collect()
    }
}

pub struct SqliteSimulationTaskRepository {
    db: SqliteDatabase,
}

impl SqliteSimulationTaskRepository {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<SimulationTask, PersistenceError> {
        let status_raw: String = row.try_get("status").map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let task_type_raw: String = row.try_get("task_type").map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let result_payload: Option<String> = row.try_get("result_payload").ok().flatten();
        let created_at: String = row.try_get("created_at").map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| PersistenceError::Backend(e.to_string()))?;

        Ok(SimulationTask {
            id: uuid::Uuid::parse_str(&row.try_get::<String, _>("id").map_err(|e| PersistenceError::Backend(e.to_string()))?)
                .map_err(|e| PersistenceError::Backend(e.to_string()))?,
            status: match status_raw.as_str() {
                "PENDING" => SimulationStatus::Pending,
                "RUNNING" => SimulationStatus::Running,
                "COMPLETED" => SimulationStatus::Completed,
                "FAILED" => SimulationStatus::Failed,
                "CANCELLED" => SimulationStatus::Cancelled,
                other => return Err(PersistenceError::Backend(format!("unknown simulation status {other}"))),
            },
            task_type: match task_type_raw.as_str() {
                "SINGLE_MARKET_BACKTEST" => SimulationTaskType::SingleMarketBacktest,
                "MULTI_MARKET_BACKTEST" => SimulationTaskType::MultiMarketBacktest,
                "PARAMETER_SWEEP" => SimulationTaskType::ParameterSweep,
                other => return Err(PersistenceError::Backend(format!("unknown task type {other}"))),
            },
            param_hash: row.try_get("param_hash").map_err(|e| PersistenceError::Backend(e.to_string()))?,
            markets_processed: row.try_get::<i64, _>("markets_processed").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
            total_markets: row.try_get::<i64, _>("total_markets").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
            combinations_tested: row.try_get::<i64, _>("combinations_tested").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
            total_combinations: row.try_get::<i64, _>("total_combinations").map_err(|e| PersistenceError::Backend(e.to_string()))? as u32,
            result_payload: result_payload.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.try_get("error").ok().flatten(),
            cancel_requested: row.try_get::<i64, _>("cancel_requested").map_err(|e| PersistenceError::Backend(e.to_string()))? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at).map_err(|e| PersistenceError::Backend(e.to_string()))?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at).map_err(|e| PersistenceError::Backend(e.to_string()))?.with_timezone(&Utc),
            owner_instance_id: row.try_get("owner_instance_id").map_err(|e| PersistenceError::Backend(e.to_string()))?,
        })
    }

    fn task_type_str(task_type: SimulationTaskType) -> &'static str {
        match task_type {
            SimulationTaskType::SingleMarketBacktest => "SINGLE_MARKET_BACKTEST",
            SimulationTaskType::MultiMarketBacktest => "MULTI_MARKET_BACKTEST",
            SimulationTaskType::ParameterSweep => "PARAMETER_SWEEP",
        }
    }

    fn status_str(status: SimulationStatus) -> &'static str {
        match status {
            SimulationStatus::Pending => "PENDING",
            SimulationStatus::Running => "RUNNING",
            SimulationStatus::Completed => "COMPLETED",
            SimulationStatus::Failed => "FAILED",
            SimulationStatus::Cancelled => "CANCELLED",
        }
    }

    async fn upsert(&self, task: &SimulationTask) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO simulation_tasks (id, status, task_type, param_hash, markets_processed, total_markets, combinations_tested, total_combinations, result_payload, error, cancel_requested, created_at, updated_at, owner_instance_id)
               VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 markets_processed = excluded.markets_processed,
                 combinations_tested = excluded.combinations_tested,
                 result_payload = excluded.result_payload,
                 error = excluded.error,
                 cancel_requested = excluded.cancel_requested,
                 updated_at = excluded.updated_at
            "#,
        )
        .bind(task.id.to_string())
        .bind(Self::status_str(task.status))
        .bind(Self::task_type_str(task.task_type))
        .bind(&task.param_hash)
        .bind(task.markets_processed as i64)
        .bind(task.total_markets as i64)
        .bind(task.combinations_tested as i64)
        .bind(task.total_combinations as i64)
        .bind(task.result_payload.as_ref().map(|v| v.to_string()))
        .bind(&task.error)
        .bind(task.cancel_requested as i64)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(&task.owner_instance_id)
        .execute(&self.db.pool)
        .await
        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SimulationTaskRepository for SqliteSimulationTaskRepository {
    async fn insert(&self, task: &SimulationTask) -> Result<(), PersistenceError> {
        self.upsert(task).await
    }

    async fn update(&self, task: &SimulationTask) -> Result<(), PersistenceError> {
        self.upsert(task).await
    }

    async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<SimulationTask>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM simulation_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_active_by_param_hash(&self, param_hash: &str) -> Result<Option<SimulationTask>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM simulation_tasks WHERE param_hash = ? AND status IN ('PENDING', 'RUNNING') LIMIT 1")
            .bind(param_hash)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_stuck_running(&self, owner_instance_id: &str) -> Result<Vec<SimulationTask>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM simulation_tasks WHERE owner_instance_id = ? AND status = 'RUNNING'")
            .bind(owner_instance_id)
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        rows.iter().map(Self::row_to_task).collect()
    }
}
