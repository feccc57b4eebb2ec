//! Upbit KRW spot trading and backtesting engine.
//!
//! `domain` holds pure data types and repository/port traits; `indicators`,
//! `strategies`, `aggregator`, `risk`, and `position_manager` are the
//! decision layer; `backtest` and `live` are the two ways those decisions
//! get driven; `tuner` and `supervisor` are the ambient daily/background
//! jobs; `infrastructure` wires the traits to SQLite and in-memory/mock
//! backends.

pub mod aggregator;
pub mod backtest;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod indicators;
pub mod infrastructure;
pub mod live;
pub mod position_manager;
pub mod risk;
pub mod strategies;
pub mod supervisor;
pub mod tuner;
