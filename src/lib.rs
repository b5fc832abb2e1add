//! tradegate: risk-governed trade execution engine
//!
//! This library provides the core components for:
//! - Pre-trade risk limits and position sizing (fixed, percentage, risk-based, Kelly)
//! - Bracket orders with one-cancels-other legs and trailing stops
//! - Market-wide circuit breaker
//! - Idempotent decision execution with paper/live mode gating
//! - Per-symbol automation loops driven by an external advisor
//! - Durable state in memory or a JSON file
//! - Structured logging and Prometheus metrics

pub mod automation;
pub mod bracket;
pub mod breaker;
pub mod cli;
pub mod config;
pub mod decision;
pub mod error;
pub mod execution;
pub mod feed;
pub mod market;
pub mod portfolio;
pub mod risk;
pub mod store;
pub mod telemetry;
