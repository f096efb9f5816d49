//! linkstats - click statistics ingestion for a short-link service
//!
//! Consumes click events from a Redis Stream consumer group and turns them
//! into aggregated statistics (pv / uv / uip and dimensional rollups) with
//! at-most-once effects under redelivery, crashes and restarts.
//!
//! # Architecture
//! - `stream`: event log client (Redis Stream or in-memory) and recovery cursor
//! - `idempotency`: per-message processing markers
//! - `counter`: HyperLogLog unique counting with per-event deltas
//! - `lock`: distributed read lock around link group changes
//! - `stats`: statistics writer and link aggregate update
//! - `consumer`: consumer loops, bounded worker pool, message handler
//! - `tasks`: PEL recovery and stream retention
//! - `storage`: sea-orm storage and schema
//! - `config` / `system` / `runtime`: configuration, logging, lifecycle

pub mod cache;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod counter;
pub mod errors;
pub mod idempotency;
pub mod keys;
pub mod lock;
pub mod runtime;
pub mod services;
pub mod stats;
pub mod storage;
pub mod stream;
pub mod system;
pub mod tasks;
