//! trackdrop - Automated music discovery and download service
//!
//! Periodically discovers and downloads music for independent users,
//! guided by per-user recommendation sources and per-user schedules,
//! while keeping a consistent on-disk record of settings, history, and
//! pending work.
//!
//! Core subsystems:
//! - [`store`] - durable, concurrency-safe per-user state documents
//! - [`schedule`] - local-time recurrence translation and cron registry
//! - [`monitor`] - background playlist monitor loop
//! - [`download`] - deduplicating, bounded-concurrency download batches
//! - [`cleanup`] - rating-driven removal of auto-downloaded tracks

pub mod app;
pub mod cleanup;
pub mod download;
pub mod library;
pub mod monitor;
pub mod schedule;
pub mod sources;
pub mod store;
pub mod tagger;

pub use app::App;
