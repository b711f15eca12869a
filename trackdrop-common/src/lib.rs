//! # TrackDrop Common Library
//!
//! Shared code for the TrackDrop service including:
//! - Domain models (user state, track identity, history records)
//! - Configuration loading
//! - Error types
//! - Text normalization for track matching
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod model;
pub mod text;
pub mod time;

pub use error::{Error, Result};
