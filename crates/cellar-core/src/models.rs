//! Domain models for Cellar.
//!
//! These are the core types shared across all crates.

pub mod plan;
pub mod store;
pub mod subscription;
pub mod tenant;
pub mod usage;
pub mod webhook;
