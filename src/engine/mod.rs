//! Execution engine for rabbitsync
//!
//! The engine orchestrates:
//! 1. Diffing - Compare each catalog user with the live broker
//! 2. Executing - Converge users one at a time after confirmation

pub mod differ;
pub mod executor;

pub use executor::{ExecuteOptions, execute};
