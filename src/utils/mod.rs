//! Utility helpers.

pub mod amount;
pub mod logging;
