//! Shared error types.

pub mod error;
