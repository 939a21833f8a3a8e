//! Observability module for the IAP proxy.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
