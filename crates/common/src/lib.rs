//! Common utilities and types shared across the IAP proxy workspace.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (size limits, unverified parsing, time-window checks)
pub mod jwt;
