//! Vaultguard Library
//!
//! Exposes the monitor pipeline for use by the binaries and tests.

pub mod analyzer;
pub mod bootstrap;
pub mod chain;
pub mod config;
pub mod executor;
pub mod health;
pub mod llm;
pub mod models;
pub mod monitor;
pub mod strategy;
pub mod throttle;
