//! Call admission control.
//!
//! Two small gates consulted inline by the analyzer and the executor:
//! a sliding-window rate limiter protecting external API quotas, and a
//! per-vault cooldown preventing corrective-action storms.

pub mod cooldown;
pub mod rate_limit;

pub use cooldown::CooldownGate;
pub use rate_limit::RateLimiter;
