//! parley-core — shared configuration and clock helpers.
//! All other Parley crates depend on this one.

pub mod config;
pub mod time;

pub use config::{ConfigError, ParleyConfig};
pub use time::{now_secs, Timestamp};
