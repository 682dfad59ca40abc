//! Core types for chatwarden - identity and configuration
//!
//! This crate holds the pieces every other chatwarden crate depends on:
//! - `Identity` - stable key for a conversing party (player, console, ...)
//! - `AppConfig` - layered configuration (defaults → TOML file → env → overrides)
//!
//! Nothing in here talks to the network or to the host process. The host
//! loads an `AppConfig`, hands it to the agent crate, and reloads it on
//! demand; the config snapshot itself is immutable once built.

pub mod config;
pub mod identity;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, ProviderKind};
pub use identity::Identity;
