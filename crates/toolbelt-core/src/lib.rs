//! # Toolbelt Core
//!
//! Core types, configuration, and secrets for the Toolbelt gateway.
//!
//! This crate provides:
//! - Configuration loading and validation (JSON5 format) with environment overrides
//! - Secret wrappers that never leak into logs
//! - Prompt validation and sanitization
//! - Shared types such as token usage

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod secrets;
pub mod types;
pub mod validation;

pub use config::{Config, ConfigError};
pub use secrets::{ApiKey, scrub_secrets};
pub use types::TokenUsage;
pub use validation::{ValidationError, truncate_on_char_boundary, validate_message_content};

