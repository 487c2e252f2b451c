//! Core components, types, and utilities for the relay-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Model directives and user-facing notices.
//! - Common types and result handling.

pub mod config;
pub mod prompts;
pub mod types;
