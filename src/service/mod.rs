//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services used by the relay-bot:
//! - Chat services (Discord, Slack)
//! - LLM services (Gemini through the OpenAI-compatible API)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod llm;
