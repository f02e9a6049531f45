//! Lumina streams chat turns from LLM backends into a shared conversation store.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the turn pipeline: history projection, the throttled
//!   stream consumer, the conversation store seam and the orchestrator that
//!   ties them together with title, speech and suggestion follow-ups.
//! - [`api`] defines the provider-neutral request model and the
//!   OpenAI-compatible wire payloads.
//! - [`cli`] is the `lumina` binary's argument parsing and commands.
//! - [`utils`] carries logging setup and test fixtures.
//!
//! The binary entrypoint (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
