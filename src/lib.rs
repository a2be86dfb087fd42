//! # Speech Engine
//!
//! A speech interaction service: session-scoped speech-to-text and text-to-speech through
//! pluggable providers, voice biometric enrollment and authentication, and an HTTP API
//! over all of it.
//!
//! ## Module Map:
//! - **audio**: WAV validation, conversion, normalization, chunking
//! - **providers**: TTS/STT traits, backends, rate limiting and the retrying gateway
//! - **biometrics**: voice embeddings, similarity, enrollment and authentication
//! - **session**: session model and the expiry-aware session store
//! - **storage**: repository traits with in-memory and sled backends
//! - **orchestrator**: the engine façade the handlers call
//! - **context** / **tasks**: request deadlines, cancellation and background jobs
//! - **config**, **state**, **error**, **health**, **middleware**, **handlers**: the service shell

pub mod audio;
pub mod biometrics;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod orchestrator;
pub mod providers;
pub mod session;
pub mod state;
pub mod storage;
pub mod tasks;

#[cfg(test)]
pub mod testing;
