//! # hivebus Core
//!
//! Domain types and error definitions for the hivebus multi-agent runtime.
//! This crate has **zero framework dependencies** — it defines the wire
//! shapes and naming rules that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Envelopes and stream events are frozen wire shapes: created once,
//! immutable, append-only on the bus. Everything else (bus backends, the
//! worker loop, the gateway) lives in its own crate and depends inward on
//! this one.

pub mod envelope;
pub mod error;
pub mod event;
pub mod redact;
pub mod topic;

// Re-export key types at crate root for ergonomics
pub use envelope::{Envelope, EnvelopeKind, Recipient, Sender};
pub use error::{BusError, Error, Result, RunnerError, SignalError, ValidationError};
pub use event::StreamEvent;
pub use redact::redact_sensitive;
