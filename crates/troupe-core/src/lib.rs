//! Troupe Core
//!
//! Core types, errors, configuration and I/O abstractions for the Troupe
//! in-process actor runtime.
//!
//! # Overview
//!
//! Troupe runs many isolated actors on a shared pool of workers. Each actor
//! processes one message at a time, in the order its senders issued them,
//! behind a bounded mailbox. This crate holds the pieces every layer shares:
//! identifiers, the error taxonomy, limits, configuration, the executor seam,
//! clock/randomness providers and telemetry hooks. The engine itself lives in
//! `troupe-runtime`.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `MAILBOX_QUOTA_COUNT_MAX`)
//! - Assertions on invariants
//! - No recursion (bounded iteration only)

pub mod actor;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod io;
pub mod metrics;
pub mod telemetry;

pub use actor::{ActorId, ThreadId};
pub use config::{ActorConfig, StageConfig, TroupeConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use executor::{Executor, Task, TaskHandle, TokioExecutor};
pub use io::{
    IoContext, ManualClock, RngProvider, StdRngProvider, TimeProvider, WallClockTime,
};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
