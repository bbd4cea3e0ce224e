//! Logging setup and phase timing.

mod logging;

pub use logging::{init_tracing, LogFormat, PhaseTimer};
