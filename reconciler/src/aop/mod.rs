//! Tune points: named hooks fired at pipeline and task lifecycle boundaries.
//!
//! A [`TuneEngine`] maps `scope → trigger → chain`. Chains run every hook in
//! order and never let one hook's failure block the others or the phase that
//! fired them.

mod chain;
mod engine;
pub mod plugins;
mod types;

pub use chain::{ChainOutcome, TuneChain, TunePoint};
pub use engine::{TuneConfig, TuneEngine, TuneEngineBuilder, TuneGroup};
pub use types::{TuneContext, TuneScope, TuneTrigger};
