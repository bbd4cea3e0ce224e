//! Cooperative cancellation for task scopes and pipeline exit.

mod token;

pub use token::CancellationToken;
