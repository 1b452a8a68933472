//! Cooperative cancellation.
//!
//! Every task owns a [`CancellationToken`]. External callers set it through
//! the registry; the pipeline polls it at checkpoint boundaries and never
//! clears it.

mod token;

pub use token::CancellationToken;
