//! Updatable Core
//!
//! This crate provides a generation-versioned, pull-based async observable
//! primitive for coordinating state changes across concurrently running
//! consumers. It implements:
//!
//! - Mutable sources (variables, constants, heartbeats)
//! - Lazily computed, single-flight derived values
//! - Source-of-sources flattening
//! - Optimistic local patches over a derived value
//!
//! # Architecture
//!
//! The crate is organized into a few modules:
//!
//! - `reactive`: the `Updatable` contract and every component built on it
//! - `error`: the error carried inside updates
//! - `config`: knobs shared by derived components
//!
//! Every update is tagged with a [`Generation`](reactive::Generation) drawn
//! from one process-wide counter, so updates from unrelated sources can be
//! ordered against each other. Consumers pull: nothing is computed until
//! someone awaits a value.
//!
//! # Example
//!
//! ```rust,ignore
//! use updatable_core::reactive::{ComputedVariable, UpdatableExt, Variable};
//!
//! // Create a variable
//! let count = Variable::new(5);
//!
//! // Derive from it
//! let doubled = ComputedVariable::transformed(&count, |n| async move { Ok(n * 2) });
//! assert_eq!(doubled.value().await?, 10);
//!
//! // Update the variable; the next read recomputes
//! count.assign(6);
//! assert_eq!(doubled.value().await?, 12);
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::ComputeConfig;
pub use error::{Result, UpdateError};
