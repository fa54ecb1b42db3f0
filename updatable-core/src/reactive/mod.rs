//! Reactive Primitives
//!
//! This module implements the updatable system: sources, derived values and
//! the contract that ties them together.
//!
//! # Concepts
//!
//! ## Generations
//!
//! A Generation is a process-wide, strictly increasing version number. Every
//! update carries the generation that produced it, and a component's
//! generation never goes backwards. Derived values are tagged with the newest
//! generation among the sources they were computed from.
//!
//! ## Sources
//!
//! A Variable holds mutable state; each write takes a fresh generation and
//! wakes everyone waiting for something newer. A Constant holds one update
//! forever. Updates is a value-less heartbeat.
//!
//! ## Derived Values
//!
//! A ComputedVariable recomputes from its sources on demand. A
//! FlattenedVariable reads through a source whose value is another
//! updatable. A PatchableVariable accepts local optimistic patches layered
//! over a derived value.
//!
//! # Implementation Notes
//!
//! Consumers pull. `notify(after, awaiter)` registers a one-shot callback
//! for the first update newer than `after`; the async helpers in
//! [`UpdatableExt`] wrap it in a future. Derived values hold only weak
//! references to their sources and spawn their computations on Tokio.
//!
//! This approach (sometimes called "pull-based" or "demand-driven"
//! reactivity) never computes anything nobody asked for.

mod any;
mod computed;
mod constant;
mod engine;
mod flattened;
mod generation;
mod id;
mod patchable;
mod stream;
mod updatable;
mod update;
mod updates;
mod variable;
mod waiters;

pub use any::AnyUpdatable;
pub use computed::ComputedVariable;
pub use constant::Constant;
pub use flattened::FlattenedVariable;
pub use generation::Generation;
pub use id::UpdatableId;
pub use patchable::{PatchOutcome, PatchableVariable};
pub use stream::UpdateStream;
pub use updatable::{
    Downgrade, NextUpdate, NextValue, Updatable, UpdatableExt, ValueStream, WeakUpdatable,
};
pub use update::{Content, Update};
pub use updates::Updates;
pub use variable::Variable;
pub use waiters::Awaiter;
