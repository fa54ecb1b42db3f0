//! Updates
//!
//! An [`Update`] pairs a [`Generation`] with either a value or an
//! [`UpdateError`]. It is the unit that flows from sources to waiters.
//!
//! Two forms are reserved: [`Update::uninitialized`] and
//! [`Update::cancelled`]. Both carry generation zero so they can never
//! outrank a real cached value.

use crate::error::{Result, UpdateError};

use super::Generation;

/// The payload of an update.
#[derive(Debug, Clone)]
pub enum Content<T> {
    Value(T),
    Issue(UpdateError),
}

/// A value or error tagged with the generation that produced it.
#[derive(Debug, Clone)]
pub struct Update<T> {
    generation: Generation,
    content: Content<T>,
}

impl<T> Update<T> {
    pub fn new(generation: Generation, value: T) -> Self {
        Self {
            generation,
            content: Content::Value(value),
        }
    }

    /// Create an update carrying an error.
    ///
    /// Cancellation is normalized to [`Update::cancelled`] regardless of the
    /// generation passed in.
    pub fn issue(generation: Generation, error: UpdateError) -> Self {
        if error.is_cancelled() {
            return Self::cancelled();
        }
        Self {
            generation,
            content: Content::Issue(error),
        }
    }

    /// Build an update from a fallible result.
    pub fn from_result(generation: Generation, result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::new(generation, value),
            Err(error) => Self::issue(generation, error),
        }
    }

    pub fn uninitialized() -> Self {
        Self {
            generation: Generation::UNINITIALIZED,
            content: Content::Issue(UpdateError::Uninitialized),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            generation: Generation::UNINITIALIZED,
            content: Content::Issue(UpdateError::Cancelled),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn content(&self) -> &Content<T> {
        &self.content
    }

    pub fn into_content(self) -> Content<T> {
        self.content
    }

    /// Borrow the value, or the error if this update carries one.
    pub fn value(&self) -> std::result::Result<&T, &UpdateError> {
        match &self.content {
            Content::Value(value) => Ok(value),
            Content::Issue(error) => Err(error),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self.content {
            Content::Value(value) => Ok(value),
            Content::Issue(error) => Err(error),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&self.content, Content::Issue(UpdateError::Cancelled))
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(&self.content, Content::Issue(UpdateError::Uninitialized))
    }

    /// Transform the value, keeping the generation and any error.
    pub fn map<U, F>(self, f: F) -> Update<U>
    where
        F: FnOnce(T) -> U,
    {
        Update {
            generation: self.generation,
            content: match self.content {
                Content::Value(value) => Content::Value(f(value)),
                Content::Issue(error) => Content::Issue(error),
            },
        }
    }

    /// Same content, different generation. Cancellation keeps generation zero.
    pub(crate) fn retagged(self, generation: Generation) -> Self {
        if self.is_cancelled() {
            return self;
        }
        Self {
            generation,
            content: self.content,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
