//! Borrowed vs owned buffers crossing the plugin boundary.
//!
//! Anything handed *into* a call is a [`BorrowedView`]: it carries the
//! lifetime of the call that lent it, so it cannot be stored in instance
//! state. Anything a plugin allocates for output is an [`OwnedBuffer`];
//! it is lent to the output callback as a view and freed by its owner.

use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Read-only view into memory owned by the caller of the current call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorrowedView<'a, T> {
    data: &'a [T],
}

impl<'a, T> BorrowedView<'a, T> {
    pub const fn new(data: &'a [T]) -> Self {
        Self { data }
    }

    pub const fn empty() -> Self {
        Self { data: &[] }
    }

    pub const fn as_slice(&self) -> &'a [T] {
        self.data
    }

    pub const fn len(&self) -> usize {
        self.data.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy the viewed data into a buffer the caller owns.
    pub fn to_owned_buffer(&self) -> OwnedBuffer<T>
    where
        T: Clone,
    {
        OwnedBuffer::from(self.data.to_vec())
    }
}

impl<T> Deref for BorrowedView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<'a, T> From<&'a [T]> for BorrowedView<'a, T> {
    fn from(data: &'a [T]) -> Self {
        Self::new(data)
    }
}

/// Heap buffer owned by whoever allocated it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnedBuffer<T> {
    data: Vec<T>,
}

impl<T> OwnedBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity) }
    }

    /// Lend the buffer out for the duration of one call.
    pub fn view(&self) -> BorrowedView<'_, T> {
        BorrowedView::new(&self.data)
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn push(&mut self, value: T) {
        self.data.push(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T> From<Vec<T>> for OwnedBuffer<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> FromIterator<T> for OwnedBuffer<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self { data: iter.into_iter().collect() }
    }
}

impl<T> Deref for OwnedBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}
