//! Single-writer, copy-on-write snapshot container.
//!
//! Readers clone an `Arc` to the current snapshot and keep using it for as
//! long as they like. Writers build the next snapshot completely outside the
//! read lock, then swap it in; the read lock is only held for the pointer
//! swap, so readers never wait on a rebuild and never see a half-built value.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

pub struct SnapshotCell<T> {
    current: RwLock<Option<Arc<T>>>,
    writer: Mutex<()>,
}

impl<T> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> SnapshotCell<T> {
    /// A cell that has not been published to yet.
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(initial))),
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot, or `None` before the first publish.
    pub fn load(&self) -> Option<Arc<T>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.load().is_some()
    }

    /// Replaces the snapshot wholesale.
    pub fn publish(&self, next: T) -> Arc<T> {
        let _writer = self.lock_writer();
        self.swap(next)
    }

    /// Builds the next snapshot from the current one under writer exclusion.
    ///
    /// `build` runs without the read lock held. Concurrent `update` calls are
    /// serialized, so no update is lost.
    pub fn update<F>(&self, build: F) -> Arc<T>
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let _writer = self.lock_writer();
        let current = self.load();
        let next = build(current.as_deref());
        self.swap(next)
    }

    /// Like `update`, but `build` may decline by returning `None`, in which
    /// case the current snapshot stays published.
    pub fn try_update<F>(&self, build: F) -> Option<Arc<T>>
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let _writer = self.lock_writer();
        let current = self.load();
        let next = build(current.as_deref())?;
        Some(self.swap(next))
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn swap(&self, next: T) -> Arc<T> {
        let next = Arc::new(next);
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::clone(&next));
        next
    }
}
