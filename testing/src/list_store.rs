//! In-memory durable list store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use appointments_core::{ListStore, StoreError, StoreFuture};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory [`ListStore`] with the same atomicity as the Redis one.
///
/// Every operation runs under one lock, so moves and swaps are indivisible.
/// Clones share the same lists.
///
/// # Example
///
/// ```
/// use appointments_testing::InMemoryListStore;
/// use appointments_core::ListStore;
///
/// # async fn example() -> Result<(), appointments_core::StoreError> {
/// let store = InMemoryListStore::new();
/// store.push_head("pending", "a").await?;
/// store.push_head("pending", "b").await?;
///
/// // FIFO: the oldest value leaves first
/// let moved = store.move_tail_to_head("pending", "in-flight").await?;
/// assert_eq!(moved.as_deref(), Some("a"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryListStore {
    lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryListStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of `key`, head first.
    #[must_use]
    pub fn contents(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .unwrap()
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn with_lists<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, VecDeque<String>>) -> T,
    ) -> Result<T, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(f(&mut self.lists.lock().unwrap()))
    }
}

fn remove_first(list: &mut VecDeque<String>, value: &str) -> bool {
    match list.iter().position(|v| v == value) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

/// Redis `LRANGE` index semantics.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn slice(list: &VecDeque<String>, start: isize, stop: isize) -> Vec<String> {
    let len = list.len() as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return Vec::new();
    }
    list.range(start as usize..=stop as usize).cloned().collect()
}

impl ListStore for InMemoryListStore {
    fn push_head<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, usize> {
        let result = self.with_lists(|lists| {
            let list = lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        });
        Box::pin(async move { result })
    }

    fn move_tail_to_head<'a>(
        &'a self,
        source: &'a str,
        destination: &'a str,
    ) -> StoreFuture<'a, Option<String>> {
        let result = self.with_lists(|lists| {
            let value = lists.get_mut(source)?.pop_back()?;
            lists
                .entry(destination.to_string())
                .or_default()
                .push_front(value.clone());
            Some(value)
        });
        Box::pin(async move { result })
    }

    fn remove<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, bool> {
        let result = self.with_lists(|lists| lists.get_mut(key).is_some_and(|list| remove_first(list, value)));
        Box::pin(async move { result })
    }

    fn swap<'a>(
        &'a self,
        source: &'a str,
        old: &'a str,
        destination: &'a str,
        new: &'a str,
    ) -> StoreFuture<'a, bool> {
        let result = self.with_lists(|lists| {
            if !lists.get_mut(source).is_some_and(|list| remove_first(list, old)) {
                return false;
            }
            lists
                .entry(destination.to_string())
                .or_default()
                .push_front(new.to_string());
            true
        });
        Box::pin(async move { result })
    }

    fn len<'a>(&'a self, key: &'a str) -> StoreFuture<'a, usize> {
        let result = self.with_lists(|lists| lists.get(key).map_or(0, VecDeque::len));
        Box::pin(async move { result })
    }

    fn range<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> StoreFuture<'a, Vec<String>> {
        let result = self.with_lists(|lists| {
            lists
                .get(key)
                .map(|list| slice(list, start, stop))
                .unwrap_or_default()
        });
        Box::pin(async move { result })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let result = self.with_lists(|_| ());
        Box::pin(async move { result })
    }
}
