//! One-shot, multi-reader index futures.
//!
//! A future resolves exactly once, to an assignment or an error; every
//! reader observes the same outcome, before or after resolution. Backed by a
//! watch channel so the resolved value is memoized for late readers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{AppendError, LeafIndex};

/// The outcome of a successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Sequence number assigned to the leaf
    pub index: LeafIndex,

    /// True when the index refers to an earlier, identical leaf located by a
    /// dedup layer
    pub is_dup: bool,
}

impl Assignment {
    pub fn new(index: LeafIndex) -> Self {
        Self {
            index,
            is_dup: false,
        }
    }
}

type Slot = Option<Result<Assignment, AppendError>>;
type Observer = Arc<dyn Fn(&Assignment) + Send + Sync>;

/// Write side of an [`IndexFuture`]; consumed by the single resolution.
pub struct IndexResolver {
    tx: watch::Sender<Slot>,
}

impl IndexResolver {
    pub fn resolve(self, value: Result<Assignment, AppendError>) {
        // receivers may all be gone already; that's fine
        let _ = self.tx.send(Some(value));
    }
}

/// Read side: cloneable, shareable across tasks.
#[derive(Clone)]
pub struct IndexFuture {
    rx: watch::Receiver<Slot>,
    mark_dup: bool,
    observer: Option<Observer>,
}

impl IndexFuture {
    /// An unresolved future plus its resolver.
    pub fn pending() -> (IndexResolver, IndexFuture) {
        let (tx, rx) = watch::channel(None);

        let future = IndexFuture {
            rx,
            mark_dup: false,
            observer: None,
        };

        (IndexResolver { tx }, future)
    }

    /// A future already resolved to the given assignment.
    pub fn resolved(assignment: Assignment) -> Self {
        let (resolver, future) = Self::pending();
        resolver.resolve(Ok(assignment));
        future
    }

    /// A future already resolved to the given error.
    pub fn failed(err: AppendError) -> Self {
        let (resolver, future) = Self::pending();
        resolver.resolve(Err(err));
        future
    }

    /// Overlay `is_dup = true` on whatever assignment this future resolves
    /// to. Used by dedup decorators when handing out a cached future.
    pub fn as_dup(mut self) -> Self {
        self.mark_dup = true;
        self
    }

    /// Attach a hook that runs on every successful read of the resolved
    /// assignment, after the dup overlay. Hooks compose.
    pub fn observed(mut self, observer: impl Fn(&Assignment) + Send + Sync + 'static) -> Self {
        self.observer = match self.observer.take() {
            Some(prev) => Some(Arc::new(move |assignment: &Assignment| {
                prev(assignment);
                observer(assignment);
            })),
            None => Some(Arc::new(observer)),
        };

        self
    }

    /// The resolved outcome, if any, without blocking.
    pub fn peek(&self) -> Option<Result<Assignment, AppendError>> {
        self.rx.borrow().clone().map(|value| self.finish(value))
    }

    /// Wait for resolution. Every reader gets the same value.
    pub async fn assignment(&self) -> Result<Assignment, AppendError> {
        let mut rx = self.rx.clone();

        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return self.finish(value);
            }

            if rx.changed().await.is_err() {
                return Err(AppendError::Abandoned);
            }
        }
    }

    fn finish(&self, value: Result<Assignment, AppendError>) -> Result<Assignment, AppendError> {
        let mut assignment = value?;

        if self.mark_dup {
            assignment.is_dup = true;
        }

        if let Some(observer) = &self.observer {
            observer(&assignment);
        }

        Ok(assignment)
    }
}

impl std::fmt::Debug for IndexFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFuture")
            .field("resolved", &self.rx.borrow().is_some())
            .field("mark_dup", &self.mark_dup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test]
    async fn readers_before_and_after_resolution_agree() {
        let (resolver, future) = IndexFuture::pending();

        let early = future.clone();
        let waiter = tokio::spawn(async move { early.assignment().await });

        resolver.resolve(Ok(Assignment::new(7)));

        assert_eq!(waiter.await.unwrap().unwrap().index, 7);
        assert_eq!(future.assignment().await.unwrap().index, 7);
        assert_eq!(future.assignment().await.unwrap().index, 7);
    }

    #[tokio::test]
    async fn resolved_and_failed_shortcuts() {
        let ok = IndexFuture::resolved(Assignment::new(3));
        assert_eq!(ok.assignment().await.unwrap().index, 3);

        let err = IndexFuture::failed(AppendError::Stopped);
        assert!(matches!(
            err.assignment().await,
            Err(AppendError::Stopped)
        ));
    }

    #[tokio::test]
    async fn dropping_the_resolver_abandons_readers() {
        let (resolver, future) = IndexFuture::pending();
        drop(resolver);

        assert!(matches!(
            future.assignment().await,
            Err(AppendError::Abandoned)
        ));
    }

    #[tokio::test]
    async fn dup_overlay_applies_only_to_the_marked_clone() {
        let original = IndexFuture::resolved(Assignment::new(5));
        let dup = original.clone().as_dup();

        assert!(!original.assignment().await.unwrap().is_dup);
        assert!(dup.assignment().await.unwrap().is_dup);
    }

    #[tokio::test]
    async fn observers_compose_and_see_the_overlaid_value() {
        let seen = Arc::new(AtomicU64::new(0));
        let count = Arc::new(AtomicU64::new(0));

        let seen2 = Arc::clone(&seen);
        let count2 = Arc::clone(&count);

        let future = IndexFuture::resolved(Assignment::new(9))
            .observed(move |a| {
                seen.store(a.index, Ordering::SeqCst);
            })
            .observed(move |_| {
                count2.fetch_add(1, Ordering::SeqCst);
            });

        future.assignment().await.unwrap();

        assert_eq!(seen2.load(Ordering::SeqCst), 9);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
