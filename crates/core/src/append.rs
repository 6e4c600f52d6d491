//! Appender assembly: composes the decorator chain around the sequencing
//! queue, spawns followers against the log reader and wraps the whole chain
//! in the lifecycle terminator.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::{
    CancelToken, ConfigError, Driver, Entry, IndexFuture, LogReader, QueueConfig, SequencerQueue,
    ShutdownError, Terminator,
};

/// Object-safe add operation; every layer of the pipeline implements this.
#[async_trait::async_trait]
pub trait AddDelegate: Send + Sync + 'static {
    async fn add(&self, entry: Entry) -> IndexFuture;
}

/// A link in the add chain.
pub type Add = Arc<dyn AddDelegate>;

/// A layer around an add operation, from inner to outer.
pub type AddDecorator = Box<dyn FnOnce(Add) -> Add + Send>;

/// A background task wired to the log reader and the cancel token at
/// assembly time.
pub type FollowerTask<R, C> = Box<dyn FnOnce(R, C) -> BoxFuture<'static, ()> + Send>;

pub struct AppendOptions<R, C> {
    pub queue: QueueConfig,
    decorators: Vec<AddDecorator>,
    followers: Vec<FollowerTask<R, C>>,
}

impl<R, C> AppendOptions<R, C> {
    pub fn new(queue: QueueConfig) -> Self {
        Self {
            queue,
            decorators: Vec::new(),
            followers: Vec::new(),
        }
    }

    /// Register a decorator. The first registered decorator ends up
    /// outermost (just below the terminator).
    pub fn with_decorator(mut self, decorator: AddDecorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    pub fn with_follower(mut self, follower: FollowerTask<R, C>) -> Self {
        self.followers.push(follower);
        self
    }
}

impl<R, C> Default for AppendOptions<R, C> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

/// The assembled append pipeline handed to the personality.
#[derive(Clone)]
pub struct Appender {
    add: Add,
}

impl Appender {
    pub async fn add(&self, entry: Entry) -> IndexFuture {
        self.add.add(entry).await
    }
}

/// Shutdown side of the assembled pipeline, bound to the terminator.
pub struct ShutdownHandle<R: LogReader> {
    terminator: Arc<Terminator<R>>,
}

impl<R: LogReader> ShutdownHandle<R> {
    /// Gate new adds and wait until a published checkpoint commits to the
    /// largest index that was handed out.
    pub async fn shutdown<C: CancelToken>(&self, cancel: C) -> Result<(), ShutdownError> {
        self.terminator.shutdown(cancel).await
    }
}

/// Assemble the append pipeline on top of a driver.
///
/// Decorators are folded in reverse registration order so that the first
/// registered one sits outermost; the terminator always wraps last so it
/// observes every successful resolution.
pub fn assemble<D, C>(
    driver: &D,
    options: AppendOptions<D::Reader, C>,
    cancel: C,
) -> Result<(Appender, ShutdownHandle<D::Reader>, D::Reader), ConfigError>
where
    D: Driver,
    C: CancelToken,
{
    if options.queue.max_size == 0 {
        return Err(ConfigError::invalid("queue max_size must be positive"));
    }

    if options.queue.max_age_ms == 0 {
        return Err(ConfigError::invalid("queue max_age_ms must be positive"));
    }

    let (sink, reader) = driver.appender()?;

    let queue = SequencerQueue::start(sink, &options.queue, cancel.clone());
    let mut add: Add = Arc::new(queue);

    for decorator in options.decorators.into_iter().rev() {
        add = decorator(add);
    }

    for follower in options.followers {
        tokio::spawn(follower(reader.clone(), cancel.clone()));
    }

    let terminator = Arc::new(Terminator::new(add, reader.clone()));

    let add: Add = Arc::clone(&terminator) as Add;
    let appender = Appender { add };
    let shutdown = ShutdownHandle { terminator };

    Ok((appender, shutdown, reader))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::builtin::EphemeralLog;
    use crate::EphemeralLogConfig;

    #[derive(Clone)]
    struct NeverCancel;

    impl CancelToken for NeverCancel {
        async fn cancelled(&self) {
            std::future::pending::<()>().await
        }
    }

    struct Tagging {
        inner: Add,
        tag: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl AddDelegate for Tagging {
        async fn add(&self, entry: Entry) -> IndexFuture {
            self.calls.lock().unwrap().push(self.tag);
            self.inner.add(entry).await
        }
    }

    fn tagging(tag: &'static str, calls: &Arc<Mutex<Vec<&'static str>>>) -> AddDecorator {
        let calls = Arc::clone(calls);
        Box::new(move |inner| Arc::new(Tagging { inner, tag, calls }))
    }

    #[tokio::test]
    async fn first_registered_decorator_is_outermost() {
        let driver = EphemeralLog::new(EphemeralLogConfig::default());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let options = AppendOptions::new(QueueConfig {
            max_size: 1,
            max_age_ms: 60_000,
        })
        .with_decorator(tagging("first", &calls))
        .with_decorator(tagging("second", &calls));

        let (appender, _shutdown, _reader) =
            assemble(&driver, options, NeverCancel).unwrap();

        let future = appender.add(Entry::new(b"leaf".to_vec())).await;
        future.assignment().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn zero_sized_queue_is_rejected() {
        let driver = EphemeralLog::new(EphemeralLogConfig::default());

        let options: AppendOptions<_, NeverCancel> = AppendOptions::new(QueueConfig {
            max_size: 0,
            max_age_ms: 250,
        });

        assert!(matches!(
            assemble(&driver, options, NeverCancel),
            Err(ConfigError::Invalid(_))
        ));
    }
}
