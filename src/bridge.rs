//! Cross-thread invocation bridge
//!
//! An [`ExecutionContext`] is a dedicated OS thread running a single-threaded tokio runtime
//! that drains a job queue. Anything owned by a context, see [`Owned`], is only ever touched
//! from that thread: callers elsewhere marshal closures onto it with [`ContextHandle::invoke`]
//! (awaitable), [`ContextHandle::invoke_blocking`] (blocks the caller) or
//! [`ContextHandle::post`] (fire and forget). A call made from the owning thread itself runs
//! inline instead of being queued, so a context can never deadlock on itself.

use std::{
    cell::Cell,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc as std_mpsc, Arc, Mutex, PoisonError,
    },
    thread,
};

use thiserror::Error;
use tokio::{
    runtime,
    sync::{mpsc, oneshot},
    task::LocalSet,
};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("execution context `{0}` has stopped")]
    ContextStopped(Arc<str>),
    #[error("invocation on execution context `{0}` ended without a result")]
    Dropped(Arc<str>),
    #[error("failed to start execution context: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A running execution context. Dropping it stops the context; jobs still queued are discarded.
pub struct ExecutionContext {
    handle: ContextHandle,
    _shutdown: oneshot::Sender<()>,
}

impl ExecutionContext {
    pub fn spawn(name: &str) -> Result<Self, BridgeError> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name);
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let (shutdown, mut stopped) = oneshot::channel::<()>();
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;

        let context_name = Arc::clone(&name);
        let loop_name = Arc::clone(&name);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                CURRENT_CONTEXT.with(|current| current.set(Some(id)));
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut stopped => break,
                            job = queue.recv() => match job {
                                Some(job) => run_job(&loop_name, job),
                                None => break,
                            },
                        }
                    }
                });
                debug!(target: "mcp::core", context = %context_name, "execution context stopped");
            })?;

        debug!(target: "mcp::core", context = %name, "execution context started");
        Ok(Self {
            handle: ContextHandle { id, name, jobs },
            _shutdown: shutdown,
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.handle.name)
            .finish()
    }
}

fn run_job(context: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(target: "mcp::core", context = %context, "job panicked on execution context");
    }
}

/// Cloneable address of an [`ExecutionContext`].
#[derive(Clone)]
pub struct ContextHandle {
    id: u64,
    name: Arc<str>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl ContextHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the calling thread is this context's thread.
    pub fn is_current(&self) -> bool {
        CURRENT_CONTEXT.with(|current| current.get() == Some(self.id))
    }

    /// Queues `f` on this context and returns immediately.
    pub fn post<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs
            .send(Box::new(f))
            .map_err(|_| BridgeError::ContextStopped(Arc::clone(&self.name)))
    }

    /// Starts a `!Send` task on this context. `make` runs on the context thread and builds the
    /// future there.
    pub fn spawn<F, Fut>(&self, make: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.post(move || {
            tokio::task::spawn_local(make());
        })
    }

    /// Runs `f` on this context and waits for its result without blocking the caller's thread.
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply, result) = oneshot::channel();
        self.post(move || {
            let _ = reply.send(f());
        })?;
        result
            .await
            .map_err(|_| BridgeError::Dropped(Arc::clone(&self.name)))
    }

    /// Runs `f` on this context, blocking the calling thread until it has finished.
    ///
    /// Must not be called from inside an async task running on a different context, since it
    /// parks the calling thread.
    pub fn invoke_blocking<F, R>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply, result) = std_mpsc::sync_channel(1);
        self.post(move || {
            let _ = reply.send(f());
        })?;
        result
            .recv()
            .map_err(|_| BridgeError::Dropped(Arc::clone(&self.name)))
    }
}

/// A value that belongs to one execution context.
///
/// Every access goes through the owner, so calls from different threads are serialized and
/// never interleave. The mutex is only ever locked on the owner's thread.
pub struct Owned<T: ?Sized> {
    owner: ContextHandle,
    cell: Arc<Mutex<T>>,
}

impl<T: ?Sized> Clone for Owned<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned").field("owner", &self.owner).finish()
    }
}

impl<T: Send + 'static> Owned<T> {
    pub fn new(owner: ContextHandle, value: T) -> Self {
        Self {
            owner,
            cell: Arc::new(Mutex::new(value)),
        }
    }
}

impl<T: ?Sized + Send + 'static> Owned<T> {
    pub fn from_shared(owner: ContextHandle, cell: Arc<Mutex<T>>) -> Self {
        Self { owner, cell }
    }

    pub fn owner(&self) -> &ContextHandle {
        &self.owner
    }

    pub async fn call<F, R>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = Arc::clone(&self.cell);
        self.owner
            .invoke(move || {
                let mut guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut *guard)
            })
            .await
    }

    pub fn call_blocking<F, R>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = Arc::clone(&self.cell);
        self.owner.invoke_blocking(move || {
            let mut guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *guard)
        })
    }
}
