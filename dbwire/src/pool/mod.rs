//! Bounded set of sessions with acquire/release, address-selection strategy,
//! and an idle reaper.
use std::collections::VecDeque;
use std::future::pending;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant as TokioInstant;

use crate::{
    common::{debug, error_, warn_},
    error::{Error, Result},
    signal::{install_default, ClientData, ClientQuery, Factory, Registry},
    session::{Session, TurnResult},
};

mod config;

pub use config::{CompressionConfig, OpenStrategy, PoolConfig, TlsConfig};

/// A cooperative cancellation + deadline handle threaded through blocking
/// pool and session operations.
#[derive(Clone, Default)]
pub struct Deadline {
    at: Option<TokioInstant>,
    cancel: Option<Arc<Notify>>,
}

impl Deadline {
    /// No deadline, not cancellable: waits indefinitely.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(duration: Duration) -> Self {
        Self { at: Some(TokioInstant::now() + duration), cancel: None }
    }

    /// Builds a `Deadline` paired with a handle the caller can use to cancel
    /// it from elsewhere (e.g. a user hitting Ctrl-C on a blocking acquire).
    pub fn with_cancel() -> (Self, CancelHandle) {
        let notify = Arc::new(Notify::new());
        (Self { at: None, cancel: Some(notify.clone()) }, CancelHandle(notify))
    }

    async fn wait_cancelled(&self) {
        match &self.cancel {
            Some(notify) => notify.notified().await,
            None => pending().await,
        }
    }

    async fn wait_expired(&self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => pending().await,
        }
    }
}

/// The cancelling half of a [`Deadline`] produced by [`Deadline::with_cancel`].
#[derive(Clone)]
pub struct CancelHandle(Arc<Notify>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.notify_waiters();
    }
}

struct IdleSession {
    session: Session<TcpStream>,
    permit: OwnedSemaphorePermit,
}

struct Inner {
    config: PoolConfig,
    registry: Arc<Registry>,
    factory: Arc<Factory>,
    idle: Mutex<VecDeque<IdleSession>>,
    semaphore: Arc<Semaphore>,
    /// Signaled whenever a session is released (to idle or closed), so a
    /// blocked acquirer knows to retry the idle queue or a freed slot.
    activity: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
    reaper_shutdown: Notify,
}

/// A bounded set of sessions against one or more addresses.
///
/// Cheaply cloneable; every clone shares the same idle queue, semaphore, and
/// reaper task through an inner `Arc`.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl Pool {
    /// Builds a pool and spawns its idle reaper task. Does not dial any
    /// session eagerly.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate().map_err(crate::error::Error::Configuration)?;

        let mut registry = Registry::new();
        let mut factory = Factory::new();
        install_default(&mut registry, &mut factory)?;

        let inner = Arc::new(Inner {
            semaphore: Arc::new(Semaphore::new(config.max_open)),
            config,
            registry: Arc::new(registry),
            factory: Arc::new(factory),
            idle: Mutex::new(VecDeque::new()),
            activity: Notify::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            reaper_shutdown: Notify::new(),
        });

        tokio::spawn(reap(inner.clone()));

        Ok(Self { inner })
    }

    /// Builds a pool straight from a DSN, applying §6's defaults.
    pub fn connect(dsn: &str) -> Result<Self> {
        Self::new(PoolConfig::from_dsn(dsn)?)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn pick_addr(&self, id: u64) -> &str {
        let addrs = &self.inner.config.addrs;
        let index = match self.inner.config.open_strategy {
            OpenStrategy::InOrder | OpenStrategy::RoundRobin => (id as usize) % addrs.len(),
            OpenStrategy::Random => rand::random::<usize>() % addrs.len(),
        };
        &addrs[index]
    }

    async fn dial(&self) -> Result<Session<TcpStream>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let addr = self.pick_addr(id).to_string();

        let connect = TcpStream::connect(&addr);
        let stream = tokio::time::timeout(self.inner.config.dial_timeout, connect)
            .await
            .map_err(|_| Error::usage(format!("dial timed out connecting to {addr}")))??;
        stream.set_nodelay(true).ok();

        let mut session = Session::new(stream, self.inner.registry.clone(), self.inner.factory.clone(), id)
            .with_timeouts(self.inner.config.read_timeout, self.inner.config.write_timeout);
        let handshake = session.handshake(self.inner.config.client_name.clone(), self.inner.config.protocol_version);
        tokio::time::timeout(self.inner.config.dial_timeout, handshake)
            .await
            .map_err(|_| Error::usage(format!("handshake timed out connecting to {addr}")))??;
        debug!("dialed session {id} at {addr}");
        Ok(session)
    }

    /// Acquires a usable session.
    pub async fn acquire(&self, deadline: &Deadline) -> Result<Checkout> {
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(Error::PoolClosed);
            }

            if let Some(mut entry) = self.pop_idle() {
                let usable = !entry.session.is_bad() && entry.session.check_idle().await.unwrap_or(false);
                if usable {
                    return Ok(Checkout::new(self.clone(), entry.session, entry.permit));
                }
                // bad, or a ServerClose arrived while idle: discard and retry.
                let _ = entry.session.close().await;
                drop(entry.permit);
                self.inner.activity.notify_waiters();
                continue;
            }

            if let Ok(permit) = self.inner.semaphore.clone().try_acquire_owned() {
                match self.dial().await {
                    Ok(session) => return Ok(Checkout::new(self.clone(), session, permit)),
                    Err(err) => {
                        warn_!("pool: dial failed: {err}");
                        drop(permit);
                        return Err(err);
                    }
                }
            }

            tokio::select! {
                _ = self.inner.activity.notified() => continue,
                _ = deadline.wait_cancelled() => return Err(Error::AcquireCancelled),
                _ = deadline.wait_expired() => return Err(Error::AcquireCancelled),
            }
        }
    }

    fn pop_idle(&self) -> Option<IdleSession> {
        self.inner.idle.lock().unwrap().pop_front()
    }

    /// Returns a checked-out session to the pool.
    fn release(&self, mut session: Session<TcpStream>, permit: OwnedSemaphorePermit) {
        let closed = self.inner.closed.load(Ordering::Acquire);
        if closed || session.is_bad() {
            if session.is_bad() {
                warn_!("pool: closing bad session {}", session.id());
            }
            tokio::spawn(async move {
                let _ = session.close().await;
            });
            drop(permit);
            self.inner.activity.notify_waiters();
            return;
        }

        let mut idle = self.inner.idle.lock().unwrap();
        if idle.len() < self.inner.config.max_idle {
            idle.push_back(IdleSession { session, permit });
            drop(idle);
            self.inner.activity.notify_waiters();
        } else {
            drop(idle);
            tokio::spawn(async move {
                let _ = session.close().await;
            });
            drop(permit);
            self.inner.activity.notify_waiters();
        }
    }

    /// Drains the idle queue and closes each session; in-use sessions are
    /// left to finish naturally and are closed on release rather than
    /// forcibly killed.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.reaper_shutdown.notify_waiters();

        let drained: Vec<IdleSession> = { self.inner.idle.lock().unwrap().drain(..).collect() };
        for entry in drained {
            drop(entry.permit);
            let mut session = entry.session;
            let _ = session.close().await;
        }
        self.inner.activity.notify_waiters();
    }

    /// Runs a ping turn against a freshly acquired session.
    pub async fn ping(&self, deadline: &Deadline, timestamp: i64) -> Result<()> {
        let mut checkout = self.acquire(deadline).await?;
        checkout.ping(timestamp).await
    }

    /// Runs an exec turn against a freshly acquired session.
    pub async fn exec(&self, deadline: &Deadline, query: ClientQuery) -> Result<TurnResult> {
        let mut checkout = self.acquire(deadline).await?;
        checkout.exec(query).await
    }

    /// Runs a query turn, returning the checkout alongside the accumulated
    /// rows so the session stays borrowed for as long as `Rows` needs it
    /// The session is released when the returned `Rows` is closed or
    /// dropped.
    pub async fn query(&self, deadline: &Deadline, query: ClientQuery) -> Result<(Checkout, TurnResult)> {
        let mut checkout = self.acquire(deadline).await?;
        let result = checkout.query(query).await?;
        Ok((checkout, result))
    }

    /// Runs a batch turn against a freshly acquired session.
    pub async fn batch(&self, deadline: &Deadline, data: ClientData) -> Result<TurnResult> {
        let mut checkout = self.acquire(deadline).await?;
        checkout.batch(data).await
    }
}

async fn reap(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.reaper_shutdown.notified() => return,
        }
        if inner.closed.load(Ordering::Acquire) {
            return;
        }

        let expired: Vec<IdleSession> = {
            let mut idle = inner.idle.lock().unwrap();
            let mut keep = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();
            while let Some(entry) = idle.pop_front() {
                if entry.session.last_used().elapsed() > inner.config.conn_max_lifetime {
                    expired.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            *idle = keep;
            expired
        };

        for entry in expired {
            debug!("pool: reaping idle session {} past conn_max_lifetime", entry.session.id());
            drop(entry.permit);
            let mut session = entry.session;
            if let Err(err) = session.close().await {
                error_!("pool: error closing reaped session: {err}");
            }
        }
    }
}

/// An acquired session, on loan from a [`Pool`].
///
/// Dropping a `Checkout` releases it back to the pool: bad sessions (per
/// [`Session::is_bad`]) are closed, healthy ones rejoin the idle queue.
pub struct Checkout {
    pool: Pool,
    session: Option<Session<TcpStream>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Checkout {
    fn new(pool: Pool, session: Session<TcpStream>, permit: OwnedSemaphorePermit) -> Self {
        Self { pool, session: Some(session), permit: Some(permit) }
    }

    /// Releases this session back to the pool explicitly, ahead of `Drop`.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let (Some(session), Some(permit)) = (self.session.take(), self.permit.take()) {
            self.pool.release(session, permit);
        }
    }
}

impl Deref for Checkout {
    type Target = Session<TcpStream>;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("checkout used after release")
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("checkout used after release")
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.release_inner();
    }
}
