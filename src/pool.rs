use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::{AppError, AppResult};

type ConnectionFactory<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = AppResult<T>> + Send>> + Send + Sync>;
type PingFn<T> = Box<dyn Fn(&T) -> AppResult<()> + Send + Sync>;

/// Sizing and aging knobs for a [`Pool`].
///
/// Invariant: `initial <= max_idle <= max_capacity`.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// connections created eagerly at pool construction
    pub initial: usize,
    /// capacity of the idle queue
    pub max_idle: usize,
    /// upper bound on connections created on demand
    pub max_capacity: usize,
    /// idle connections older than this are discarded on `get`
    pub max_idle_time: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            initial: 1,
            max_idle: 10,
            max_capacity: 20,
            max_idle_time: Duration::from_secs(60),
        }
    }
}

struct IdleConn<T> {
    conn: T,
    last_active: Instant,
}

struct PoolState<T> {
    conn_count: usize,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

struct PoolInner<T> {
    idle_tx: async_channel::Sender<IdleConn<T>>,
    idle_rx: async_channel::Receiver<IdleConn<T>>,
    state: Mutex<PoolState<T>>,
    max_idle: usize,
    max_capacity: usize,
    max_idle_time: Duration,
    factory: ConnectionFactory<T>,
    ping: Option<PingFn<T>>,
}

/// A bounded pool of reusable connections.
///
/// Idle connections sit in a bounded queue and age out; when the queue is
/// empty and `max_capacity` connections already exist, `get` parks the
/// caller on a FIFO wait list and `put` hands returned connections to the
/// oldest waiter directly. Cloning the pool clones a handle to the same
/// shared state.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    pub async fn new<F, Fut>(options: PoolOptions, factory: F) -> AppResult<Pool<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        Self::build(options, factory, None).await
    }

    pub async fn with_ping<F, Fut, P>(options: PoolOptions, factory: F, ping: P) -> AppResult<Pool<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        P: Fn(&T) -> AppResult<()> + Send + Sync + 'static,
    {
        Self::build(options, factory, Some(Box::new(ping) as PingFn<T>)).await
    }

    async fn build<F, Fut>(
        options: PoolOptions,
        factory: F,
        ping: Option<PingFn<T>>,
    ) -> AppResult<Pool<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        if options.initial > options.max_idle {
            return Err(AppError::InvalidConfig(format!(
                "pool initial {} exceeds max_idle {}",
                options.initial, options.max_idle
            )));
        }
        if options.max_capacity < options.max_idle {
            return Err(AppError::InvalidConfig(format!(
                "pool max_capacity {} less than max_idle {}",
                options.max_capacity, options.max_idle
            )));
        }

        let factory: ConnectionFactory<T> = Box::new(move || Box::pin(factory()));
        // async_channel needs a non-zero capacity; with max_idle == 0 the
        // queue is never used, put discards instead
        let (idle_tx, idle_rx) = async_channel::bounded(options.max_idle.max(1));

        for _ in 0..options.initial {
            let conn = (factory)().await?;
            let _ = idle_tx.try_send(IdleConn {
                conn,
                last_active: Instant::now(),
            });
        }

        Ok(Pool {
            inner: Arc::new(PoolInner {
                idle_tx,
                idle_rx,
                state: Mutex::new(PoolState {
                    conn_count: 0,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                max_idle: options.max_idle,
                max_capacity: options.max_capacity,
                max_idle_time: options.max_idle_time,
                factory,
                ping,
            }),
        })
    }

    /// Borrows a connection from the pool.
    ///
    /// `done` is the cancellation cause: a future resolving to the error
    /// to return once the caller gives up (context cancelled, deadline
    /// passed, acquisition timeout). A waiter abandoned this way stays
    /// queued; a background task catches the connection eventually handed
    /// to it and puts it straight back, so nothing leaks.
    pub async fn get<F>(&self, done: F) -> AppResult<T>
    where
        F: Future<Output = AppError>,
    {
        tokio::pin!(done);
        loop {
            if let Ok(idle) = self.inner.idle_rx.try_recv() {
                if idle.last_active.elapsed() > self.inner.max_idle_time {
                    // aged out; dropping the connection closes it, and
                    // idle connections are not part of conn_count
                    debug!("pool discarding idle connection past max_idle_time");
                    continue;
                }
                if let Some(ping) = &self.inner.ping {
                    if ping(&idle.conn).is_err() {
                        debug!("pool discarding idle connection that failed ping");
                        continue;
                    }
                }
                return Ok(idle.conn);
            }

            // the guard must leave lexical scope before any await: the
            // compiler does not credit an explicit drop() inside this loop
            // when proving the future Send
            let waiter_rx = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(AppError::PoolClosed);
                }
                if state.conn_count >= self.inner.max_capacity {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Some(rx)
                } else {
                    state.conn_count += 1;
                    None
                }
            };
            if let Some(mut rx) = waiter_rx {
                tokio::select! {
                    res = &mut rx => {
                        return res.map_err(|_| AppError::PoolClosed);
                    }
                    cause = &mut done => {
                        let pool = self.clone();
                        tokio::spawn(async move {
                            if let Ok(conn) = rx.await {
                                pool.put(conn);
                            }
                        });
                        return Err(cause);
                    }
                }
            }
            return match (self.inner.factory)().await {
                Ok(conn) => Ok(conn),
                Err(e) => {
                    self.inner.state.lock().conn_count -= 1;
                    Err(e)
                }
            };
        }
    }

    /// [`Pool::get`] bounded by a plain timeout.
    pub async fn get_timeout(&self, timeout: Duration) -> AppResult<T> {
        self.get(async move {
            tokio::time::sleep(timeout).await;
            AppError::DeadlineExceeded
        })
        .await
    }

    /// Returns a connection to the pool.
    ///
    /// The oldest waiter, if any, receives the connection directly without
    /// touching the idle queue. Otherwise the connection idles; if the
    /// idle queue is full or the pool is closed it is dropped instead and
    /// the connection count decremented.
    pub fn put(&self, conn: T) {
        let mut state = self.inner.state.lock();
        let mut conn = conn;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(conn) {
                Ok(()) => return,
                // the waiter task is gone entirely, try the next one
                Err(returned) => conn = returned,
            }
        }
        if state.closed || self.inner.max_idle == 0 {
            state.conn_count = state.conn_count.saturating_sub(1);
            return;
        }
        let idle = IdleConn {
            conn,
            last_active: Instant::now(),
        };
        if self.inner.idle_tx.try_send(idle).is_err() {
            debug!("pool idle queue full, closing returned connection");
            state.conn_count = state.conn_count.saturating_sub(1);
        }
    }

    /// Closes every idle connection and makes the pool unusable. Blocked
    /// `get` callers fail with `PoolClosed`; later `put`s drop their
    /// connection.
    pub fn release(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        // dropping the senders wakes blocked getters with PoolClosed
        state.waiters.clear();
        drop(state);
        self.inner.idle_rx.close();
        while self.inner.idle_rx.try_recv().is_ok() {}
    }
}
