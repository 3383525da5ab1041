use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::codec::{AnySerializer, Compressor, JsonSerializer, Serializer};
use crate::context::CallContext;
use crate::network::{Connection, DEFAULT_MAX_FRAME_SIZE};
use crate::pool::{Pool, PoolOptions};
use crate::protocol::{Request, Response, PROTOCOL_VERSION};
use crate::{AppError, AppResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ClientBuilder {
    addr: String,
    serializer: AnySerializer,
    compressor: Option<Arc<dyn Compressor>>,
    pool_options: PoolOptions,
    connect_timeout: Duration,
    acquire_timeout: Duration,
    max_frame_size: usize,
}

impl ClientBuilder {
    pub fn new(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            addr: addr.into(),
            serializer: AnySerializer::Json(JsonSerializer),
            compressor: None,
            pool_options: PoolOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn serializer(mut self, serializer: AnySerializer) -> ClientBuilder {
        self.serializer = serializer;
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> ClientBuilder {
        self.compressor = Some(compressor);
        self
    }

    pub fn pool_options(mut self, options: PoolOptions) -> ClientBuilder {
        self.pool_options = options;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.connect_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.acquire_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: usize) -> ClientBuilder {
        self.max_frame_size = max_frame_size;
        self
    }

    pub async fn connect(self) -> AppResult<Client> {
        let addr = self.addr;
        let connect_timeout = self.connect_timeout;
        let max_frame_size = self.max_frame_size;
        let factory = move || {
            let addr = addr.clone();
            async move {
                let stream =
                    tokio::time::timeout(connect_timeout, TcpStream::connect(addr.as_str()))
                        .await
                        .map_err(|_| {
                            AppError::DetailedIoError(format!("connect to {} timed out", addr))
                        })??;
                Ok(Connection::new(stream, max_frame_size))
            }
        };
        let pool = Pool::new(self.pool_options, factory).await?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                pool,
                serializer: self.serializer,
                compressor: self.compressor,
                acquire_timeout: self.acquire_timeout,
                next_message_id: AtomicU32::new(1),
            }),
        })
    }
}

struct ClientInner {
    pool: Pool<Connection>,
    serializer: AnySerializer,
    compressor: Option<Arc<dyn Compressor>>,
    acquire_timeout: Duration,
    next_message_id: AtomicU32,
}

/// An RPC client bound to one remote address: a connection pool plus the
/// codecs every call through this client uses. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects with default options: JSON payloads, no compression, the
    /// default pool sizing.
    pub async fn connect(addr: impl Into<String>) -> AppResult<Client> {
        ClientBuilder::new(addr).connect().await
    }

    pub fn builder(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(addr)
    }

    /// Binds a typed stub for one remote method.
    pub fn stub<In, Out>(&self, service_name: &str, method_name: &str) -> MethodStub<In, Out> {
        MethodStub {
            client: self.clone(),
            service_name: service_name.to_string(),
            method_name: method_name.to_string(),
            _marker: PhantomData,
        }
    }

    /// Closes idle pooled connections and rejects further calls.
    pub fn release(&self) {
        self.inner.pool.release();
    }

    /// Runs one request/response exchange, racing it against the context.
    ///
    /// On cancellation the caller gets the context error immediately; the
    /// exchange itself is abandoned, not aborted — it runs to completion
    /// in the background and returns its connection to the pool.
    pub async fn invoke(&self, ctx: &CallContext, request: Request) -> AppResult<Response> {
        ctx.check()?;

        let (tx, rx) = oneshot::channel();
        let client = self.clone();
        let one_way = ctx.is_one_way();
        tokio::spawn(async move {
            let result = client.send_and_receive(request, one_way).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            res = rx => res.map_err(|e| AppError::ChannelRecvError(e.to_string()))?,
            cause = ctx.done() => Err(cause),
        }
    }

    async fn send_and_receive(&self, request: Request, one_way: bool) -> AppResult<Response> {
        let frame = request.encode();
        // acquisition gets its own bounded timeout, independent of the
        // call deadline
        let mut conn = self.inner.pool.get_timeout(self.inner.acquire_timeout).await?;
        let result = Self::exchange(&mut conn, &frame, one_way).await;
        self.inner.pool.put(conn);
        result
    }

    async fn exchange(conn: &mut Connection, frame: &[u8], one_way: bool) -> AppResult<Response> {
        conn.write_frame(frame).await?;
        if one_way {
            return Err(AppError::OneWay);
        }
        match conn.read_frame().await? {
            Some(bytes) => Response::decode(&bytes),
            None => Err(AppError::DetailedIoError(
                "connection closed before response".to_string(),
            )),
        }
    }
}

/// A callable bound to one `(service, method)` pair, fixed to its argument
/// and result types at construction.
pub struct MethodStub<In, Out> {
    client: Client,
    service_name: String,
    method_name: String,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> MethodStub<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    pub async fn call(&self, ctx: &CallContext, arg: &In) -> AppResult<Out> {
        let inner = &self.client.inner;

        let mut data = inner.serializer.encode(arg)?;
        let mut compressor_code = 0;
        if let Some(compressor) = &inner.compressor {
            data = compressor.compress(&data)?;
            compressor_code = compressor.code();
        }

        let mut meta = HashMap::with_capacity(2);
        ctx.write_meta(&mut meta);

        let mut request = Request {
            message_id: inner.next_message_id.fetch_add(1, Ordering::Relaxed),
            version: PROTOCOL_VERSION,
            compressor: compressor_code,
            serializer: inner.serializer.code(),
            service_name: self.service_name.clone(),
            method_name: self.method_name.clone(),
            meta,
            data: Bytes::from(data),
            ..Default::default()
        };
        request.calculate_head_length();
        request.calculate_body_length();

        let response = self.client.invoke(ctx, request).await?;

        // decode before surfacing the business error: a response can carry
        // both a payload and error info
        let result = if response.data.is_empty() {
            None
        } else {
            Some(inner.serializer.decode::<Out>(&response.data)?)
        };
        if !response.error_info.is_empty() {
            return Err(AppError::Business(
                String::from_utf8_lossy(&response.error_info).into_owned(),
            ));
        }
        match result {
            Some(out) => Ok(out),
            None => inner.serializer.decode::<Out>(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_fails_fast_on_cancelled_context() -> AppResult<()> {
        // a listener that never accepts is enough: the context is checked
        // before any network work
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let client = Client::connect(addr).await?;

        let ctx = CallContext::new();
        ctx.cancel();
        let stub = client.stub::<u32, u32>("some-service", "some_method");
        assert!(matches!(
            stub.call(&ctx, &1).await,
            Err(AppError::Cancelled)
        ));
        Ok(())
    }
}
