use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info};

use crate::codec::{
    AnySerializer, BincodeSerializer, Compressor, CompressorRegistry, GzipCompressor,
    JsonSerializer, Serializer, SerializerRegistry,
};
use crate::context::CallContext;
use crate::network::{Connection, DEFAULT_MAX_FRAME_SIZE};
use crate::protocol::{Request, Response};
use crate::{AppError, AppResult, BusinessError};

const DEFAULT_MAX_CONNECTIONS: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registration-time erased method invoker: decompress, decode the
/// argument, call the business handler, encode the result.
type MethodHandler = Arc<
    dyn Fn(CallContext, AnySerializer, Option<Arc<dyn Compressor>>, Bytes) -> BoxFuture<AppResult<Vec<u8>>>
        + Send
        + Sync,
>;

/// A named set of callable methods.
///
/// Handlers are bound with their concrete argument and result types at
/// registration; dispatch afterwards is a plain map lookup, no per-call
/// reflection.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Service {
        Service {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register<In, Out, F, Fut>(mut self, method: &str, handler: F) -> Service
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(CallContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, BusinessError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: MethodHandler = Arc::new(move |ctx, serializer, compressor, payload: Bytes| {
            let handler = handler.clone();
            Box::pin(async move {
                let raw = match &compressor {
                    Some(compressor) => compressor.decompress(&payload)?,
                    None => payload.to_vec(),
                };
                let arg: In = serializer.decode(&raw)?;
                match handler(ctx, arg).await {
                    Ok(out) => serializer.encode(&out),
                    Err(e) => Err(AppError::Business(e.to_string())),
                }
            })
        });
        self.methods.insert(method.to_string(), erased);
        self
    }
}

struct Dispatcher {
    services: HashMap<String, Service>,
    serializers: SerializerRegistry,
    compressors: CompressorRegistry,
}

impl Dispatcher {
    /// Resolves and runs one request, always producing a response frame:
    /// protocol and codec failures come back as error info, they do not
    /// kill the connection.
    async fn dispatch(&self, ctx: CallContext, request: Request) -> Response {
        let mut response = Response {
            message_id: request.message_id,
            version: request.version,
            compressor: request.compressor,
            serializer: request.serializer,
            ..Default::default()
        };
        match self.invoke(ctx, &request).await {
            Ok(data) => response.data = Bytes::from(data),
            Err(e) => response.error_info = Bytes::from(e.to_string().into_bytes()),
        }
        response.calculate_head_length();
        response.calculate_body_length();
        response
    }

    async fn invoke(&self, ctx: CallContext, request: &Request) -> AppResult<Vec<u8>> {
        let service = self
            .services
            .get(&request.service_name)
            .ok_or_else(|| AppError::UnknownService(request.service_name.clone()))?;
        let handler = service.methods.get(&request.method_name).ok_or_else(|| {
            AppError::UnknownMethod(format!(
                "{}.{}",
                request.service_name, request.method_name
            ))
        })?;
        let serializer = self
            .serializers
            .get(request.serializer)
            .ok_or(AppError::UnknownSerializer(request.serializer))?;
        // an unregistered compressor code means the payload is uncompressed
        let compressor = self.compressors.get(request.compressor);
        handler(ctx, serializer, compressor, request.data.clone()).await
    }
}

/// Listens for connections and serves registered services over them.
///
/// Each accepted connection gets its own task running a strictly
/// sequential read-dispatch-write loop; only one-way calls are detached
/// from it.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    max_connections: usize,
    max_frame_size: usize,
}

impl Server {
    /// Binds the listener and sets up the default codec tables: JSON and
    /// bincode serializers, gzip compressor.
    pub async fn bind(addr: impl AsRef<str>) -> AppResult<Server> {
        let listener = TcpListener::bind(addr.as_ref()).await?;
        let mut serializers = SerializerRegistry::new();
        serializers.register(AnySerializer::Json(JsonSerializer));
        serializers.register(AnySerializer::Bincode(BincodeSerializer));
        let mut compressors = CompressorRegistry::new();
        compressors.register(Arc::new(GzipCompressor));
        Ok(Server {
            listener,
            dispatcher: Dispatcher {
                services: HashMap::new(),
                serializers,
                compressors,
            },
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn register_service(&mut self, service: Service) {
        self.dispatcher
            .services
            .insert(service.name.clone(), service);
    }

    pub fn register_serializer(&mut self, serializer: AnySerializer) {
        self.dispatcher.serializers.register(serializer);
    }

    pub fn register_compressor(&mut self, compressor: Arc<dyn Compressor>) {
        self.dispatcher.compressors.register(compressor);
    }

    pub fn set_max_connections(&mut self, max_connections: usize) {
        self.max_connections = max_connections;
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Serves until the `shutdown` future resolves, then notifies every
    /// connection handler and waits for them to drain.
    pub async fn run(self, shutdown: impl Future) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);
        let dispatcher = Arc::new(self.dispatcher);

        tokio::select! {
            res = Self::serve(
                &self.listener,
                dispatcher,
                &notify_shutdown,
                &shutdown_complete_tx,
                self.max_connections,
                self.max_frame_size,
            ) => {
                if let Err(err) = res {
                    error!("server accept loop failed: {:?}", err);
                }
            }
            _ = shutdown => {
                info!("server shutting down");
            }
        }

        // dropping the broadcast sender signals every connection handler
        drop(notify_shutdown);
        drop(shutdown_complete_tx);
        let _ = shutdown_complete_rx.recv().await;
        Ok(())
    }

    async fn serve(
        listener: &TcpListener,
        dispatcher: Arc<Dispatcher>,
        notify_shutdown: &broadcast::Sender<()>,
        shutdown_complete_tx: &mpsc::Sender<()>,
        max_connections: usize,
        max_frame_size: usize,
    ) -> AppResult<()> {
        let limit_connections = Arc::new(Semaphore::new(max_connections));
        loop {
            let permit = limit_connections.clone().acquire_owned().await.unwrap();

            let socket = Self::accept(listener).await?;
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            debug!("accepted connection {}", connection_id);

            let mut handler = ConnectionHandler {
                connection: Connection::new(socket, max_frame_size),
                dispatcher: dispatcher.clone(),
                shutdown: Shutdown::new(notify_shutdown.subscribe()),
                _shutdown_complete_tx: shutdown_complete_tx.clone(),
                connection_id,
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("connection {} error: {:?}", handler.connection_id, err);
                }
                // whether gracefully or unexpectedly closed, release the slot
                drop(permit);
            });
        }
    }

    async fn accept(listener: &TcpListener) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIoError(format!(
                            "accept tcp connection error: {}",
                            err
                        )));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

struct ConnectionHandler {
    connection: Connection,
    dispatcher: Arc<Dispatcher>,
    shutdown: Shutdown,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = self.shutdown.recv() => {
                    debug!("connection {} exits read loop on shutdown", self.connection_id);
                    return Ok(());
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // peer closed the connection gracefully
                None => break,
            };

            let request = Request::decode(&frame)?;
            let ctx = CallContext::from_meta(&request.meta);

            if ctx.is_one_way() {
                // run detached, never write a response frame
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(ctx, request).await;
                    if !response.error_info.is_empty() {
                        debug!(
                            "one-way call discarded error: {}",
                            String::from_utf8_lossy(&response.error_info)
                        );
                    }
                });
                continue;
            }

            let response = self.dispatcher.dispatch(ctx, request).await;
            self.connection.write_frame(&response.encode()).await?;
        }
        debug!("connection {} handler exits read loop", self.connection_id);

        Ok(())
    }
}

/// Listens for a shutdown broadcast; completed by either an explicit
/// notification or the sender being dropped.
struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Echo {
        message: String,
    }

    fn dispatcher_with_echo() -> Dispatcher {
        let service = Service::new("echo").register("echo", |_ctx, arg: Echo| async move {
            if arg.message == "boom" {
                return Err(BusinessError::from("echo exploded"));
            }
            Ok(Echo {
                message: arg.message,
            })
        });
        let mut serializers = SerializerRegistry::new();
        serializers.register(AnySerializer::Json(JsonSerializer));
        let mut compressors = CompressorRegistry::new();
        compressors.register(Arc::new(GzipCompressor));
        let mut services = HashMap::new();
        services.insert(service.name.clone(), service);
        Dispatcher {
            services,
            serializers,
            compressors,
        }
    }

    fn echo_request(data: Bytes, compressor: u8) -> Request {
        let mut request = Request {
            message_id: 1,
            serializer: crate::codec::JSON_SERIALIZER,
            compressor,
            service_name: "echo".to_string(),
            method_name: "echo".to_string(),
            data,
            ..Default::default()
        };
        request.calculate_head_length();
        request.calculate_body_length();
        request
    }

    #[tokio::test]
    async fn test_dispatch_echo_roundtrip() {
        let dispatcher = dispatcher_with_echo();
        let payload = serde_json::to_vec(&Echo {
            message: "hi".to_string(),
        })
        .unwrap();
        let response = dispatcher
            .dispatch(CallContext::new(), echo_request(Bytes::from(payload), 0))
            .await;
        assert!(response.error_info.is_empty());
        let echoed: Echo = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(echoed.message, "hi");
        assert_eq!(response.message_id, 1);
    }

    #[tokio::test]
    async fn test_dispatch_business_error() {
        let dispatcher = dispatcher_with_echo();
        let payload = serde_json::to_vec(&Echo {
            message: "boom".to_string(),
        })
        .unwrap();
        let response = dispatcher
            .dispatch(CallContext::new(), echo_request(Bytes::from(payload), 0))
            .await;
        assert_eq!(&response.error_info[..], b"echo exploded");
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_service() {
        let dispatcher = dispatcher_with_echo();
        let mut request = echo_request(Bytes::new(), 0);
        request.service_name = "nope".to_string();
        request.calculate_head_length();
        let response = dispatcher.dispatch(CallContext::new(), request).await;
        assert_eq!(&response.error_info[..], b"unknown service: nope");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_serializer() {
        let dispatcher = dispatcher_with_echo();
        let mut request = echo_request(Bytes::new(), 0);
        request.serializer = 42;
        let response = dispatcher.dispatch(CallContext::new(), request).await;
        assert_eq!(&response.error_info[..], b"unknown serializer code: 42");
    }

    #[tokio::test]
    async fn test_dispatch_compressed_request() {
        let dispatcher = dispatcher_with_echo();
        let payload = serde_json::to_vec(&Echo {
            message: "squeezed".to_string(),
        })
        .unwrap();
        let compressed = GzipCompressor.compress(&payload).unwrap();
        let response = dispatcher
            .dispatch(
                CallContext::new(),
                echo_request(Bytes::from(compressed), crate::codec::GZIP_COMPRESSOR),
            )
            .await;
        assert!(response.error_info.is_empty());
        let echoed: Echo = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(echoed.message, "squeezed");
    }
}
