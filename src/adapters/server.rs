//! Plain HTTP and TLS servers running as independent tasks.
use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{Router, serve::Listener};
use futures_util::StreamExt;
use tls_listener::TlsListener;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
    time::Instant,
};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::{
    core::listener::ListenerError,
    ports::http_server::{ManagedServer, ServerError},
    tracing_setup::create_server_span,
};

/// Pause after the listening socket itself fails to accept (e.g. `EMFILE`).
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accept failures coming out of a connection stream.
trait AcceptFailure: fmt::Display {
    /// True when the listening socket failed rather than a single connection.
    fn is_listener_failure(&self) -> bool;
}

impl<A> AcceptFailure for tls_listener::Error<io::Error, io::Error, A> {
    fn is_listener_failure(&self) -> bool {
        match self {
            tls_listener::Error::ListenerError(e) => !is_connection_error(e),
            _ => false,
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Adapts a stream of accepted connections into an axum [`Listener`].
struct StreamListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for StreamListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: AcceptFailure + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) if e.is_listener_failure() => {
                    tracing::error!("accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                // Handshake failures only affect that one connection.
                Some(Err(e)) => tracing::debug!("TLS accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// One bound server: its accept loop runs on a spawned task until the
/// trigger fires and in-flight requests drain.
pub struct RunningServer {
    name: &'static str,
    local_addr: SocketAddr,
    trigger: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<io::Result<()>>>,
}

impl RunningServer {
    pub async fn bind_http(addr: SocketAddr, router: Router) -> Result<Self, ListenerError> {
        let listener = bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Ok(Self::spawn("http", local_addr, listener, router))
    }

    pub async fn bind_tls(
        addr: SocketAddr,
        router: Router,
        config: Arc<rustls::ServerConfig>,
    ) -> Result<Self, ListenerError> {
        let listener = bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let stream = TlsListener::new(TlsAcceptor::from(config), listener);
        let listener = StreamListener { stream, local_addr };
        Ok(Self::spawn("https", local_addr, listener, router))
    }

    fn spawn<L>(name: &'static str, local_addr: SocketAddr, listener: L, router: Router) -> Self
    where
        L: Listener,
        L::Addr: fmt::Debug,
    {
        let (trigger, stopped) = oneshot::channel::<()>();
        let span = create_server_span(name, &local_addr.to_string());
        let task = tokio::spawn(
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        // A dropped trigger also stops the server.
                        let _ = stopped.await;
                    })
                    .await
            }
            .instrument(span),
        );

        Self {
            name,
            local_addr,
            trigger: Some(trigger),
            task: Some(task),
        }
    }
}

#[async_trait]
impl ManagedServer for RunningServer {
    fn name(&self) -> &str {
        self.name
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn shutdown(&mut self, deadline: Instant) -> Result<(), ServerError> {
        let started = Instant::now();
        if let Some(trigger) = self.trigger.take() {
            let _ = trigger.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(ServerError::Io {
                server: self.name.to_string(),
                source,
            }),
            Ok(Err(join_error)) => Err(ServerError::Task {
                server: self.name.to_string(),
                message: join_error.to_string(),
            }),
            Err(_) => {
                task.abort();
                let _ = task.await;
                Err(ServerError::DrainTimeout {
                    server: self.name.to_string(),
                    grace: deadline.saturating_duration_since(started),
                })
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningServer")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("running", &self.task.is_some())
            .finish()
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })
}

/// Build a rustls server configuration from PEM encoded certificate chain and
/// private key.
pub fn tls_server_config(
    certificate_pem: &[u8],
    private_key_pem: &[u8],
) -> Result<rustls::ServerConfig, ListenerError> {
    let certs = rustls_pemfile::certs(&mut &*certificate_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ListenerError::Tls(format!("Failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ListenerError::Tls("No certificate found".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut &*private_key_pem)
        .map_err(|e| ListenerError::Tls(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| ListenerError::Tls("No private key found".to_string()))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ListenerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ListenerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}
