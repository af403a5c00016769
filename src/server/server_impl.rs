use crate::{
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits, WaitStrategy},
    server::{
        connection::HttpConnection,
        responder::{DefaultHost, Host, HostTable, PathRouter, Responder, Router, Site},
    },
};
use crossbeam::queue::SegQueue;
use socket2::SockRef;
use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::net::TcpListener;

const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
    Connection: close\r\nContent-Length: 0\r\nRetry-After: 1\r\n\r\n";

/// An HTTP/1.x server: a tokio accept loop feeding a pool of worker threads.
///
/// Each worker owns one connection engine and serves one connection at a
/// time with blocking socket I/O. Sites are shared read-only between workers.
///
/// # Examples
///
/// ```no_run
/// use maker_http::{Handled, Request, Responder, Response, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct Hello;
///
/// impl Responder for Hello {
///     fn get(&self, _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello World!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await?)
///         .route("/", Hello)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    hosts: Arc<HostTable>,
    limits: AllLimits,
    stop: Arc<AtomicBool>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            host: None,
            router: None,
            paths: PathRouter::default(),
            sites: Vec::new(),

            server_limits: None,
            connection_limits: None,
            request_limits: None,
            response_limits: None,
        }
    }

    /// The address the server listens on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until Ctrl-C or `SIGTERM`.
    ///
    /// Workers finish the connection they are serving before this returns.
    /// Fails only when the worker threads cannot be started.
    pub async fn launch(self) -> io::Result<()> {
        let (server_limits, ..) = &self.limits;
        let stream_queue: StreamQueue = Arc::new(SegQueue::new());
        let error_queue: StreamQueue = Arc::new(SegQueue::new());

        let mut threads = Vec::with_capacity(server_limits.max_connections + 1);
        for id in 0..server_limits.max_connections {
            threads.push(self.spawn_worker(id, &stream_queue)?);
        }
        for id in 0..server_limits.count_503_handlers.max(1) {
            threads.push(self.spawn_alarmist(id, &error_queue)?);
        }

        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            workers = server_limits.max_connections,
            "listening"
        );

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(value) => value,
                        Err(err) => {
                            tracing::warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    let stream = match blocking(stream) {
                        Ok(stream) => stream,
                        Err(err) => {
                            tracing::warn!(%peer, %err, "cannot take over socket");
                            continue;
                        }
                    };

                    match stream_queue.len() < server_limits.max_pending_connections {
                        true => stream_queue.push((stream, peer)),
                        false => {
                            tracing::warn!(%peer, "connection queue is full");
                            error_queue.push((stream, peer));
                        }
                    }
                }
            }
        }

        tracing::info!("shutting down");
        self.stop.store(true, Ordering::Release);

        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .filter_map(|thread| thread.join().err())
                .count()
        })
        .await;

        match joined {
            Ok(0) => tracing::info!("server stopped"),
            Ok(panicked) => tracing::warn!(panicked, "server stopped, some workers panicked"),
            Err(err) => tracing::warn!(%err, "server stopped without joining workers"),
        }
        Ok(())
    }

    fn spawn_worker(&self, id: usize, queue: &StreamQueue) -> io::Result<JoinHandle<()>> {
        let queue = queue.clone();
        let stop = self.stop.clone();
        let (server_limits, conn_limits, req_limits, resp_limits) = self.limits.clone();
        let mut conn = HttpConnection::new(
            self.hosts.clone(),
            conn_limits.clone(),
            req_limits,
            resp_limits,
        );

        thread::Builder::new()
            .name(format!("maker-http-worker-{id}"))
            .spawn(move || {
                while let Some((stream, peer)) =
                    next_stream(&queue, &stop, &server_limits.wait_strategy)
                {
                    if let Err(err) = prepare(&stream, &conn_limits) {
                        tracing::debug!(%peer, %err, "cannot configure socket");
                        continue;
                    }
                    tracing::trace!(%peer, "connection opened");

                    if let Err(err) = conn.run(&stream, peer) {
                        tracing::debug!(%peer, %err, "connection failed");
                    }
                }
            })
    }

    fn spawn_alarmist(&self, id: usize, queue: &StreamQueue) -> io::Result<JoinHandle<()>> {
        let queue = queue.clone();
        let stop = self.stop.clone();
        let (server_limits, conn_limits, ..) = self.limits.clone();
        let quiet = server_limits.count_503_handlers == 0;

        thread::Builder::new()
            .name(format!("maker-http-503-{id}"))
            .spawn(move || {
                while let Some((mut stream, _)) =
                    next_stream(&queue, &stop, &server_limits.wait_strategy)
                {
                    if quiet || prepare(&stream, &conn_limits).is_err() {
                        continue;
                    }
                    let _ = stream.write_all(SERVICE_UNAVAILABLE);
                }
            })
    }
}

/// Waits for a queued connection. `None` once the server stops.
fn next_stream(
    queue: &SegQueue<(TcpStream, SocketAddr)>,
    stop: &AtomicBool,
    wait: &WaitStrategy,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        if stop.load(Ordering::Acquire) {
            return None;
        }
        if let Some(value) = queue.pop() {
            return Some(value);
        }

        match wait {
            WaitStrategy::Yield => thread::yield_now(),
            WaitStrategy::Sleep(time) => thread::sleep(*time),
        }
    }
}

fn blocking(stream: tokio::net::TcpStream) -> io::Result<TcpStream> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn prepare(stream: &TcpStream, limits: &ConnLimits) -> io::Result<()> {
    let socket = SockRef::from(stream);
    socket.set_read_timeout(timeout(limits.socket_read_timeout))?;
    socket.set_write_timeout(timeout(limits.socket_write_timeout))?;
    stream.set_nodelay(true)
}

#[inline]
fn timeout(value: Duration) -> Option<Duration> {
    (!value.is_zero()).then_some(value)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// Requests are routed by `Host` first, then by path. Sites added with
/// [`site`](Self::site) answer their own host names; everything else goes to
/// the default site made of [`host`](Self::host) and either
/// [`router`](Self::router) or the paths given to [`route`](Self::route).
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    host: Option<Arc<dyn Host>>,
    router: Option<Arc<dyn Router>>,
    paths: PathRouter,
    sites: Vec<(String, Site)>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
}

impl ServerBuilder {
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Adds a path pattern to the default site's [`PathRouter`].
    ///
    /// A pattern ending in `/*` matches by prefix. The longest match wins.
    ///
    /// ```no_run
    /// # maker_http::impl_default_responder!{Hello}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_http::Server;
    /// use tokio::net::TcpListener;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .route("/hello", Hello)
    ///     .route("/static/*", Hello)
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn route<P: Into<String>, R: Responder>(mut self, pattern: P, responder: R) -> Self {
        self.paths.add(pattern, responder);
        self
    }

    /// Replaces the default site's router. Paths given to
    /// [`route`](Self::route) are then ignored.
    #[inline(always)]
    pub fn router<R: Router>(mut self, router: R) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Sets the default site's host (defaults to [`DefaultHost`]).
    #[inline(always)]
    pub fn host<H: Host>(mut self, host: H) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    /// Adds a virtual host answering requests whose `Host` is `name`.
    ///
    /// ```no_run
    /// # maker_http::impl_default_responder!{Hello}
    /// # #[tokio::main]
    /// # async fn main() {
    /// use maker_http::{DefaultHost, PathRouter, Server, Site};
    /// use std::sync::Arc;
    /// use tokio::net::TcpListener;
    ///
    /// let mut router = PathRouter::default();
    /// router.add("/*", Hello);
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .route("/", Hello)
    ///     .site("api.example.com", Site {
    ///         host: Arc::new(DefaultHost::new("api")),
    ///         router: Arc::new(router),
    ///     })
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn site<N: Into<String>>(mut self, name: N, site: Site) -> Self {
        self.sites.push((name.into(), site));
        self
    }

    /// Configures the worker pool and admission queue.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures socket timeouts and connection reuse.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response buffering.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// When the `listener` method was not called, with the message
    /// ``The `listener` method must be called to create``.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");

        let default = Site {
            host: self
                .host
                .unwrap_or_else(|| Arc::new(DefaultHost::default())),
            router: self.router.unwrap_or_else(|| Arc::new(self.paths)),
        };
        let mut hosts = HostTable::new(default);
        for (name, site) in self.sites {
            hosts.add(name, site);
        }

        Server {
            listener,
            hosts: Arc::new(hosts),
            limits: (
                self.server_limits.unwrap_or_default(),
                self.connection_limits.unwrap_or_default(),
                self.request_limits.unwrap_or_default(),
                self.response_limits.unwrap_or_default(),
            ),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

type StreamQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
type AllLimits = (ServerLimits, ConnLimits, ReqLimits, RespLimits);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn timeouts() {
        assert_eq!(timeout(Duration::ZERO), None);
        assert_eq!(timeout(Duration::from_secs(3)), Some(Duration::from_secs(3)));
    }

    #[test]
    fn queue_wait() {
        let queue = SegQueue::new();
        let stop = AtomicBool::new(true);
        assert!(next_stream(&queue, &stop, &WaitStrategy::Yield).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_and_overflows() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::builder()
            .listener(listener)
            .server_limits(ServerLimits {
                max_connections: 1,
                max_pending_connections: 0,
                ..ServerLimits::default()
            })
            .build();
        let addr = server.local_addr().unwrap();
        let stop = server.stop.clone();

        let task = tokio::spawn(server.launch());

        // Nothing fits in the queue, so every connection gets the 503.
        let response = tokio::task::spawn_blocking(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
        .await
        .unwrap();
        assert_eq!(response.as_bytes(), SERVICE_UNAVAILABLE);

        stop.store(true, Ordering::Release);
        task.abort();
    }
}
