//! Server configuration: concurrency, timeouts and size limits
//!
//! Every struct here is plain data with a conservative [`Default`]. Build the
//! one you need with struct-update syntax and hand it to the
//! [`ServerBuilder`](crate::ServerBuilder).
//!
//! # Examples
//!
//! ```no_run
//! use maker_http::{limits::{ConnLimits, ReqLimits, ServerLimits}, Server};
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//!
//! # maker_http::impl_default_responder!{MyResponder}
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await?)
//!         .route("/", MyResponder)
//!         .server_limits(ServerLimits {
//!             max_connections: 500,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 1024 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await
//! }
//! ```

use std::time::Duration;

/// Controls worker pool size, admission queueing and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   No    /----------------\   Yes  [-------------]
/// [ Add to queue ] <====== | Queue is full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \/
/// [--------]   Yes   /-------------------------\   No   [------]
/// [ Worker ] <====== | Is there a free worker? | =====> [ Wait ]
/// [--------]         \-------------------------/        [------]
/// ```
///
/// Each worker is a dedicated OS thread that serves one connection at a time
/// with blocking socket I/O, then goes back to the queue.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker threads, i.e. connections served at once (default: `64`).
    pub max_connections: usize,

    /// Accepted connections allowed to wait for a worker (default: `256`).
    ///
    /// Connections beyond this get an immediate `503 Service Unavailable`.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue (default: `Sleep(100µs)`).
    pub wait_strategy: WaitStrategy,

    /// Threads dedicated to answering overflow connections with `503`
    /// (default: `1`). With `0`, overflow connections are closed silently.
    pub count_503_handlers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_pending_connections: 256,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(100)),
            count_503_handlers: 1,

            _priv: (),
        }
    }
}

/// How a worker thread waits when the connection queue is empty.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// [`std::thread::yield_now`] between polls. Lowest latency, one busy core
    /// per idle worker.
    Yield,

    /// [`std::thread::sleep`] for the given duration between polls.
    Sleep(Duration),
}

/// Per-connection timeouts and lifetime.
///
/// Timeouts are set on the socket before the first byte is read. A read or
/// write that stalls longer aborts the connection without a response.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Socket read timeout (default: `5s`).
    pub socket_read_timeout: Duration,

    /// Socket write timeout (default: `5s`).
    pub socket_write_timeout: Duration,

    /// Requests served on one persistent connection before it is closed
    /// (default: `100`).
    pub max_requests_per_connection: usize,

    /// Age after which a persistent connection is closed (default: `120s`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(5),
            socket_write_timeout: Duration::from_secs(5),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),

            _priv: (),
        }
    }
}

/// Request parsing limits.
///
/// | Exceeded                  | Status |
/// |---------------------------|--------|
/// | `url_size`                | `414`  |
/// | `header_count`            | `431`  |
/// | `header_name_size`        | `431`  |
/// | `header_value_size`       | `431`  |
/// | `body_size`               | `413`  |
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Longest request target, in bytes (default: `2048`).
    pub url_size: usize,

    /// Most header lines in one request (default: `64`).
    pub header_count: usize,
    /// Longest header name (default: `64`).
    pub header_name_size: usize,
    /// Longest header value, after folding (default: `4096`).
    pub header_value_size: usize,

    /// Most entity bytes buffered for a responder, after decoding
    /// (default: `64 KiB`). Also caps a declared `Content-Length`.
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 2048,

            header_count: 64,
            header_name_size: 64,
            header_value_size: 4096,

            body_size: 64 * 1024,

            _priv: (),
        }
    }
}

impl ReqLimits {
    // Request line:
    // OPTIONS /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URL    Version
    //
    // Method(7) + " " + URL + " " + Version(8) + "\r\n"
    #[inline(always)]
    pub(crate) fn request_line(&self) -> usize {
        19 + self.url_size
    }

    // Header line:
    // Name + ": " + Value + "\r\n"
    #[inline(always)]
    pub(crate) fn header_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }

    /// Read buffer size for one connection: request line plus a quarter of
    /// the header budget, clamped to a sane range.
    #[inline(always)]
    pub(crate) fn read_buffer(&self) -> usize {
        let estimate = self.request_line() + self.header_count / 4 * self.header_line();
        estimate.clamp(1024, 64 * 1024)
    }
}

/// Response serialization buffers.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial capacity of the serialized head buffer, in bytes (default: `512`).
    pub default_capacity: usize,

    /// Header fields a response holds before its header map grows (default: `16`).
    pub header_capacity: usize,

    /// Write buffer size for streamed bodies, which also bounds the size of
    /// one chunk on the wire (default: `8 KiB`).
    pub stream_chunk_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 512,
            header_capacity: 16,
            stream_chunk_size: 8 * 1024,

            _priv: (),
        }
    }
}
