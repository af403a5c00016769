//! maker_http - HTTP/1.1 protocol engine for embedded web services
//!
//! A blocking, thread-per-connection HTTP/1.x server with the parts of the
//! protocol that are easy to get wrong already done: persistent connections,
//! entity framing in both directions, content negotiation, conditional
//! requests and byte ranges. Applications only implement [`Responder`].
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, chunked transfer coding,
//!   `Expect: 100-continue`, `OPTIONS *`, absolute-form targets
//! - **HTTP/1.0**: close-delimited responses, no `Host` requirement
//!
//! # What the engine does for you
//!
//! - **Entity pipeline**: `Content-Length`, chunked, `gzip`, `deflate` and
//!   `bzip2` request bodies are decoded before your responder sees them, and
//!   form bodies are split into [`Keyword`]s
//! - **Negotiation**: [`Response::representation`] and
//!   [`Response::compute_from`] let the engine choose a coding by
//!   `Accept-Encoding`
//! - **Preconditions**: `If-Match`, `If-None-Match`, `If-Modified-Since` and
//!   `If-Unmodified-Since` are evaluated from [`ResourceInfo`] before dispatch
//! - **Ranges**: single ranges become `206`, several become
//!   `multipart/byteranges`
//! - **Virtual hosts**: sites are selected by the `Host` header
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use maker_http::{Handled, Request, Responder, Response, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct Hello;
//!
//! impl Responder for Hello {
//!     fn get(&self, _: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok)
//!             .header("Content-Type", "text/plain")
//!             .body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await?)
//!         .route("/", Hello)
//!         .build()
//!         .launch()
//!         .await
//! }
//! ```
//! Forms and validators:
//! ```no_run
//! use maker_http::{
//!     EntityTag, Handled, Methods, Request, ResourceInfo, Responder, Response, Server,
//! };
//! use tokio::net::TcpListener;
//!
//! struct Guestbook;
//!
//! impl Responder for Guestbook {
//!     fn methods(&self) -> Methods {
//!         Methods::GET | Methods::POST
//!     }
//!
//!     fn resource_info(&self, _: &Request) -> ResourceInfo {
//!         ResourceInfo {
//!             etag: Some(EntityTag::weak("book-7")),
//!             ..ResourceInfo::default()
//!         }
//!     }
//!
//!     fn get(&self, _: &Request, resp: &mut Response) -> Handled {
//!         resp.body("No entries yet")
//!     }
//!
//!     fn post(&self, req: &Request, resp: &mut Response) -> Handled {
//!         match req.keyword("name").and_then(|name| name.as_str()) {
//!             Some(name) => resp.body(format!("Thanks, {name}")),
//!             None => resp.body("Who are you?"),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await?)
//!         .route("/guestbook", Guestbook)
//!         .build()
//!         .launch()
//!         .await
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod encoding;
    pub mod query;
    pub(crate) mod range;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
    pub(crate) mod validators;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod entity;
    pub(crate) mod responder;
    pub(crate) mod server_impl;
    pub(crate) mod writer;
}
pub(crate) mod errors;
pub mod filter;
pub mod limits;

pub use crate::{
    errors::EntityError,
    filter::FilterError,
    http::{
        encoding::Encoding,
        query,
        range::{ByteRange, RangeList, Span},
        request::{Keyword, Request},
        response::{
            write::{BodyWriter, WriteBuffer},
            Body, BodyStream, Cookie, Handled, ReadSeek, Response,
        },
        types::{HeaderMap, Method, Methods, StatusCode, Version},
        validators::{fmt_date, parse_date, CachePolicy, EntityTag, ResourceInfo},
    },
    server::{
        responder::{
            DefaultHost, Host, HostTable, PathRouter, Responder, Route, Router, Site,
            StandardResponse,
        },
        server_impl::{Server, ServerBuilder},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::limits::ReqLimits::default()),
        &mut Response::new(&crate::limits::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impl_default_responder {
    ($name:ident) => {
        use maker_http::{Handled, Request, Responder, Response};
        struct $name;

        impl Responder for $name {
            fn get(&self, _: &Request, resp: &mut Response) -> Handled {
                resp.body("Hello world!")
            }
        }
    };
}
