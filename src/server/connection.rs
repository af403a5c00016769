use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::Response,
        types::{list_items, Method, Methods, StatusCode, Version},
        validators::{self, fmt_date, ResourceInfo},
    },
    limits::{ConnLimits, ReqLimits, RespLimits},
    server::{
        entity::{self, Framing},
        responder::{self, HostTable, Site},
        writer,
    },
};
use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::SocketAddr,
    sync::Arc,
    time::{Instant, SystemTime},
};

/// Where a connection is in its serve loop. Logged on errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    AwaitingRequest,
    ParsingRequestLine,
    ParsingHeaders,
    Routing,
    ValidatingPreconditions,
    Dispatching,
    ReadingEntity,
    BuildingResponse,
    Sending,
    Closed,
}

/// Serves the requests of one connection, one after the other.
///
/// Owned by a worker and reused for every connection it handles, so the
/// request and response buffers are allocated once.
pub(crate) struct HttpConnection {
    hosts: Arc<HostTable>,

    connection: Connection,
    pub(crate) request: Request,
    pub(crate) response: Response,
    phase: Phase,

    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
}

impl HttpConnection {
    #[inline]
    pub(crate) fn new(
        hosts: Arc<HostTable>,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
    ) -> Self {
        Self {
            hosts,

            connection: Connection::new(),
            request: Request::new(&req_limits),
            response: Response::new(&resp_limits),
            phase: Phase::Closed,

            conn_limits,
            req_limits,
            resp_limits,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.request.reset();
        self.response.reset();
    }
}

impl HttpConnection {
    /// Runs the serve loop until the connection is done.
    ///
    /// A peer that goes away, cleanly or through a timeout, is not an error.
    pub(crate) fn run<S: Read + Write>(&mut self, stream: S, peer: SocketAddr) -> io::Result<()> {
        self.connection.reset();

        let mut io = BufReader::with_capacity(self.req_limits.read_buffer(), stream);
        let result = self.serve(&mut io, peer);

        tracing::trace!(%peer, requests = self.connection.request_count, "connection closed");
        self.phase = Phase::Closed;

        match result {
            Err(err) if is_timeout(&err) => Ok(()),
            result => result,
        }
    }

    fn serve<S: Read + Write>(&mut self, io: &mut BufReader<S>, peer: SocketAddr) -> io::Result<()> {
        loop {
            self.reset_request_response();
            self.request.client_addr = peer;
            self.phase = Phase::AwaitingRequest;

            if io.fill_buf()?.is_empty() {
                return Ok(());
            }

            let persistent = match self.read_head(io) {
                Ok(()) => self.handle(io)?,
                Err(ErrorKind::RemoteClosed) => return Ok(()),
                Err(ErrorKind::Io(err)) => return Err(err.0),
                Err(err) => return self.send_error(io.get_mut(), err),
            };

            self.connection.request_count += 1;
            if !persistent {
                return Ok(());
            }
        }
    }

    fn read_head<R: BufRead>(&mut self, io: &mut R) -> Result<(), ErrorKind> {
        self.phase = Phase::ParsingRequestLine;
        let authority = self.request.read_request_line(io, &self.req_limits)?;

        self.phase = Phase::ParsingHeaders;
        self.request.read_headers(io, &self.req_limits, authority)
    }

    /// Answers a request whose head could not be parsed, then gives up on the
    /// connection.
    fn send_error<W: Write>(&mut self, stream: &mut W, err: ErrorKind) -> io::Result<()> {
        let Some(status) = err.status() else {
            return Ok(());
        };
        tracing::warn!(error = %err, %status, phase = ?self.phase, "malformed request");

        self.response.reset();
        self.response.status(status);

        let host = Arc::clone(&self.hosts.default_site().host);
        self.phase = Phase::Sending;
        writer::send_response(stream, &self.request, &mut self.response, &*host, false, &self.resp_limits)?;
        Ok(())
    }

    /// Handles one parsed request. Returns whether the connection stays open.
    fn handle<S: Read + Write>(&mut self, io: &mut BufReader<S>) -> io::Result<bool> {
        let wants_close = self
            .request
            .header("connection")
            .is_some_and(|value| list_items(value).any(|t| t.eq_ignore_ascii_case("close")));
        let mut persistent =
            self.request.version() == Version::Http11 && !wants_close && !self.is_expired();

        self.phase = Phase::Routing;
        let site = self.hosts.lookup(self.request.header("host")).clone();
        self.request.host = Arc::clone(&site.host);

        let mut entity_pending = Framing::announced(self.request.headers());
        if let Err(status) = self.process(io, &site, &mut entity_pending) {
            self.response.clear_bodies();
            self.response.status(status);
        }

        let status = self.response.status_code().unwrap_or(StatusCode::Ok);
        tracing::debug!(
            method = %self.request.method(),
            path = self.request.path(),
            status = status.as_u16(),
            "request served"
        );

        persistent &= !status.is_error();
        if persistent && entity_pending {
            // Entity of a request answered without dispatch.
            persistent =
                entity::discard_entity(io, &self.request, &self.req_limits, false).is_ok();
        }

        self.phase = Phase::Sending;
        let host = Arc::clone(&self.request.host);
        writer::send_response(
            io.get_mut(),
            &self.request,
            &mut self.response,
            &*host,
            persistent,
            &self.resp_limits,
        )
    }

    /// Routing, preconditions and dispatch. An `Err` status replaces whatever
    /// the response holds.
    fn process<S: Read + Write>(
        &mut self,
        io: &mut BufReader<S>,
        site: &Site,
        entity_pending: &mut bool,
    ) -> Result<(), StatusCode> {
        let method = self.request.method();
        if method == Method::Unsupported {
            return Err(StatusCode::NotImplemented);
        }

        if self.request.target() == "*" {
            self.response
                .status(StatusCode::Ok)
                .header("Allow", Methods::ALL.to_string());
            return Ok(());
        }

        let route = site.router.find(self.request.path());
        self.request.route.clone_from(&route.path);

        let Some(responder) = route.responder else {
            return Err(StatusCode::NotFound);
        };

        // A method the responder lacks is answered like a missing resource.
        let allow = responder::allowed(&*responder);
        if !responder::is_allowed(&*responder, method) {
            self.response.header("Allow", allow.to_string());
            return Err(StatusCode::NotFound);
        }

        self.phase = Phase::ValidatingPreconditions;
        let now = SystemTime::now();
        let info = responder.resource_info(&self.request).clamp(now);

        if let Some(status) = validators::evaluate(method, self.request.headers_mut(), &info, now) {
            self.response.status(status);
            self.resource_headers(&info, allow, now);
            return Ok(());
        }

        self.phase = Phase::Dispatching;
        match method {
            Method::Get | Method::Head => {
                self.discard(io, entity_pending)?;
                responder.get(&self.request, &mut self.response);
            }
            Method::Post | Method::Put => {
                self.phase = Phase::ReadingEntity;
                entity::read_entity(io, &mut self.request, route.keywords.as_deref(), &self.req_limits)
                    .map_err(|err| {
                        tracing::warn!(error = %err, path = self.request.path(), "entity rejected");
                        err.status()
                    })?;
                *entity_pending = false;

                self.phase = Phase::Dispatching;
                match method {
                    Method::Post => responder.post(&self.request, &mut self.response),
                    _ => responder.put(&self.request, &mut self.response),
                };
            }
            Method::Delete => {
                self.discard(io, entity_pending)?;
                responder.delete(&self.request, &mut self.response);
            }
            Method::Options => {
                self.discard(io, entity_pending)?;
                self.response.status(StatusCode::Ok).finish();
            }
            Method::Unsupported => return Err(StatusCode::NotImplemented),
        }

        self.phase = Phase::BuildingResponse;
        self.resource_headers(&info, allow, now);
        Ok(())
    }

    /// Frames and drops an entity sent with a method that takes none.
    fn discard<S: Read + Write>(
        &mut self,
        io: &mut BufReader<S>,
        entity_pending: &mut bool,
    ) -> Result<(), StatusCode> {
        if *entity_pending {
            entity::discard_entity(io, &self.request, &self.req_limits, true)
                .map_err(|err| err.status())?;
            *entity_pending = false;
        }
        Ok(())
    }

    fn resource_headers(&mut self, info: &ResourceInfo, allow: Methods, now: SystemTime) {
        let headers = self.response.headers_mut();

        if let Some(time) = info.last_modified {
            headers.insert("Last-Modified", fmt_date(time));
        }
        if let Some(tag) = &info.etag {
            headers.insert("ETag", tag.to_string());
        }
        headers.insert("Allow", allow.to_string());

        validators::cache_headers(headers, info, now);
    }

    /// `true` when the current request is the last one this connection may
    /// serve.
    #[inline]
    fn is_expired(&self) -> bool {
        self.connection.request_count + 1 >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime
    }
}

#[inline]
fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}
