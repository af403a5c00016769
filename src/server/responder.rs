//! Application-facing interfaces: responders, routers and hosts

use crate::{
    http::{
        request::Request,
        response::{Handled, Response},
        types::{Method, Methods, StatusCode},
        validators::ResourceInfo,
    },
};
use std::sync::{Arc, OnceLock};

/// Serves one resource.
///
/// Only the operations listed by [`methods`](Responder::methods) are ever
/// dispatched; any other method is answered with `404 Not Found` and an
/// `Allow` header listing the methods that are. `HEAD` is served by [`get`](Responder::get) with the
/// entity suppressed, and `OPTIONS` is answered by the engine.
///
/// Responders run on worker threads with blocking I/O, one request at a time
/// per connection, and may be shared by many connections at once.
///
/// # Examples
/// ```
/// use maker_http::{EntityTag, Handled, Methods, Request, ResourceInfo, Responder, Response};
///
/// struct Motd;
///
/// impl Responder for Motd {
///     fn methods(&self) -> Methods {
///         Methods::GET | Methods::PUT
///     }
///
///     fn resource_info(&self, _: &Request) -> ResourceInfo {
///         ResourceInfo {
///             etag: Some(EntityTag::strong("motd-1")),
///             ..ResourceInfo::default()
///         }
///     }
///
///     fn get(&self, _: &Request, resp: &mut Response) -> Handled {
///         resp.header("Content-Type", "text/plain").body("Have a nice day")
///     }
///
///     fn put(&self, req: &Request, resp: &mut Response) -> Handled {
///         resp.body(req.body().len())
///     }
/// }
/// ```
pub trait Responder: Send + Sync + 'static {
    /// Methods this responder implements (default: `GET`).
    fn methods(&self) -> Methods {
        Methods::GET
    }

    /// Validators and cache policy of the resource, consulted before dispatch.
    fn resource_info(&self, _req: &Request) -> ResourceInfo {
        ResourceInfo::default()
    }

    fn get(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::NotFound).finish()
    }

    /// Called with the decoded entity in [`Request::body`] or
    /// [`Request::keywords`].
    fn post(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::NotFound).finish()
    }

    /// Called with the decoded entity, like [`post`](Responder::post).
    fn put(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::NotFound).finish()
    }

    fn delete(&self, _req: &Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::NotFound).finish()
    }
}

/// Methods advertised for a routed resource.
#[inline]
pub(crate) fn allowed(responder: &dyn Responder) -> Methods {
    responder.methods().allow()
}

#[inline]
pub(crate) fn is_allowed(responder: &dyn Responder, method: Method) -> bool {
    allowed(responder).contains(method)
}

/// Result of a router lookup.
#[derive(Clone, Default)]
pub struct Route {
    /// Identifier of the matched route, e.g. the pattern that matched.
    pub path: String,
    pub responder: Option<Arc<dyn Responder>>,
    /// Form keywords the route accepts. `None` keeps every keyword.
    pub keywords: Option<Vec<String>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("responder", &self.responder.is_some())
            .field("keywords", &self.keywords)
            .finish()
    }
}

/// Maps a normalized request path to a responder.
pub trait Router: Send + Sync + 'static {
    fn find(&self, path: &str) -> Route;
}

/// Minimal [`Router`]: exact paths, plus prefix patterns ending in `/*`.
///
/// The longest matching pattern wins.
///
/// # Examples
/// ```
/// # maker_http::impl_default_responder!{Hello}
/// use maker_http::{PathRouter, Router};
///
/// let mut router = PathRouter::default();
/// router.add("/", Hello);
/// router.add("/static/*", Hello);
///
/// assert_eq!(router.find("/").path, "/");
/// assert_eq!(router.find("/static/css/site.css").path, "/static/*");
/// assert!(router.find("/missing").responder.is_none());
/// ```
#[derive(Default)]
pub struct PathRouter {
    routes: Vec<(String, Arc<dyn Responder>, Option<Vec<String>>)>,
}

impl PathRouter {
    pub fn add<P: Into<String>, R: Responder>(&mut self, pattern: P, responder: R) -> &mut Self {
        self.routes.push((pattern.into(), Arc::new(responder), None));
        self
    }

    /// Like [`add`](Self::add), restricting form keywords to `keywords`.
    pub fn add_with_keywords<P, R, K>(&mut self, pattern: P, responder: R, keywords: K) -> &mut Self
    where
        P: Into<String>,
        R: Responder,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let keywords = keywords.into_iter().map(Into::into).collect();
        self.routes
            .push((pattern.into(), Arc::new(responder), Some(keywords)));
        self
    }

    fn matches(pattern: &str, path: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => {
                path.starts_with(prefix) || path == &prefix[..prefix.len() - 1]
            }
            _ => pattern == path,
        }
    }
}

impl Router for PathRouter {
    fn find(&self, path: &str) -> Route {
        self.routes
            .iter()
            .filter(|(pattern, ..)| Self::matches(pattern, path))
            .max_by_key(|(pattern, ..)| pattern.len())
            .map(|(pattern, responder, keywords)| Route {
                path: pattern.clone(),
                responder: Some(Arc::clone(responder)),
                keywords: keywords.clone(),
            })
            .unwrap_or_else(|| Route {
                path: path.to_owned(),
                ..Route::default()
            })
    }
}

// HOST

/// Body used when a response has none of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardResponse {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// A (virtual) server: its name and its fallback bodies.
pub trait Host: Send + Sync + 'static {
    /// Value of the `Server` header. Empty suppresses the header.
    fn name(&self) -> &str;

    /// Fallback body for `status`, used when the responder set none.
    fn standard_response(&self, status: StatusCode) -> Option<StandardResponse>;
}

/// Renders a small HTML page for error statuses.
#[derive(Debug, Clone)]
pub struct DefaultHost {
    name: String,
}

impl DefaultHost {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self { name: name.into() }
    }
}

impl Default for DefaultHost {
    fn default() -> Self {
        Self::new(concat!("maker_http/", env!("CARGO_PKG_VERSION")))
    }
}

impl Host for DefaultHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn standard_response(&self, status: StatusCode) -> Option<StandardResponse> {
        if !status.is_error() {
            return None;
        }

        let body = format!(
            "<!DOCTYPE html>\n<html><head><title>{status}</title></head>\
             <body><h1>{status}</h1></body></html>\n"
        );
        Some(StandardResponse {
            content_type: "text/html; charset=utf-8".to_owned(),
            body: body.into_bytes(),
        })
    }
}

/// Host of a request that was not routed yet.
struct DummyHost;

impl Host for DummyHost {
    fn name(&self) -> &str {
        ""
    }

    fn standard_response(&self, _: StatusCode) -> Option<StandardResponse> {
        None
    }
}

pub(crate) fn dummy_host() -> Arc<dyn Host> {
    static DUMMY: OnceLock<Arc<dyn Host>> = OnceLock::new();
    Arc::clone(DUMMY.get_or_init(|| Arc::new(DummyHost)))
}

// HOST TABLE

/// A host with its router.
#[derive(Clone)]
pub struct Site {
    pub host: Arc<dyn Host>,
    pub router: Arc<dyn Router>,
}

/// Selects a [`Site`] by the request's `Host` header.
///
/// Names compare case-insensitively with the port stripped. Unknown or absent
/// hosts fall back to the default site. Read-only once the server runs.
#[derive(Clone)]
pub struct HostTable {
    default: Site,
    sites: Vec<(String, Site)>,
}

impl HostTable {
    pub fn new(default: Site) -> Self {
        Self {
            default,
            sites: Vec::new(),
        }
    }

    pub fn add<N: Into<String>>(&mut self, name: N, site: Site) -> &mut Self {
        self.sites.push((name.into(), site));
        self
    }

    #[inline]
    pub fn default_site(&self) -> &Site {
        &self.default
    }

    pub fn lookup(&self, host: Option<&str>) -> &Site {
        let Some(host) = host.map(strip_port) else {
            return &self.default;
        };

        self.sites
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(host))
            .map_or(&self.default, |(_, site)| site)
    }
}

fn strip_port(host: &str) -> &str {
    let host = host.trim();

    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;
    impl Responder for Nothing {}

    struct Everything;
    impl Responder for Everything {
        fn methods(&self) -> Methods {
            Methods::ALL
        }
    }

    #[test]
    fn path_router() {
        let mut router = PathRouter::default();
        router
            .add("/", Nothing)
            .add("/files/*", Nothing)
            .add("/files/private/*", Everything)
            .add_with_keywords("/form", Nothing, ["name", "file"]);

        #[rustfmt::skip]
        let cases = [
            ("/", Some("/")),
            ("/files", Some("/files/*")),
            ("/files/", Some("/files/*")),
            ("/files/a/b", Some("/files/*")),
            ("/files/private/key", Some("/files/private/*")),
            ("/filesystem", None),
            ("/form", Some("/form")),
            ("/form/", None),
        ];

        for (path, expected) in cases {
            let route = router.find(path);
            match expected {
                Some(pattern) => {
                    assert_eq!(route.path, pattern, "{path}");
                    assert!(route.responder.is_some());
                }
                None => {
                    assert_eq!(route.path, path);
                    assert!(route.responder.is_none(), "{path}");
                }
            }
        }

        assert_eq!(
            router.find("/form").keywords,
            Some(vec!["name".to_string(), "file".to_string()])
        );
        assert_eq!(router.find("/").keywords, None);
    }

    #[test]
    fn allowed_methods() {
        assert_eq!(allowed(&Nothing).to_string(), "GET, HEAD, OPTIONS");
        assert!(is_allowed(&Nothing, Method::Head));
        assert!(!is_allowed(&Nothing, Method::Put));
        assert!(is_allowed(&Everything, Method::Delete));
    }

    #[test]
    fn host_table() {
        let site = |name: &str| Site {
            host: Arc::new(DefaultHost::new(name)),
            router: Arc::new(PathRouter::default()),
        };

        let mut table = HostTable::new(site("default"));
        table.add("example.com", site("example")).add("::1", site("v6"));

        #[rustfmt::skip]
        let cases = [
            (None, "default"),
            (Some("example.com"), "example"),
            (Some("EXAMPLE.com:8080"), "example"),
            (Some("[::1]:80"), "v6"),
            (Some("other.org"), "default"),
            (Some(""), "default"),
        ];

        for (host, expected) in cases {
            assert_eq!(table.lookup(host).host.name(), expected, "{host:?}");
        }
    }

    #[test]
    fn standard_responses() {
        let host = DefaultHost::new("test");

        assert_eq!(host.standard_response(StatusCode::Ok), None);
        assert_eq!(host.standard_response(StatusCode::NotModified), None);

        let page = host.standard_response(StatusCode::NotFound).unwrap();
        assert_eq!(page.content_type, "text/html; charset=utf-8");
        assert!(String::from_utf8(page.body).unwrap().contains("<h1>404 Not Found</h1>"));

        assert_eq!(dummy_host().name(), "");
        assert_eq!(dummy_host().standard_response(StatusCode::NotFound), None);
    }
}
