//! The host server: route table, plugins, handler types and the TCP loop.
//!
//! Routes are declared on a [`Server`] directly or from a [`Plugin`] through a
//! [`Realm`]. Requests reach the first matching route's handler, either from a
//! socket (after [`Server::bind`]) or in-process through [`Server::inject`].
//! Supports HTTP/1.1 persistent connections out of the box.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::context::{Context, ErrorReporter};
use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::plugin::{Plugin, Realm, RegisterOptions};
use crate::router::{
    Handler, HandlerFactory, HandlerOptions, PatternError, PayloadOutput, Reply, RouteConfig,
    RouteHandler,
    RouteInfo, RouteSettings, Router, SettingsOverride,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server options: {0}")]
    Options(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("route {path} has no handler")]
    MissingHandler { path: String },

    #[error("unknown handler type {0:?}")]
    UnknownHandlerType(String),

    #[error("handler type {0:?} is already registered")]
    HandlerTypeExists(String),

    #[error("invalid options for handler type {handler:?}: expected {expected}")]
    InvalidHandlerOptions {
        handler: String,
        expected: &'static str,
    },

    #[error("plugin {0:?} is already registered")]
    PluginAlreadyRegistered(String),

    #[error("route id {0:?} is already in use")]
    DuplicateRouteId(String),
}

/// Events the server broadcasts to subscribers of [`Server::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A request failed in a way the server operator should hear about.
    RequestError {
        method: String,
        path: String,
        message: String,
    },
}

/// Tunables for the connection loop.
///
/// # Examples
///
/// ```
/// use rttp_mount::server::ServerOptions;
///
/// let options = ServerOptions::from_json(r#"{"max_request_size": 1024}"#).unwrap();
/// assert_eq!(options.max_request_size, 1024);
/// assert_eq!(options.initial_buffer_size, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Maximum size of a complete HTTP request buffered before rejecting it.
    pub max_request_size: usize,
    /// Initial read buffer capacity per connection.
    pub initial_buffer_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_request_size: 8 * 1024 * 1024,
            initial_buffer_size: 4096,
        }
    }
}

impl ServerOptions {
    /// Parses options from JSON; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// [`ServerError::Options`] when `json` is malformed.
    pub fn from_json(json: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A request to run through [`Server::inject`] without a socket.
#[derive(Debug, Clone)]
pub struct InjectOptions {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    payload: Bytes,
}

impl InjectOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            payload: Bytes::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    fn into_request(self) -> Request {
        let request = self
            .headers
            .into_iter()
            .fold(Request::new(self.method, self.url), |req, (name, value)| {
                req.header(name, value)
            });
        if self.payload.is_empty() {
            request
        } else {
            request.body_bytes(self.payload)
        }
    }
}

impl From<&str> for InjectOptions {
    /// A `GET` of `url`.
    fn from(url: &str) -> Self {
        Self::new(Method::Get, url)
    }
}

impl From<Request> for InjectOptions {
    fn from(request: Request) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().to_owned(),
            headers: request
                .headers()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            payload: request.body().clone(),
        }
    }
}

/// The host HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_mount::context::Context;
/// use rttp_mount::http::{Response, StatusCode};
/// use rttp_mount::router::RouteConfig;
/// use rttp_mount::server::{Server, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut server = Server::new(ServerOptions::default());
///     server.route(RouteConfig::new("GET", "/").handler(|_ctx: Context| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }))?;
///     server.bind("127.0.0.1:8080").await?.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    options: ServerOptions,
    router: Router,
    handlers: HashMap<String, Arc<dyn HandlerFactory>>,
    plugins: HashSet<String>,
    events: broadcast::Sender<ServerEvent>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            options,
            router: Router::new(),
            handlers: HashMap::new(),
            plugins: HashSet::new(),
            events,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Subscribes to server events.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Registers a named handler type.
    ///
    /// # Errors
    ///
    /// [`ServerError::HandlerTypeExists`] when `name` is taken.
    pub fn handler(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<(), ServerError> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(ServerError::HandlerTypeExists(name));
        }
        debug!(handler = %name, "handler type registered");
        self.handlers.insert(name, factory);
        Ok(())
    }

    /// Adds a route at the root realm.
    ///
    /// # Errors
    ///
    /// See [`ServerError`]: invalid path, missing or unknown handler, options
    /// the handler type rejects, or a duplicate route id.
    pub fn route(&mut self, config: RouteConfig) -> Result<(), ServerError> {
        self.route_in(config, None)
    }

    pub(crate) fn route_in(
        &mut self,
        config: RouteConfig,
        prefix: Option<&str>,
    ) -> Result<(), ServerError> {
        let RouteConfig {
            method,
            path,
            id,
            settings,
            handler,
        } = config;

        let full_path = match prefix {
            Some(prefix) if path == "/" => prefix.to_owned(),
            Some(prefix) => format!("{prefix}{path}"),
            None => path,
        };
        if let Some(id) = &id {
            if self.router.lookup(id).is_some() {
                return Err(ServerError::DuplicateRouteId(id.clone()));
            }
        }
        let Some(handler) = handler else {
            return Err(ServerError::MissingHandler { path: full_path });
        };

        let resolved = match handler {
            RouteHandler::Direct(handler) => Resolved::Direct(handler),
            RouteHandler::Typed { name, options } => {
                let factory = self
                    .handlers
                    .get(&name)
                    .cloned()
                    .ok_or(ServerError::UnknownHandlerType(name))?;
                Resolved::Typed(factory, options)
            }
        };

        let defaults = match &resolved {
            Resolved::Direct(_) => SettingsOverride::default(),
            Resolved::Typed(factory, _) => factory.defaults(),
        };
        let effective = RouteSettings::default()
            .merged(&defaults)
            .merged(&settings);
        let info = Arc::new(RouteInfo::new(
            method,
            full_path,
            prefix.map(str::to_owned),
            id,
            effective,
        )?);

        let handler = match resolved {
            Resolved::Direct(handler) => handler,
            Resolved::Typed(factory, options) => factory.build(&info, options)?,
        };

        debug!(method = %info.method(), path = %info.path(), "route added");
        self.router.add(info, handler);
        Ok(())
    }

    /// Registers `plugin` at the root realm.
    ///
    /// # Errors
    ///
    /// [`ServerError::PluginAlreadyRegistered`] for a second plugin of the same
    /// name that does not allow repeat registration, or whatever the plugin's
    /// own registration reports.
    pub fn register(&mut self, plugin: &dyn Plugin) -> Result<(), ServerError> {
        self.register_with(plugin, RegisterOptions::default())
    }

    /// Registers `plugin` with routes under `options.prefix`.
    ///
    /// # Errors
    ///
    /// As for [`Server::register`].
    pub fn register_with(
        &mut self,
        plugin: &dyn Plugin,
        options: RegisterOptions,
    ) -> Result<(), ServerError> {
        self.register_in(plugin, options.prefix.as_deref().and_then(normalize_prefix))
    }

    pub(crate) fn register_in(
        &mut self,
        plugin: &dyn Plugin,
        prefix: Option<String>,
    ) -> Result<(), ServerError> {
        let attributes = plugin.attributes();
        if self.plugins.contains(&attributes.name) {
            if attributes.once {
                debug!(plugin = %attributes.name, "plugin already registered, skipping");
                return Ok(());
            }
            return Err(ServerError::PluginAlreadyRegistered(attributes.name));
        }

        info!(
            plugin = %attributes.name,
            version = attributes.version.as_deref().unwrap_or("-"),
            prefix = prefix.as_deref().unwrap_or("/"),
            "registering plugin"
        );
        self.plugins.insert(attributes.name);
        let mut realm = Realm::new(self, prefix);
        plugin.register(&mut realm)
    }

    /// Whether a plugin named `name` has been registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.contains(name)
    }

    /// Finds a route by id.
    pub fn lookup(&self, id: &str) -> Option<Arc<RouteInfo>> {
        self.router.lookup(id)
    }

    /// Runs a request through the route table without a socket.
    pub async fn inject(&self, options: impl Into<InjectOptions>) -> Response {
        self.dispatch(options.into().into_request()).await
    }

    /// Routes `request` and turns the handler's reply into the response to send.
    pub async fn dispatch(&self, request: Request) -> Response {
        let Some((route, handler, params)) = self.router.find(request.method(), request.path())
        else {
            debug!(method = %request.method(), path = %request.path(), "no route matched");
            return failure(StatusCode::NotFound, "Not Found");
        };

        let settings = route.settings().clone();
        let mut ctx = Context::new(request, params, Arc::clone(&route), self.reporter());

        if settings.payload.output == PayloadOutput::Data {
            // The host took the payload; the raw stream is left drained.
            let _drained = ctx.raw().0.read();
        }

        if settings.payload.parse && is_json(ctx.request()) && !ctx.request().body().is_empty() {
            match serde_json::from_slice(ctx.request().body()) {
                Ok(payload) => ctx.set_payload(payload),
                Err(err) => {
                    debug!(path = %route.path(), error = %err, "rejecting payload");
                    return failure(StatusCode::BadRequest, "Invalid request payload JSON format");
                }
            }
        }
        if settings.state.parse {
            let cookies = ctx.request().headers().cookies();
            ctx.set_cookies(cookies);
        }

        match handler(ctx).await {
            Ok(Reply::Response(response)) | Ok(Reply::Closed(response)) => response,
            Err(err) => {
                self.reporter().report(&route, err.to_string());
                failure(
                    StatusCode::InternalServerError,
                    "An internal server error occurred",
                )
            }
        }
    }

    fn reporter(&self) -> ErrorReporter {
        ErrorReporter::new(self.events.clone())
    }

    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(self, addr: impl AsRef<str>) -> Result<Listener, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Listener {
            listener,
            local_addr,
            server: Arc::new(self),
        })
    }
}

enum Resolved {
    Direct(Handler),
    Typed(Arc<dyn HandlerFactory>, HandlerOptions),
}

/// A bound server, ready to accept connections.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Arc<Server>,
}

impl Listener {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "rttp-mount listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let server = Arc::clone(&self.server);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, server).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<Server>,
) -> Result<(), std::io::Error> {
    let max_request_size = server.options().max_request_size;
    let mut buf = BytesMut::with_capacity(server.options().initial_buffer_size);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > max_request_size {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (head, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let total_needed = body_offset + head.content_length().unwrap_or(0);
        if buf.len() < total_needed {
            continue;
        }

        // Re-parse over exactly this request so pipelined bytes stay in the buffer.
        let consumed = buf.split_to(total_needed);
        let (request, _) = match Request::parse(&consumed) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                break;
            }
        };
        let wants_keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = server.dispatch(request).await;
        // A truncated response has already chosen to close.
        let keep_alive = wants_keep_alive && response.is_keep_alive();
        stream
            .write_all(&response.keep_alive(keep_alive).into_bytes())
            .await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get("content-type")
        .is_some_and(|value| value.trim_start().starts_with("application/json"))
}

// The host's own error responses.
fn failure(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({
        "statusCode": status.as_u16(),
        "error": status.canonical_reason(),
        "message": message,
    });
    Response::new(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(body.to_string())
}

pub(crate) fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else if trimmed.starts_with('/') {
        Some(trimmed.to_owned())
    } else {
        Some(format!("/{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn hello() -> RouteConfig {
        RouteConfig::new("GET", "/hello").handler(|_ctx: Context| async {
            Response::new(StatusCode::Ok).body("hi")
        })
    }

    // ── configuration ────────────────────────────────────────────────────────

    #[test]
    fn options_defaults_and_json() {
        let options = ServerOptions::default();
        assert_eq!(options.max_request_size, 8 * 1024 * 1024);
        assert_eq!(options.initial_buffer_size, 4096);
        assert!(matches!(
            ServerOptions::from_json("{"),
            Err(ServerError::Options(_))
        ));
    }

    #[test]
    fn prefixes_are_normalized() {
        assert_eq!(normalize_prefix("/api/"), Some("/api".into()));
        assert_eq!(normalize_prefix("api"), Some("/api".into()));
        assert_eq!(normalize_prefix("/"), None);
    }

    #[test]
    fn route_errors() {
        let mut server = Server::default();
        assert!(matches!(
            server.route(RouteConfig::new("GET", "/none")),
            Err(ServerError::MissingHandler { .. })
        ));
        assert!(matches!(
            server.route(RouteConfig::new("GET", "/x").handler_type("missing", ())),
            Err(ServerError::UnknownHandlerType(name)) if name == "missing"
        ));
        assert!(matches!(
            server.route(hello().handler(|_ctx: Context| async {
                Response::new(StatusCode::Ok)
            }).id("a")),
            Ok(())
        ));
        assert!(matches!(
            server.route(hello().id("a")),
            Err(ServerError::DuplicateRouteId(id)) if id == "a"
        ));
        assert!(matches!(
            server.route(RouteConfig::new("GET", "/{bad").handler(|_ctx: Context| async {
                Response::new(StatusCode::Ok)
            })),
            Err(ServerError::InvalidPattern(_))
        ));
    }

    struct Fixed;

    impl HandlerFactory for Fixed {
        fn build(
            &self,
            _route: &Arc<RouteInfo>,
            options: HandlerOptions,
        ) -> Result<Handler, ServerError> {
            let body = options
                .downcast::<&'static str>()
                .map_err(|_| ServerError::InvalidHandlerOptions {
                    handler: "fixed".into(),
                    expected: "&'static str",
                })?;
            Ok(crate::router::handler_fn(move |_ctx: Context| async move {
                Response::new(StatusCode::Ok).body(body)
            }))
        }

        fn defaults(&self) -> SettingsOverride {
            SettingsOverride::default().state_parse(false)
        }
    }

    #[tokio::test]
    async fn handler_types_build_routes_with_defaults() {
        let mut server = Server::default();
        server.handler("fixed", Arc::new(Fixed)).unwrap();
        assert!(matches!(
            server.handler("fixed", Arc::new(Fixed)),
            Err(ServerError::HandlerTypeExists(_))
        ));

        server
            .route(RouteConfig::new("GET", "/f").id("f").handler_type("fixed", "body"))
            .unwrap();
        assert!(matches!(
            server.route(RouteConfig::new("GET", "/g").handler_type("fixed", 3_u8)),
            Err(ServerError::InvalidHandlerOptions { .. })
        ));

        let route = server.lookup("f").unwrap();
        assert!(!route.settings().state.parse);
        assert!(route.settings().payload.parse);
        assert_eq!(server.inject("/f").await.text(), "body");
    }

    // ── dispatch ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unmatched_requests_get_404() {
        let mut server = Server::default();
        server.route(hello()).unwrap();
        assert_eq!(server.inject("/hello").await.text(), "hi");

        let res = server.inject("/nope").await;
        assert_eq!(res.status(), StatusCode::NotFound);
        let body: serde_json::Value = serde_json::from_slice(res.payload()).unwrap();
        assert_eq!(body["statusCode"], 404);
    }

    #[tokio::test]
    async fn payload_and_cookies_are_parsed_when_enabled() {
        let mut server = Server::default();
        server
            .route(RouteConfig::new("POST", "/echo").handler(|ctx: Context| async move {
                let name = ctx
                    .payload()
                    .and_then(|p| p["name"].as_str())
                    .unwrap_or("none")
                    .to_owned();
                let session = ctx
                    .cookies()
                    .and_then(|c| c.get("session").cloned())
                    .unwrap_or_default();
                Response::new(StatusCode::Ok).body(format!("{name}/{session}"))
            }))
            .unwrap();

        let res = server
            .inject(
                InjectOptions::new(Method::Post, "/echo")
                    .header("Content-Type", "application/json")
                    .header("Cookie", "session=abc")
                    .payload(r#"{"name":"ada"}"#),
            )
            .await;
        assert_eq!(res.text(), "ada/abc");

        let res = server
            .inject(
                InjectOptions::new(Method::Post, "/echo")
                    .header("Content-Type", "application/json")
                    .payload("{nope"),
            )
            .await;
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn raw_body_is_left_only_to_stream_routes() {
        let raw_body = |ctx: Context| async move {
            let body = ctx.raw().0.read();
            Response::new(StatusCode::Ok).body(format!("[{}]", String::from_utf8_lossy(&body)))
        };
        let mut server = Server::default();
        server
            .route(RouteConfig::new("POST", "/data").handler(raw_body))
            .unwrap();
        server
            .route(
                RouteConfig::new("POST", "/stream")
                    .payload_output(PayloadOutput::Stream)
                    .handler(raw_body),
            )
            .unwrap();

        let send = |url: &str| InjectOptions::new(Method::Post, url).payload("body");
        assert_eq!(server.inject(send("/data")).await.text(), "[]");
        assert_eq!(server.inject(send("/stream")).await.text(), "[body]");
    }

    #[tokio::test]
    async fn handler_errors_become_500_and_are_reported() {
        let mut server = Server::default();
        let mut events = server.events();
        server
            .route(RouteConfig::new("*", "/fail").handler(|_ctx: Context| async {
                Err::<Response, _>(crate::router::HandlerError::msg("broken"))
            }))
            .unwrap();

        let res = server.inject(InjectOptions::new(Method::Delete, "/fail")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(
            events.try_recv().unwrap(),
            ServerEvent::RequestError {
                method: "*".into(),
                path: "/fail".into(),
                message: "broken".into(),
            }
        );
    }

    #[tokio::test]
    async fn closed_replies_are_sent_verbatim() {
        let mut server = Server::default();
        server
            .route(RouteConfig::new("GET", "/raw").handler(|_ctx: Context| async {
                Reply::Closed(Response::verbatim(
                    StatusCode::Ok,
                    Headers::new(),
                    Bytes::from_static(b"raw"),
                ))
            }))
            .unwrap();
        let res = server.inject("/raw").await;
        assert!(res.is_verbatim());
        assert_eq!(res.text(), "raw");
    }

    #[test]
    fn inject_options_from_request_keep_everything() {
        let request = Request::new(Method::Put, "/a?b=c")
            .header("X-Test", "1")
            .body_bytes("data");
        let rebuilt = InjectOptions::from(request).into_request();
        assert_eq!(rebuilt.method(), &Method::Put);
        assert_eq!(rebuilt.url(), "/a?b=c");
        assert_eq!(rebuilt.headers().get("x-test"), Some("1"));
        assert_eq!(rebuilt.body().as_ref(), b"data");
    }
}
