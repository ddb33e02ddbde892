//! Host routing: match URL patterns and methods to route handlers.
//!
//! Paths use brace-delimited parameters:
//!
//! | Pattern              | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/{id}`        | `/users/42`                | `id → "42"`                     |
//! | `/users/{id?}`       | `/users`                   | `id → ""`                       |
//! | `/files/{rest*}`     | `/files/docs/readme.txt`   | `rest → "docs/readme.txt"`      |
//! | `/pair/{both*2}`     | `/pair/a/b`                | `both → "a/b"`                  |
//!
//! Optional and wildcard parameters may only be the last segment. A wildcard
//! without a count also matches zero segments, so `/files/{rest*}` matches
//! `/files` and `/files/` with `rest → ""`. Trailing slashes are normalized on
//! incoming paths.
//!
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::context::{Context, PathParams};
use crate::http::{Method, MethodFilter, Response};
use crate::raw::StreamError;
use crate::server::ServerError;

pub mod settings;

pub use settings::{PayloadOutput, PayloadSettings, RouteSettings, SettingsOverride, StateSettings};

/// What a route handler produced.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A normal response; the host sends it as-is.
    Response(Response),
    /// The handler already wrote the response on the raw stream. The host sends
    /// this snapshot verbatim and adds nothing of its own.
    Closed(Response),
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

/// Failures a route handler hands back to the host.
///
/// The host answers every one of them with its standard `500` and reports it.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The application behind the route failed before producing any output.
    #[error("upstream application failed: {0}")]
    Upstream(StreamError),

    /// The raw response went away without finishing or failing.
    #[error("response stream was abandoned")]
    Abandoned,

    #[error("{0}")]
    Message(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Return values accepted from route handler closures.
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, HandlerError>;
}

impl IntoReply for Response {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(Reply::Response(self))
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(self)
    }
}

impl<R> IntoReply for Result<R, HandlerError>
where
    R: Into<Reply>,
{
    fn into_reply(self) -> Result<Reply, HandlerError> {
        self.map(Into::into)
    }
}

/// A boxed, `Send` future resolving to a handler's reply.
pub type BoxReply = Pin<Box<dyn Future<Output = Result<Reply, HandlerError>> + Send>>;

/// Type-erased, heap-allocated async route handler.
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be shared across
/// connections without copying the underlying closure. Build one from a closure
/// with [`handler_fn`], or let a [`HandlerFactory`] build it.
pub type Handler = Arc<dyn Fn(Context) -> BoxReply + Send + Sync + 'static>;

/// Erases an async closure into a [`Handler`].
pub fn handler_fn<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + 'static,
{
    Arc::new(move |ctx: Context| -> BoxReply {
        let fut = f(ctx);
        Box::pin(async move { fut.await.into_reply() })
    })
}

/// Opaque options a route passes to a named handler type.
pub struct HandlerOptions(Box<dyn Any + Send>);

impl HandlerOptions {
    pub fn new<T>(options: T) -> Self
    where
        T: Any + Send,
    {
        Self(Box::new(options))
    }

    /// Takes the options out as a `T`, handing them back untouched on mismatch.
    pub fn downcast<T>(self) -> Result<T, Self>
    where
        T: Any + Send,
    {
        self.0.downcast::<T>().map(|boxed| *boxed).map_err(Self)
    }
}

impl std::fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HandlerOptions").finish_non_exhaustive()
    }
}

/// A named handler type: routes select it by name and pass it options, and it
/// builds the concrete [`Handler`] once per route.
pub trait HandlerFactory: Send + Sync + 'static {
    /// Builds the handler for `route` from the route's options.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidHandlerOptions`] when `options` is not something
    /// this handler type understands.
    fn build(&self, route: &Arc<RouteInfo>, options: HandlerOptions) -> Result<Handler, ServerError>;

    /// Route settings every route using this handler type starts from.
    ///
    /// Explicit settings on the route override these field by field.
    fn defaults(&self) -> SettingsOverride {
        SettingsOverride::default()
    }
}

/// A pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Optional(String),
    Wildcard { name: String, count: Option<usize> },
}

impl Segment {
    fn parse(raw: &str, path: &str) -> Result<Self, PatternError> {
        let invalid = || PatternError::InvalidSegment {
            path: path.to_owned(),
            segment: raw.to_owned(),
        };

        let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            if raw.contains(|c: char| c == '{' || c == '}') {
                return Err(invalid());
            }
            return Ok(Self::Static(raw.to_owned()));
        };

        let (name, segment) = if let Some(name) = inner.strip_suffix('?') {
            (name, Self::Optional(name.to_owned()))
        } else if let Some((name, count)) = inner.split_once('*') {
            let count = if count.is_empty() {
                None
            } else {
                match count.parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => return Err(invalid()),
                }
            };
            (
                name,
                Self::Wildcard {
                    name: name.to_owned(),
                    count,
                },
            )
        } else {
            (inner, Self::Param(inner.to_owned()))
        };

        let valid_name =
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid_name { Ok(segment) } else { Err(invalid()) }
    }

    fn is_tail_only(&self) -> bool {
        matches!(self, Self::Optional(_) | Self::Wildcard { .. })
    }
}

/// Reasons a route path fails to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("route path must start with '/': {0:?}")]
    MissingLeadingSlash(String),

    #[error("invalid segment {segment:?} in route path {path:?}")]
    InvalidSegment { path: String, segment: String },

    #[error("{segment:?} must be the last segment of route path {path:?}")]
    NotLast { path: String, segment: String },
}

/// Compiled representation of a route path.
///
/// # Examples
///
/// ```
/// use rttp_mount::router::Pattern;
///
/// let pattern = Pattern::parse("/prefix/{mount*}").unwrap();
/// let params = pattern.matches("/prefix/be/okay").unwrap();
/// assert_eq!(params.get("mount"), Some("be/okay"));
/// assert_eq!(pattern.matches("/prefix").unwrap().get("mount"), Some(""));
/// assert!(pattern.matches("/elsewhere").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `path`.
    ///
    /// # Errors
    ///
    /// - [`PatternError::MissingLeadingSlash`]: `path` is not absolute.
    /// - [`PatternError::InvalidSegment`]: a segment has unbalanced braces, an
    ///   empty or non-identifier name, or a zero or non-numeric wildcard count.
    /// - [`PatternError::NotLast`]: an optional or wildcard parameter is followed
    ///   by more segments.
    pub fn parse(path: &str) -> Result<Self, PatternError> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(PatternError::MissingLeadingSlash(path.to_owned()));
        };

        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let mut segments: Vec<Segment> = Vec::new();
        if !rest.is_empty() {
            for raw in rest.split('/') {
                if let Some(last) = segments.last().filter(|s: &&Segment| s.is_tail_only()) {
                    return Err(PatternError::NotLast {
                        path: path.to_owned(),
                        segment: describe(last),
                    });
                }
                segments.push(Segment::parse(raw, path)?);
            }
        }

        Ok(Self {
            raw: path.to_owned(),
            segments,
        })
    }

    /// The path this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches `path`, returning the captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let path = path.strip_suffix('/').unwrap_or(path);
        let parts: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };

        let mut params = PathParams::new();
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Static(expected) => {
                    if parts.get(index) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => match parts.get(index) {
                    Some(value) if !value.is_empty() => {
                        params.insert(name.clone(), (*value).to_owned());
                    }
                    _ => return None,
                },
                Segment::Optional(name) => {
                    return match parts.len() - index.min(parts.len()) {
                        0 => {
                            params.insert(name.clone(), String::new());
                            Some(params)
                        }
                        1 => {
                            params.insert(name.clone(), parts[index].to_owned());
                            Some(params)
                        }
                        _ => None,
                    };
                }
                Segment::Wildcard { name, count } => {
                    let rest = parts.get(index..).unwrap_or_default();
                    if count.is_some_and(|n| n != rest.len()) {
                        return None;
                    }
                    params.insert(name.clone(), rest.join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn describe(segment: &Segment) -> String {
    match segment {
        Segment::Static(s) => s.clone(),
        Segment::Param(name) => format!("{{{name}}}"),
        Segment::Optional(name) => format!("{{{name}?}}"),
        Segment::Wildcard { name, count: None } => format!("{{{name}*}}"),
        Segment::Wildcard {
            name,
            count: Some(n),
        } => format!("{{{name}*{n}}}"),
    }
}

/// The public description of a registered route.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    method: MethodFilter,
    path: String,
    prefix: Option<String>,
    id: Option<String>,
    settings: RouteSettings,
    pattern: Pattern,
}

impl RouteInfo {
    /// Describes a route at `path` (already including any realm prefix).
    ///
    /// # Errors
    ///
    /// Whatever [`Pattern::parse`] reports for `path`.
    pub fn new(
        method: MethodFilter,
        path: impl Into<String>,
        prefix: Option<String>,
        id: Option<String>,
        settings: RouteSettings,
    ) -> Result<Self, PatternError> {
        let path = path.into();
        let pattern = Pattern::parse(&path)?;
        Ok(Self {
            method,
            path,
            prefix,
            id,
            settings,
            pattern,
        })
    }

    pub fn method(&self) -> &MethodFilter {
        &self.method
    }

    /// The full path, realm prefix included.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The prefix of the realm the route was declared in, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Effective settings after handler defaults and explicit choices.
    pub fn settings(&self) -> &RouteSettings {
        &self.settings
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    // Returns `Some(params)` when both the method and the path match.
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if self.method.allows(method) {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// The handler part of a [`RouteConfig`].
pub enum RouteHandler {
    /// A concrete handler.
    Direct(Handler),
    /// A named handler type plus the options to build it with.
    Typed { name: String, options: HandlerOptions },
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("Direct(..)"),
            Self::Typed { name, .. } => f.debug_struct("Typed").field("name", name).finish(),
        }
    }
}

/// A route declaration, as handed to [`Server::route`](crate::server::Server::route).
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_mount::context::Context;
/// use rttp_mount::http::{Response, StatusCode};
/// use rttp_mount::router::RouteConfig;
///
/// let route = RouteConfig::new("GET", "/users/{id}")
///     .id("user")
///     .handler(|ctx: Context| async move {
///         let id = ctx.params().get("id").unwrap_or_default().to_owned();
///         Response::new(StatusCode::Ok).body(id)
///     });
/// ```
#[derive(Debug)]
pub struct RouteConfig {
    pub(crate) method: MethodFilter,
    pub(crate) path: String,
    pub(crate) id: Option<String>,
    pub(crate) settings: SettingsOverride,
    pub(crate) handler: Option<RouteHandler>,
}

impl RouteConfig {
    /// Starts a declaration for `method` (`"*"` for any) at `path`.
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        let method = match method.as_ref().parse::<MethodFilter>() {
            Ok(filter) => filter,
            Err(never) => match never {},
        };
        Self {
            method,
            path: path.into(),
            id: None,
            settings: SettingsOverride::default(),
            handler: None,
        }
    }

    /// Makes the route reachable through [`Server::lookup`](crate::server::Server::lookup).
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serves the route with an async closure.
    #[must_use]
    pub fn handler<F, Fut, R>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoReply + 'static,
    {
        self.handler = Some(RouteHandler::Direct(handler_fn(f)));
        self
    }

    /// Serves the route with an already erased handler.
    #[must_use]
    pub fn handler_boxed(mut self, handler: Handler) -> Self {
        self.handler = Some(RouteHandler::Direct(handler));
        self
    }

    /// Serves the route with the handler type registered as `name`.
    #[must_use]
    pub fn handler_type<T>(mut self, name: impl Into<String>, options: T) -> Self
    where
        T: Any + Send,
    {
        self.handler = Some(RouteHandler::Typed {
            name: name.into(),
            options: HandlerOptions::new(options),
        });
        self
    }

    /// Explicit settings; they override the handler type's defaults field by field.
    #[must_use]
    pub fn settings(mut self, settings: SettingsOverride) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn payload_parse(mut self, parse: bool) -> Self {
        self.settings = self.settings.payload_parse(parse);
        self
    }

    #[must_use]
    pub fn payload_output(mut self, output: PayloadOutput) -> Self {
        self.settings = self.settings.payload_output(output);
        self
    }

    #[must_use]
    pub fn state_parse(mut self, parse: bool) -> Self {
        self.settings = self.settings.state_parse(parse);
        self
    }
}

struct Route {
    info: Arc<RouteInfo>,
    handler: Handler,
}

/// The host's route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rttp_mount::router::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route; earlier routes take precedence.
    pub fn add(&mut self, info: Arc<RouteInfo>, handler: Handler) {
        self.routes.push(Route { info, handler });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the first route matching `method` and `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<(Arc<RouteInfo>, Handler, PathParams)> {
        self.routes.iter().find_map(|route| {
            route
                .info
                .matches(method, path)
                .map(|params| (Arc::clone(&route.info), Arc::clone(&route.handler), params))
        })
    }

    /// Finds a route by its id.
    pub fn lookup(&self, id: &str) -> Option<Arc<RouteInfo>> {
        self.routes
            .iter()
            .find(|route| route.info.id() == Some(id))
            .map(|route| Arc::clone(&route.info))
    }
}
