//! A small express-style framework for inner applications.
//!
//! An [`App`] is an ordered stack of middleware, routes and mounted
//! sub-services that operates directly on a raw request/response pair. Used at
//! the top level (through [`App::handle`]) it behaves like a standalone HTTP
//! app: it patches the raw pair with its own hooks, runs the stack, answers
//! `404` when nothing handled the request and converts handler failures into
//! a `500` or a stream error.
//!
//! ```rust,no_run
//! use rttp_mount::app::App;
//! use rttp_mount::raw::{RawRequest, RawResponse};
//!
//! let mut app = App::new();
//! app.get("/be/okay", |_req: RawRequest, res: RawResponse| async move {
//!     res.send("ok");
//!     Ok(())
//! });
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::http::{Method, MethodFilter, StatusCode};
use crate::middleware::{AppError, BoxOutcome, Flow, MiddlewareHandler, Next, Outcome};
use crate::raw::{RawRequest, RawResponse, RequestSource, ResponseSink, StreamError};

/// Value of the `X-Powered-By` header the framework adds to responses it writes.
pub const POWERED_BY: &str = "rttp-mount";

/// Something that can serve a raw request/response pair as part of a larger stack.
pub trait Service: Send + Sync + 'static {
    /// Serves the pair, returning [`Flow::Unhandled`] to let the caller continue.
    fn call(&self, req: RawRequest, res: RawResponse) -> BoxOutcome;
}

/// A shared, type-erased [`Service`].
pub type SharedService = Arc<dyn Service>;

/// Builds a fresh [`App`]; lets callers swap the framework used for mounting.
pub type FrameworkFactory = Arc<dyn Fn() -> App + Send + Sync>;

/// Adapts an async closure into a [`Service`] that always handles the request.
///
/// ```rust,no_run
/// use rttp_mount::app::service_fn;
/// use rttp_mount::raw::{RawRequest, RawResponse};
///
/// let svc = service_fn(|_req: RawRequest, res: RawResponse| async move {
///     res.send("hello");
///     Ok(())
/// });
/// ```
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    ServiceFn { f }
}

/// See [`service_fn`].
pub struct ServiceFn<F> {
    f: F,
}

impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    fn call(&self, req: RawRequest, res: RawResponse) -> BoxOutcome {
        let fut = (self.f)(req, res);
        Box::pin(async move {
            fut.await?;
            Ok(Flow::Handled)
        })
    }
}

/// An inner application: an ordered middleware stack.
#[derive(Clone, Default)]
pub struct App {
    stack: Arc<Vec<MiddlewareHandler>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of layers in the stack.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Appends a middleware layer.
    pub fn use_middleware(&mut self, middleware: MiddlewareHandler) -> &mut Self {
        Arc::make_mut(&mut self.stack).push(middleware);
        self
    }

    /// Mounts `service` under `prefix`.
    ///
    /// Requests whose path is `prefix` or starts with `prefix/` reach the
    /// service with the prefix stripped from the URL; the URL is put back once
    /// the service returns. A `/` prefix matches everything and strips nothing.
    pub fn mount(&mut self, prefix: &str, service: SharedService) -> &mut Self {
        let prefix = normalize_prefix(prefix);
        let layer: MiddlewareHandler =
            Arc::new(move |req: RawRequest, res: RawResponse, next: Next| -> BoxOutcome {
                let prefix = prefix.clone();
                let service = Arc::clone(&service);
                Box::pin(async move {
                    let original = req.url();
                    let Some(stripped) = strip_mount_prefix(&original, &prefix) else {
                        return next.run(req, res).await;
                    };

                    req.set_url(stripped);
                    let flow = service.call(req.clone(), res.clone()).await;
                    req.set_url(original);

                    match flow? {
                        Flow::Handled => Ok(Flow::Handled),
                        Flow::Unhandled => next.run(req, res).await,
                    }
                })
            });
        self.use_middleware(layer)
    }

    /// Registers `handler` for requests matching `method` and exactly `path`.
    pub fn route<H, Fut>(&mut self, method: MethodFilter, path: &str, handler: H) -> &mut Self
    where
        H: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let path = trim_trailing_slash(path).to_owned();
        let handler = Arc::new(handler);
        let layer: MiddlewareHandler =
            Arc::new(move |req: RawRequest, res: RawResponse, next: Next| -> BoxOutcome {
                let matched =
                    method.allows(req.method()) && trim_trailing_slash(&req.path()) == path;
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    if !matched {
                        return next.run(req, res).await;
                    }
                    (*handler)(req, res).await?;
                    Ok(Flow::Handled)
                })
            });
        self.use_middleware(layer)
    }

    pub fn get<H, Fut>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.route(MethodFilter::Only(Method::Get), path, handler)
    }

    pub fn post<H, Fut>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.route(MethodFilter::Only(Method::Post), path, handler)
    }

    /// Registers `handler` for every method at `path`.
    pub fn all<H, Fut>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(RawRequest, RawResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        self.route(MethodFilter::Any, path, handler)
    }

    /// Runs the stack without any top-level handling.
    pub async fn dispatch(&self, req: RawRequest, res: RawResponse) -> Outcome {
        Next::new(Arc::clone(&self.stack)).run(req, res).await
    }

    /// Serves `req`/`res` as a top-level application.
    ///
    /// Installs the framework's own request source and response sink on the
    /// pair before running the stack. Requests nothing handled get a `404`.
    /// A failure, a panicking handler included, becomes a `500` when the head
    /// is still uncommitted and a destroyed stream carrying the error otherwise.
    pub async fn handle(&self, req: RawRequest, res: RawResponse) {
        init(&req, &res);

        let outcome = AssertUnwindSafe(self.dispatch(req.clone(), res.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(AppError::Panic(panic_message(&*panic))));

        match outcome {
            Ok(Flow::Handled) => {}
            Ok(Flow::Unhandled) => {
                debug!(method = %req.method(), url = %req.url(), "no inner route matched");
                res.set_status(StatusCode::NotFound);
                res.send(format!("Cannot {} {}", req.method(), req.path()));
            }
            Err(err) if !res.headers_sent() => {
                warn!(error = %err, "inner application failed before responding");
                res.set_status(StatusCode::InternalServerError);
                res.send(StatusCode::InternalServerError.canonical_reason());
            }
            Err(err) => {
                warn!(error = %err, "inner application failed mid-response");
                let error = match err {
                    AppError::Stream(stream) => stream,
                    other => StreamError::Application(other.to_string()),
                };
                res.destroy(Some(error));
            }
        }
    }
}

impl Service for App {
    fn call(&self, req: RawRequest, res: RawResponse) -> BoxOutcome {
        let app = self.clone();
        Box::pin(async move { app.dispatch(req, res).await })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

// Patches the raw pair with the framework's hooks, wrapping whatever was installed.
fn init(req: &RawRequest, res: &RawResponse) {
    req.set_source(Arc::new(BufferedSource {
        inner: req.source(),
        cached: Mutex::new(None),
    }));
    res.set_sink(Arc::new(PoweredBySink { inner: res.sink() }));
}

/// Request source the framework installs: the body can be read any number of times.
struct BufferedSource {
    inner: Arc<dyn RequestSource>,
    cached: Mutex<Option<Bytes>>,
}

impl RequestSource for BufferedSource {
    fn read(&self, req: &RawRequest) -> Bytes {
        self.cached
            .lock()
            .get_or_insert_with(|| self.inner.read(req))
            .clone()
    }

    fn destroy(&self, req: &RawRequest) {
        self.inner.destroy(req);
    }
}

/// Response sink the framework installs: stamps `X-Powered-By` on the head.
struct PoweredBySink {
    inner: Arc<dyn ResponseSink>,
}

impl PoweredBySink {
    fn stamp(res: &RawResponse) {
        if !res.headers_sent() {
            if let Err(err) = res.set_header("X-Powered-By", POWERED_BY) {
                trace!(error = %err, "head committed before X-Powered-By");
            }
        }
    }
}

impl ResponseSink for PoweredBySink {
    fn write_head(&self, res: &RawResponse) {
        Self::stamp(res);
        self.inner.write_head(res);
    }

    fn write(&self, res: &RawResponse, chunk: &[u8]) -> Result<(), StreamError> {
        Self::stamp(res);
        self.inner.write(res, chunk)
    }

    fn end(&self, res: &RawResponse, chunk: Option<&[u8]>) {
        Self::stamp(res);
        self.inner.end(res, chunk);
    }

    fn destroy(&self, res: &RawResponse, error: Option<StreamError>) {
        self.inner.destroy(res, error);
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = trim_trailing_slash(prefix);
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

// Returns the URL as seen below `prefix`, or `None` when the URL is not under it.
fn strip_mount_prefix(url: &str, prefix: &str) -> Option<String> {
    if prefix == "/" {
        return Some(url.to_owned());
    }
    let rest = url.strip_prefix(prefix)?;
    match rest.chars().next() {
        None => Some("/".to_owned()),
        Some('/') => Some(rest.to_owned()),
        Some('?') | Some('#') => Some(format!("/{rest}")),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve(app: &App, method: Method, url: &str) -> RawResponse {
        let res = RawResponse::new();
        app.handle(RawRequest::new(method, url), res.clone()).await;
        res
    }

    #[test]
    fn prefix_stripping() {
        assert_eq!(
            strip_mount_prefix("/api/users?x=1", "/api").as_deref(),
            Some("/users?x=1")
        );
        assert_eq!(strip_mount_prefix("/api", "/api").as_deref(), Some("/"));
        assert_eq!(strip_mount_prefix("/api?x=1", "/api").as_deref(), Some("/?x=1"));
        assert_eq!(strip_mount_prefix("/apis", "/api"), None);
        assert_eq!(strip_mount_prefix("/any", "/").as_deref(), Some("/any"));
        assert_eq!(normalize_prefix("api/"), "/api");
    }

    #[tokio::test]
    async fn routes_by_method_and_path() {
        let mut app = App::new();
        app.get("/hello", |_req: RawRequest, res: RawResponse| async move {
            res.send("hi");
            Ok(())
        });

        let res = serve(&app, Method::Get, "/hello/").await;
        assert_eq!(res.to_response().text(), "hi");
        assert_eq!(res.header("x-powered-by").as_deref(), Some(POWERED_BY));

        let res = serve(&app, Method::Post, "/hello").await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.to_response().text(), "Cannot POST /hello");
    }

    #[tokio::test]
    async fn mounted_service_sees_stripped_url_and_parent_gets_it_back() {
        let seen = Arc::new(Mutex::new(String::new()));
        let slot = Arc::clone(&seen);
        let inner = service_fn(move |req: RawRequest, res: RawResponse| {
            let slot = Arc::clone(&slot);
            async move {
                *slot.lock() = req.url();
                res.send("inner");
                Ok(())
            }
        });

        let mut app = App::new();
        app.mount("/sub", Arc::new(inner));
        let req = RawRequest::new(Method::Get, "/sub/deep?q=2");
        let res = RawResponse::new();
        app.handle(req.clone(), res.clone()).await;

        assert_eq!(*seen.lock(), "/deep?q=2");
        assert_eq!(req.url(), "/sub/deep?q=2");
        assert_eq!(res.to_response().text(), "inner");
    }

    #[tokio::test]
    async fn unhandled_mount_falls_through_to_the_parent() {
        let mut sub = App::new();
        sub.get("/known", |_req: RawRequest, res: RawResponse| async move {
            res.send("known");
            Ok(())
        });
        let mut app = App::new();
        app.mount("/sub", Arc::new(sub));
        app.get("/sub/other", |_req: RawRequest, res: RawResponse| async move {
            res.send("parent");
            Ok(())
        });

        let res = serve(&app, Method::Get, "/sub/other").await;
        assert_eq!(res.to_response().text(), "parent");
    }

    #[tokio::test]
    async fn failure_before_writing_becomes_500() {
        let mut app = App::new();
        app.get("/boom", |_req: RawRequest, _res: RawResponse| async move {
            Err(AppError::msg("boom"))
        });
        let res = serve(&app, Method::Get, "/boom").await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(res.is_finished());
    }

    #[tokio::test]
    async fn failure_after_writing_destroys_the_stream() {
        let mut app = App::new();
        app.get("/half", |_req: RawRequest, res: RawResponse| async move {
            res.write(b"half")?;
            Err(AppError::msg("gave up"))
        });
        let res = RawResponse::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        res.on_error(move |err| *slot.lock() = Some(err.clone()));

        app.handle(RawRequest::new(Method::Get, "/half"), res.clone()).await;
        assert!(res.is_destroyed());
        assert_eq!(*seen.lock(), Some(StreamError::Application("gave up".into())));
        assert_eq!(res.to_response().text(), "half");
    }

    #[tokio::test]
    async fn panic_before_writing_becomes_500() {
        let mut app = App::new();
        app.get("/panic", |_req: RawRequest, _res: RawResponse| async move {
            panic!("inner bug")
        });
        let res = serve(&app, Method::Get, "/panic").await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(res.is_finished());
    }

    #[tokio::test]
    async fn panic_after_writing_destroys_the_stream() {
        let mut app = App::new();
        app.get("/half", |_req: RawRequest, res: RawResponse| async move {
            assert!(res.write(b"half").is_ok());
            panic!("gave up mid-body")
        });
        let res = RawResponse::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        res.on_error(move |err| *slot.lock() = Some(err.clone()));

        app.handle(RawRequest::new(Method::Get, "/half"), res.clone()).await;
        assert!(res.is_destroyed());
        assert_eq!(
            *seen.lock(),
            Some(StreamError::Application("handler panicked: gave up mid-body".into()))
        );
    }

    #[tokio::test]
    async fn framework_source_allows_rereading_the_body() {
        let mut app = App::new();
        app.post("/echo", |req: RawRequest, res: RawResponse| async move {
            let first = req.read();
            let second = req.read();
            assert_eq!(first, second);
            res.send(first);
            Ok(())
        });
        let request = crate::http::Request::new(Method::Post, "/echo").body_bytes("twice");
        let res = RawResponse::new();
        app.handle(RawRequest::from(&request), res.clone()).await;
        assert_eq!(res.to_response().text(), "twice");
    }
}
