//! Middleware pipeline for inner applications.
//!
//! Inner applications operate directly on a [`RawRequest`]/[`RawResponse`]
//! pair. Each middleware receives the pair plus a [`Next`] cursor and either
//! writes the response itself or hands the pair further down the stack.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`]: built-in request logger.

use std::{future::Future, pin::Pin, sync::Arc};

use thiserror::Error;
use tokio::time::Instant;

use crate::raw::{RawRequest, RawResponse, StreamError};

/// Failures raised by inner application code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),

    #[error("handler panicked: {0}")]
    Panic(String),
}

impl AppError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Whether a chain produced the response or fell off its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Handled,
    Unhandled,
}

/// Result of running (part of) a middleware chain.
pub type Outcome = Result<Flow, AppError>;

/// A boxed, `Send` future resolving to an [`Outcome`].
pub type BoxOutcome = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// A type-erased, reference-counted middleware function.
///
/// Every entry in an application's stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_mount::middleware::{BoxOutcome, MiddlewareHandler, Next};
/// use rttp_mount::raw::{RawRequest, RawResponse};
///
/// let handler: MiddlewareHandler =
///     Arc::new(|req: RawRequest, res: RawResponse, next: Next| -> BoxOutcome {
///         Box::pin(async move { next.run(req, res).await })
///     });
/// ```
pub type MiddlewareHandler =
    Arc<dyn Fn(RawRequest, RawResponse, Next) -> BoxOutcome + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |req: RawRequest, res: RawResponse, next: Next| {
        middleware.handle(req, res, next)
    })
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so a middleware can
/// forward the request at most once.
pub struct Next {
    middlewares: Arc<Vec<MiddlewareHandler>>,
    index: usize,
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Arc<Vec<MiddlewareHandler>>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain.
    ///
    /// Returns [`Flow::Unhandled`] once the chain is exhausted so the caller can
    /// decide what falling off the end means (a 404 at the top level, the
    /// parent's next layer for a mounted application).
    pub async fn run(mut self, req: RawRequest, res: RawResponse) -> Outcome {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(req, res, self).await
            }
            None => Ok(Flow::Unhandled),
        }
    }
}

/// The core trait for inner-application middleware.
///
/// Implementors may pass through (`next.run(req, res).await`), short-circuit by
/// writing and ending the response, or decorate around the downstream call.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; one stack serves every request.
/// - Implementations **should not** hold locks on the raw pair across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, req: RawRequest, res: RawResponse, next: Next) -> BoxOutcome;
}

/// Built-in middleware that logs each request's method, URL, status, and duration.
///
/// The status is read once the downstream chain returns, so a handler that ends
/// the response asynchronously may be logged with the default status.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, req: RawRequest, res: RawResponse, next: Next) -> BoxOutcome {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().to_string();
            let url = req.url();

            let outcome = next.run(req, res.clone()).await;

            tracing::info!(
                method = %method,
                url = %url,
                status = res.status().as_u16(),
                elapsed = ?start.elapsed(),
                handled = matches!(outcome, Ok(Flow::Handled)),
                "inner request"
            );

            outcome
        })
    }
}
