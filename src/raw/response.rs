//! The raw response handle inner applications write to.
//!
//! A [`RawResponse`] records the status line, headers and body chunks as they
//! are written and emits two lifecycle events: *finish*, once the response has
//! been ended, and *error*, whenever something goes wrong on the stream. Both
//! event kinds deliver to listeners at most once; a listener is dropped as soon
//! as it has run.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::StreamError;
use crate::http::{Headers, Response, StatusCode};

/// Transport hooks behind the writing half of a [`RawResponse`].
///
/// Implementations that wrap another sink should delegate to it; the
/// `record_*` methods on [`RawResponse`] are the primitive operations the
/// default [`DirectSink`] uses.
pub trait ResponseSink: Send + Sync {
    fn write_head(&self, res: &RawResponse);

    /// # Errors
    ///
    /// Returns [`StreamError::WriteAfterEnd`] when the response already ended.
    fn write(&self, res: &RawResponse, chunk: &[u8]) -> Result<(), StreamError>;

    fn end(&self, res: &RawResponse, chunk: Option<&[u8]>);

    fn destroy(&self, res: &RawResponse, error: Option<StreamError>);
}

/// The default sink: records everything straight onto the response.
pub struct DirectSink;

impl ResponseSink for DirectSink {
    fn write_head(&self, res: &RawResponse) {
        res.record_head();
    }

    fn write(&self, res: &RawResponse, chunk: &[u8]) -> Result<(), StreamError> {
        res.record_chunk(chunk)
    }

    fn end(&self, res: &RawResponse, chunk: Option<&[u8]>) {
        res.record_finish(chunk);
    }

    fn destroy(&self, res: &RawResponse, error: Option<StreamError>) {
        res.record_destroy(error);
    }
}

type FinishListener = Box<dyn FnOnce() + Send>;
type ErrorListener = Box<dyn FnOnce(&StreamError) + Send>;

#[derive(Default)]
struct Listeners {
    finish: Vec<FinishListener>,
    error: Vec<ErrorListener>,
}

struct Recorded {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    head_sent: bool,
    finished: bool,
    destroyed: bool,
}

struct ResponseInner {
    state: Mutex<Recorded>,
    sink: Mutex<Arc<dyn ResponseSink>>,
    listeners: Mutex<Listeners>,
}

/// A shared handle to one outbound response stream.
///
/// # Examples
///
/// ```
/// use rttp_mount::http::StatusCode;
/// use rttp_mount::raw::RawResponse;
///
/// let res = RawResponse::new();
/// res.set_status(StatusCode::Created);
/// res.write(b"hello ").unwrap();
/// res.end_with("world");
///
/// assert!(res.is_finished());
/// let response = res.to_response();
/// assert_eq!(response.status(), StatusCode::Created);
/// assert_eq!(response.text(), "hello world");
/// ```
#[derive(Clone)]
pub struct RawResponse {
    inner: Arc<ResponseInner>,
}

impl Default for RawResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl RawResponse {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                state: Mutex::new(Recorded {
                    status: StatusCode::Ok,
                    headers: Headers::new(),
                    body: BytesMut::new(),
                    head_sent: false,
                    finished: false,
                    destroyed: false,
                }),
                sink: Mutex::new(Arc::new(DirectSink)),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.state.lock().status
    }

    /// Sets the status code. Ignored once the head has been written.
    pub fn set_status(&self, status: StatusCode) {
        let mut state = self.inner.state.lock();
        if !state.head_sent {
            state.status = status;
        }
    }

    /// Sets a header, replacing earlier values.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::HeadersSent`] once the head has been written.
    pub fn set_header(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StreamError> {
        let mut state = self.inner.state.lock();
        if state.head_sent {
            return Err(StreamError::HeadersSent);
        }
        state.headers.set(name, value);
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner.state.lock().headers.get(name).map(str::to_owned)
    }

    pub fn headers_sent(&self) -> bool {
        self.inner.state.lock().head_sent
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Commits the status line and headers through the installed sink.
    pub fn write_head(&self) {
        let sink = self.sink();
        sink.write_head(self);
    }

    /// Writes a body chunk through the installed sink.
    ///
    /// # Errors
    ///
    /// Whatever the sink reports; the default sink rejects writes after end.
    pub fn write(&self, chunk: &[u8]) -> Result<(), StreamError> {
        let sink = self.sink();
        sink.write(self, chunk)
    }

    /// Ends the response through the installed sink.
    pub fn end(&self) {
        let sink = self.sink();
        sink.end(self, None);
    }

    /// Writes a last chunk and ends the response through the installed sink.
    pub fn end_with(&self, chunk: impl AsRef<[u8]>) {
        let sink = self.sink();
        sink.end(self, Some(chunk.as_ref()));
    }

    /// Destroys the stream through the installed sink.
    pub fn destroy(&self, error: Option<StreamError>) {
        let sink = self.sink();
        sink.destroy(self, error);
    }

    /// Sets a text content type unless one is present, then ends with `body`.
    pub fn send(&self, body: impl AsRef<[u8]>) {
        if !self.headers_sent() && self.header("content-type").is_none() {
            if let Err(err) = self.set_header("Content-Type", "text/html; charset=utf-8") {
                trace!(error = %err, "head committed before default content type");
            }
        }
        self.end_with(body);
    }

    /// Returns the sink currently installed.
    pub fn sink(&self) -> Arc<dyn ResponseSink> {
        self.inner.sink.lock().clone()
    }

    /// Replaces the sink.
    pub fn set_sink(&self, sink: Arc<dyn ResponseSink>) {
        *self.inner.sink.lock() = sink;
    }

    /// Registers a listener for the finish event.
    pub fn on_finish(&self, listener: impl FnOnce() + Send + 'static) {
        self.inner.listeners.lock().finish.push(Box::new(listener));
    }

    /// Registers a listener for the next error event.
    pub fn on_error(&self, listener: impl FnOnce(&StreamError) + Send + 'static) {
        self.inner.listeners.lock().error.push(Box::new(listener));
    }

    /// Emits an error event to every registered error listener.
    pub fn emit_error(&self, error: StreamError) {
        let listeners = std::mem::take(&mut self.inner.listeners.lock().error);
        if listeners.is_empty() {
            warn!(error = %error, "unhandled error on raw response");
            return;
        }
        for listener in listeners {
            listener(&error);
        }
    }

    /// Marks the head as committed without going through the sink.
    pub fn record_head(&self) {
        self.inner.state.lock().head_sent = true;
    }

    /// Appends a chunk without going through the sink.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::WriteAfterEnd`] when the response already ended.
    pub fn record_chunk(&self, chunk: &[u8]) -> Result<(), StreamError> {
        let mut state = self.inner.state.lock();
        if state.finished || state.destroyed {
            return Err(StreamError::WriteAfterEnd);
        }
        state.head_sent = true;
        state.body.extend_from_slice(chunk);
        Ok(())
    }

    /// Ends the response without going through the sink and fires the finish event.
    ///
    /// A second call is a no-op.
    pub fn record_finish(&self, chunk: Option<&[u8]>) {
        {
            let mut state = self.inner.state.lock();
            if state.finished || state.destroyed {
                return;
            }
            if let Some(chunk) = chunk {
                state.body.extend_from_slice(chunk);
            }
            state.head_sent = true;
            state.finished = true;
        }
        let listeners = std::mem::take(&mut self.inner.listeners.lock().finish);
        for listener in listeners {
            listener();
        }
    }

    /// Tears the stream down without going through the sink, emitting `error` if given.
    pub fn record_destroy(&self, error: Option<StreamError>) {
        self.inner.state.lock().destroyed = true;
        if let Some(error) = error {
            self.emit_error(error);
        }
    }

    /// Snapshots what has been written so far as a host [`Response`] to send verbatim.
    ///
    /// A stream destroyed before it finished yields a [truncated](Response::truncated)
    /// response.
    pub fn to_response(&self) -> Response {
        let state = self.inner.state.lock();
        let response = Response::verbatim(
            state.status,
            state.headers.clone(),
            Bytes::copy_from_slice(&state.body),
        );
        if state.destroyed && !state.finished {
            response.truncated()
        } else {
            response
        }
    }
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RawResponse")
            .field("status", &state.status)
            .field("head_sent", &state.head_sent)
            .field("finished", &state.finished)
            .finish_non_exhaustive()
    }
}
