//! The raw request handle handed to inner applications.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::context::Extensions;
use crate::http::request::parse_query_string;
use crate::http::{Headers, Method, Request};

/// Transport hooks behind [`RawRequest::read`] and [`RawRequest::destroy`].
pub trait RequestSource: Send + Sync {
    /// Pulls the remaining body bytes.
    fn read(&self, req: &RawRequest) -> Bytes;

    /// Tears the request stream down.
    fn destroy(&self, req: &RawRequest);
}

/// The default source: hands out the buffered body once.
pub struct DirectSource;

impl RequestSource for DirectSource {
    fn read(&self, req: &RawRequest) -> Bytes {
        if req.inner.consumed.swap(true, Ordering::AcqRel) {
            Bytes::new()
        } else {
            req.inner.body.clone()
        }
    }

    fn destroy(&self, req: &RawRequest) {
        req.inner.destroyed.store(true, Ordering::Release);
    }
}

/// A shared handle to one inbound request stream.
///
/// The URL is mutable: routers and mount points rewrite it as the request
/// travels inward. Everything else is fixed at construction.
#[derive(Clone)]
pub struct RawRequest {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    method: Method,
    url: Mutex<String>,
    headers: Headers,
    body: Bytes,
    consumed: AtomicBool,
    destroyed: AtomicBool,
    source: Mutex<Arc<dyn RequestSource>>,
    extensions: Mutex<Extensions>,
}

impl RawRequest {
    /// Creates a request stream with no headers and an empty body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::from_parts(method, url.into(), Headers::new(), Bytes::new())
    }

    fn from_parts(method: Method, url: String, headers: Headers, body: Bytes) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                method,
                url: Mutex::new(url),
                headers,
                body,
                consumed: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                source: Mutex::new(Arc::new(DirectSource)),
                extensions: Mutex::new(Extensions::new()),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Returns the current URL (path, query and fragment).
    pub fn url(&self) -> String {
        self.inner.url.lock().clone()
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.inner.url.lock() = url.into();
    }

    /// Returns the path component of the current URL.
    pub fn path(&self) -> String {
        let url = self.inner.url.lock();
        let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
        url[..end].to_owned()
    }

    /// Looks up a query parameter in the current URL.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let url = self.url();
        let without_fragment = url.split('#').next().unwrap_or_default();
        let (_, query) = without_fragment.split_once('?')?;
        let params: HashMap<String, String> = parse_query_string(query);
        params.get(key).cloned()
    }

    pub fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    /// Reads the body through the installed [`RequestSource`].
    pub fn read(&self) -> Bytes {
        let source = self.source();
        source.read(self)
    }

    /// Destroys the stream through the installed [`RequestSource`].
    pub fn destroy(&self) {
        let source = self.source();
        source.destroy(self);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Returns the hook object currently installed.
    pub fn source(&self) -> Arc<dyn RequestSource> {
        self.inner.source.lock().clone()
    }

    /// Replaces the hook object.
    pub fn set_source(&self, source: Arc<dyn RequestSource>) {
        *self.inner.source.lock() = source;
    }

    /// Attaches a value to this stream, replacing any value of the same type.
    pub fn insert_extension<T>(&self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.inner.extensions.lock().insert(value);
    }

    /// Returns a clone of the attached value of type `T`, if any.
    pub fn extension<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.extensions.lock().get::<T>().cloned()
    }
}

impl From<&Request> for RawRequest {
    fn from(request: &Request) -> Self {
        Self::from_parts(
            request.method().clone(),
            request.url().to_owned(),
            request.headers().clone(),
            request.body().clone(),
        )
    }
}

impl std::fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRequest")
            .field("method", &self.inner.method)
            .field("url", &*self.inner.url.lock())
            .finish_non_exhaustive()
    }
}
