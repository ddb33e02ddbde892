//! Per-request host context: route match results, the raw stream pair and
//! request extensions.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use tokio::sync::broadcast;
use tracing::error;

use crate::Request;
use crate::raw::{RawRequest, RawResponse};
use crate::router::RouteInfo;
use crate::server::ServerEvent;

/// Type-erased per-request state, keyed by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the extensions map
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters extracted from the matched route.
///
/// A wildcard capture that matched nothing is stored as the empty string.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Channel into the host's generic error reporting.
///
/// Reports are logged and broadcast as [`ServerEvent::RequestError`] to whoever
/// subscribed through [`Server::events`](crate::server::Server::events).
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    events: broadcast::Sender<ServerEvent>,
}

impl ErrorReporter {
    pub(crate) fn new(events: broadcast::Sender<ServerEvent>) -> Self {
        Self { events }
    }

    /// Reports a request failure on `route`.
    pub fn report(&self, route: &RouteInfo, message: impl Into<String>) {
        let message = message.into();
        error!(method = %route.method(), path = %route.path(), error = %message, "request failed");
        // No subscribers is not an error.
        let _ = self.events.send(ServerEvent::RequestError {
            method: route.method().to_string(),
            path: route.path().to_owned(),
            message,
        });
    }
}

/// Per-request context handed to host route handlers.
pub struct Context {
    request: Request,
    params: PathParams,
    route: Arc<RouteInfo>,
    raw: (RawRequest, RawResponse),
    payload: Option<serde_json::Value>,
    cookies: Option<HashMap<String, String>>,
    reporter: ErrorReporter,
    extensions: Extensions,
}

impl Context {
    /// Creates a context for `request` matched against `route`, with a fresh raw stream pair.
    pub fn new(
        request: Request,
        params: PathParams,
        route: Arc<RouteInfo>,
        reporter: ErrorReporter,
    ) -> Self {
        let raw = (RawRequest::from(&request), RawResponse::new());
        Self::with_raw(request, params, route, reporter, raw)
    }

    /// Like [`Context::new`] but over a caller-supplied raw pair.
    pub fn with_raw(
        request: Request,
        params: PathParams,
        route: Arc<RouteInfo>,
        reporter: ErrorReporter,
        raw: (RawRequest, RawResponse),
    ) -> Self {
        Self {
            request,
            params,
            route,
            raw,
            payload: None,
            cookies: None,
            reporter,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn route(&self) -> &Arc<RouteInfo> {
        &self.route
    }

    /// The raw request/response pair backing this request.
    pub fn raw(&self) -> &(RawRequest, RawResponse) {
        &self.raw
    }

    /// The JSON payload, when the route parses payloads and one was sent.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    pub(crate) fn set_payload(&mut self, payload: serde_json::Value) {
        self.payload = Some(payload);
    }

    /// Parsed cookies, when the route parses request state.
    pub fn cookies(&self) -> Option<&HashMap<String, String>> {
        self.cookies.as_ref()
    }

    pub(crate) fn set_cookies(&mut self, cookies: HashMap<String, String>) {
        self.cookies = Some(cookies);
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Deserializes the request body as JSON regardless of the route's parse setting.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_round_trip() {
        let mut ext = Extensions::new();
        ext.insert(42_u8);
        assert_eq!(ext.get::<u8>(), Some(&42));
        assert_eq!(ext.remove::<u8>(), Some(42));
        assert!(ext.get::<u8>().is_none());
    }

    #[test]
    fn params_store_empty_captures() {
        let mut params = PathParams::new();
        params.insert("mount".into(), String::new());
        assert_eq!(params.get("mount"), Some(""));
        assert_eq!(params.len(), 1);
    }
}
