//! Raw request/response stream handles.
//!
//! These are the objects an inner application reads from and writes to
//! directly. They are cheap `Arc` handles: cloning one yields another handle to
//! the same underlying stream, the way a socket-backed request object is shared
//! between a server and whatever framework it hands the object to.
//!
//! The operations that touch the underlying transport go through swappable
//! hook objects ([`RequestSource`] and [`ResponseSink`]). Frameworks are free to
//! wrap them; [`StashedHooks`] snapshots and reinstalls them.

use std::io;
use std::sync::Arc;

use thiserror::Error;

pub mod request;
pub mod response;

pub use request::{DirectSource, RawRequest, RequestSource};
pub use response::{DirectSink, RawResponse, ResponseSink};

/// An error surfaced on a raw response's error event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The transport itself failed.
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    /// The stream was torn down on purpose.
    #[error("stream aborted")]
    Aborted,

    #[error("cannot modify headers after they are sent")]
    HeadersSent,

    #[error("write after end")]
    WriteAfterEnd,

    /// A failure reported by application code.
    #[error("{0}")]
    Application(String),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A snapshot of the hook objects currently installed on a raw request/response pair.
///
/// Taken before a framework gets to patch the pair and reinstalled afterwards,
/// so that whoever is inspecting the pair from the outside keeps seeing the
/// hooks it installed.
#[derive(Clone)]
pub struct StashedHooks {
    source: Arc<dyn RequestSource>,
    sink: Arc<dyn ResponseSink>,
}

impl StashedHooks {
    /// Captures the hooks currently installed on `req` and `res`.
    pub fn capture(req: &RawRequest, res: &RawResponse) -> Self {
        Self {
            source: req.source(),
            sink: res.sink(),
        }
    }

    /// Reinstalls the captured hooks on `req` and `res`.
    pub fn restore(&self, req: &RawRequest, res: &RawResponse) {
        req.set_source(Arc::clone(&self.source));
        res.set_sink(Arc::clone(&self.sink));
    }

    /// Returns `true` if `req` and `res` currently carry exactly these hooks.
    pub fn is_installed_on(&self, req: &RawRequest, res: &RawResponse) -> bool {
        Arc::ptr_eq(&self.source, &req.source()) && Arc::ptr_eq(&self.sink, &res.sink())
    }
}

impl std::fmt::Debug for StashedHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashedHooks").finish_non_exhaustive()
    }
}
