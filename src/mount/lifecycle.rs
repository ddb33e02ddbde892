//! Per-request bridge between the raw stream's events and the host handler.
//!
//! The host handler suspends on a [`Latch`] until the raw response either
//! finishes or fails, whichever comes first. The latch fires once; whatever the
//! stream reports afterwards is ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::middleware::{BoxOutcome, Middleware, Next};
use crate::raw::{RawRequest, RawResponse, StashedHooks, StreamError};

/// How the raw response ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Finished,
    Failed(StreamError),
}

/// A single-fire signal from the raw stream's listeners to the waiting handler.
///
/// # Examples
///
/// ```
/// use rttp_mount::mount::lifecycle::{Latch, Terminal};
///
/// let (latch, mut rx) = Latch::new();
/// assert!(latch.fire(Terminal::Finished));
/// assert!(!latch.fire(Terminal::Finished));
/// assert_eq!(rx.try_recv().unwrap(), Terminal::Finished);
/// ```
#[derive(Debug)]
pub struct Latch {
    fired: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Terminal>>>,
}

impl Latch {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Terminal>) {
        let (tx, rx) = oneshot::channel();
        let latch = Arc::new(Self {
            fired: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        });
        (latch, rx)
    }

    /// Delivers `terminal` unless the latch already fired. Returns whether it was delivered.
    pub fn fire(&self, terminal: Terminal) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            trace!(?terminal, "latch already fired, ignoring");
            return false;
        }
        if let Some(tx) = self.tx.lock().take() {
            // The handler stopped waiting; nobody left to tell.
            let _ = tx.send(terminal);
        }
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wires the finish and error events of `res` to this latch.
    pub fn watch(self: &Arc<Self>, res: &RawResponse) {
        let on_finish = Arc::clone(self);
        res.on_finish(move || {
            on_finish.fire(Terminal::Finished);
        });
        let on_error = Arc::clone(self);
        res.on_error(move |err| {
            on_error.fire(Terminal::Failed(err.clone()));
        });
    }
}

/// The host-side facts the rewrite middleware needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostView {
    /// The wildcard capture of the matched route, if the route has one.
    pub captured: Option<String>,
    /// The request path as the host saw it.
    pub path: String,
    /// The prefix of the realm the route was declared in.
    pub prefix: Option<String>,
}

/// Per-request state, attached to the raw request's extensions.
#[derive(Debug)]
pub struct BridgeState {
    view: HostView,
    latch: Arc<Latch>,
    stash: StashedHooks,
}

impl BridgeState {
    pub fn new(view: HostView, latch: Arc<Latch>, stash: StashedHooks) -> Self {
        Self { view, latch, stash }
    }

    pub fn view(&self) -> &HostView {
        &self.view
    }

    pub fn latch(&self) -> &Arc<Latch> {
        &self.latch
    }

    pub fn stash(&self) -> &StashedHooks {
        &self.stash
    }
}

/// Middleware putting back the hooks the host had installed before the
/// wrapping framework patched the raw pair.
///
/// Requests without bridge state pass through untouched.
pub struct RestoreHooks;

impl Middleware for RestoreHooks {
    fn handle(&self, req: RawRequest, res: RawResponse, next: Next) -> BoxOutcome {
        match req.extension::<Arc<BridgeState>>() {
            Some(state) => {
                state.stash().restore(&req, &res);
                trace!("raw hooks restored");
            }
            None => debug!(url = %req.url(), "no bridge state, leaving raw hooks alone"),
        }
        Box::pin(next.run(req, res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::middleware::{Flow, MiddlewareHandler, from_middleware};

    #[test]
    fn finish_then_error_keeps_the_finish() {
        let (latch, mut rx) = Latch::new();
        let res = RawResponse::new();
        latch.watch(&res);

        res.end_with("first");
        res.emit_error(StreamError::Aborted);

        assert!(latch.is_fired());
        assert_eq!(rx.try_recv().unwrap(), Terminal::Finished);
    }

    #[test]
    fn error_before_finish_wins() {
        let (latch, mut rx) = Latch::new();
        let res = RawResponse::new();
        latch.watch(&res);

        res.write(b"first").unwrap();
        res.destroy(Some(StreamError::Aborted));
        res.end();

        assert_eq!(rx.try_recv().unwrap(), Terminal::Failed(StreamError::Aborted));
    }

    #[test]
    fn fire_without_a_receiver_is_harmless() {
        let (latch, rx) = Latch::new();
        drop(rx);
        assert!(latch.fire(Terminal::Finished));
        assert!(!latch.fire(Terminal::Failed(StreamError::Aborted)));
    }

    struct Noisy;

    impl crate::raw::ResponseSink for Noisy {
        fn write_head(&self, res: &RawResponse) {
            res.record_head();
        }
        fn write(&self, res: &RawResponse, chunk: &[u8]) -> Result<(), StreamError> {
            res.record_chunk(b"!")?;
            res.record_chunk(chunk)
        }
        fn end(&self, res: &RawResponse, chunk: Option<&[u8]>) {
            res.record_finish(chunk);
        }
        fn destroy(&self, res: &RawResponse, error: Option<StreamError>) {
            res.record_destroy(error);
        }
    }

    #[tokio::test]
    async fn restore_reinstalls_stashed_hooks() {
        let req = RawRequest::new(Method::Get, "/");
        let res = RawResponse::new();
        let (latch, _rx) = Latch::new();
        let stash = StashedHooks::capture(&req, &res);
        let view = HostView {
            captured: None,
            path: "/".into(),
            prefix: None,
        };
        req.insert_extension(Arc::new(BridgeState::new(view, latch, stash.clone())));

        res.set_sink(Arc::new(Noisy));
        assert!(!stash.is_installed_on(&req, &res));

        let restore: MiddlewareHandler = from_middleware(Arc::new(RestoreHooks));
        let flow = Next::new(Arc::new(vec![restore]))
            .run(req.clone(), res.clone())
            .await
            .unwrap();

        assert_eq!(flow, Flow::Unhandled);
        assert!(stash.is_installed_on(&req, &res));
        res.write(b"x").unwrap();
        assert_eq!(res.to_response().text(), "x");
    }

    #[tokio::test]
    async fn restore_without_state_is_a_no_op() {
        let req = RawRequest::new(Method::Get, "/");
        let res = RawResponse::new();
        res.set_sink(Arc::new(Noisy));

        let restore = from_middleware(Arc::new(RestoreHooks));
        Next::new(Arc::new(vec![restore]))
            .run(req, res.clone())
            .await
            .unwrap();

        res.write(b"x").unwrap();
        assert_eq!(res.to_response().text(), "!x");
    }
}
