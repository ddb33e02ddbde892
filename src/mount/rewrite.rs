//! Recomputes the inner app's URL from the route's wildcard capture.
//!
//! A route like `/prefix/{mount*}` hands the inner app everything after
//! `/prefix`. The rewrite middleware runs first in the mounted stack and
//! replaces the path with `realm prefix + "/" + capture`, keeping the query
//! string and fragment byte-for-byte; the prefix mount below it then strips
//! the realm prefix again.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::trace;

use super::lifecycle::BridgeState;
use crate::middleware::{BoxOutcome, Middleware, Next};
use crate::raw::{RawRequest, RawResponse};

/// A route path that hands everything to the inner app untouched.
pub const CATCH_ALL: &str = "/{mount*}";

/// Whether routes at `path` need their URL rewritten before reaching the inner app.
pub fn needs_rewrite(path: &str) -> bool {
    static RE_MOUNT_CAPTURE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\{mount(\*\d*|\?)?\}").unwrap());
    path != CATCH_ALL && RE_MOUNT_CAPTURE.is_match(path)
}

/// Builds the URL the inner app sees.
///
/// `original_path` is the path component of `url`; whatever follows it (query
/// and fragment) is carried over unchanged.
///
/// ```
/// use rttp_mount::mount::rewrite::rewrite_url;
///
/// assert_eq!(rewrite_url("/prefix/be/okay?x=1", "/prefix/be/okay", Some("be/okay"), None), "/be/okay?x=1");
/// assert_eq!(rewrite_url("/api/", "/api/", None, Some("/api")), "/api/");
/// ```
pub fn rewrite_url(
    url: &str,
    original_path: &str,
    captured: Option<&str>,
    prefix: Option<&str>,
) -> String {
    let tail = url.strip_prefix(original_path).unwrap_or_else(|| {
        let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
        &url[end..]
    });
    format!(
        "{}/{}{}",
        prefix.unwrap_or_default(),
        captured.unwrap_or_default(),
        tail
    )
}

/// Middleware rewriting the URL from the request's [`BridgeState`].
///
/// Requests without bridge state pass through untouched.
pub struct RewriteUrl;

impl Middleware for RewriteUrl {
    fn handle(&self, req: RawRequest, res: RawResponse, next: Next) -> BoxOutcome {
        if let Some(state) = req.extension::<Arc<BridgeState>>() {
            let view = state.view();
            let url = rewrite_url(
                &req.url(),
                &view.path,
                view.captured.as_deref(),
                view.prefix.as_deref(),
            );
            trace!(from = %req.url(), to = %url, "rewriting inner url");
            req.set_url(url);
        }
        Box::pin(next.run(req, res))
    }
}
