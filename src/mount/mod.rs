//! Mounting an inner [`App`] as a host route handler.
//!
//! [`Mount`] is a plugin registering the `"mount"` handler type. A route using
//! it hands the raw request/response pair of every request to the configured
//! inner app and waits until the app finishes or fails the response:
//!
//! ```rust,no_run
//! use rttp_mount::app::App;
//! use rttp_mount::mount::{self, Mount, MountConfig};
//! use rttp_mount::raw::{RawRequest, RawResponse};
//! use rttp_mount::router::RouteConfig;
//! use rttp_mount::server::Server;
//!
//! # fn main() -> Result<(), rttp_mount::server::ServerError> {
//! let mut inner = App::new();
//! inner.get("/be/okay", |_req: RawRequest, res: RawResponse| async move {
//!     res.send("ok");
//!     Ok(())
//! });
//!
//! let mut server = Server::default();
//! server.register(&Mount)?;
//! server.route(
//!     RouteConfig::new("*", "/prefix/{mount*}")
//!         .handler_type(mount::HANDLER_TYPE, MountConfig::new(inner)),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! [`to_plugin`] packages the same thing as a plugin with a single catch-all
//! route, ready to be registered under a prefix.
//!
//! Inside the route's handler the pair runs through a stack built once per
//! route: the URL rewrite (only for routes with a `{mount...}` capture other
//! than the bare [`CATCH_ALL`](rewrite::CATCH_ALL)), the hook restoration, then
//! the caller's app mounted under the realm prefix.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::{App, SharedService};
use crate::context::Context;
use crate::middleware::from_middleware;
use crate::plugin::{Plugin, PluginAttributes, Realm};
use crate::raw::{RawResponse, StashedHooks, StreamError};
use crate::router::{
    BoxReply, Handler, HandlerError, HandlerFactory, HandlerOptions, PayloadOutput, Reply,
    RouteConfig, RouteInfo, SettingsOverride,
};
use crate::server::ServerError;

mod config;
pub mod lifecycle;
pub mod rewrite;

pub use config::{Classifier, ErrorClass, MountConfig, default_classifier};

use lifecycle::{BridgeState, HostView, Latch, RestoreHooks, Terminal};
use rewrite::{CATCH_ALL, RewriteUrl};

/// Name of the handler type [`Mount`] registers.
pub const HANDLER_TYPE: &str = "mount";

/// Route parameter holding the part of the path handed to the inner app.
pub const MOUNT_PARAM: &str = "mount";

/// Plugin registering the [`HANDLER_TYPE`] handler type. Registering it again is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mount;

impl Plugin for Mount {
    fn attributes(&self) -> PluginAttributes {
        PluginAttributes::new(env!("CARGO_PKG_NAME"))
            .version(env!("CARGO_PKG_VERSION"))
            .once(true)
    }

    fn register(&self, realm: &mut Realm<'_>) -> Result<(), ServerError> {
        realm.handler(HANDLER_TYPE, Arc::new(MountHandlerType))
    }
}

/// The [`HANDLER_TYPE`] handler type.
///
/// Accepts a [`MountConfig`], a bare [`SharedService`] or an [`App`] as route options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountHandlerType;

impl HandlerFactory for MountHandlerType {
    fn build(&self, route: &Arc<RouteInfo>, options: HandlerOptions) -> Result<Handler, ServerError> {
        let handler = Arc::new(MountHandler::new(route, resolve_options(options)?));
        Ok(Arc::new(move |ctx: Context| -> BoxReply {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler.handle(ctx).await })
        }))
    }

    fn defaults(&self) -> SettingsOverride {
        SettingsOverride::default()
            .payload_parse(false)
            .payload_output(PayloadOutput::Stream)
            .state_parse(false)
    }
}

fn resolve_options(options: HandlerOptions) -> Result<MountConfig, ServerError> {
    let options = match options.downcast::<MountConfig>() {
        Ok(config) => return Ok(config),
        Err(options) => options,
    };
    let options = match options.downcast::<SharedService>() {
        Ok(app) => return Ok(MountConfig::from_shared(app)),
        Err(options) => options,
    };
    options
        .downcast::<App>()
        .map(MountConfig::new)
        .map_err(|_| ServerError::InvalidHandlerOptions {
            handler: HANDLER_TYPE.to_owned(),
            expected: "a MountConfig, SharedService or App",
        })
}

/// The handler behind one mount route.
pub struct MountHandler {
    app: App,
    classifier: Classifier,
}

impl MountHandler {
    /// Builds the inner stack for `route`.
    pub fn new(route: &RouteInfo, config: MountConfig) -> Self {
        let mut app = config.build_framework();
        let rewrites = rewrite::needs_rewrite(route.path());
        if rewrites {
            app.use_middleware(from_middleware(Arc::new(RewriteUrl)));
        }
        app.use_middleware(from_middleware(Arc::new(RestoreHooks)));
        app.mount(route.prefix().unwrap_or("/"), Arc::clone(&config.app));

        debug!(
            path = %route.path(),
            prefix = route.prefix().unwrap_or("/"),
            rewrites,
            "mount handler built"
        );
        Self {
            app,
            classifier: config.classifier,
        }
    }

    /// Serves one request through the inner app.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Upstream`] when the inner app failed with an
    /// operational error before writing anything, [`HandlerError::Abandoned`]
    /// when its task died without ending the response.
    pub async fn handle(&self, ctx: Context) -> Result<Reply, HandlerError> {
        let (req, res) = ctx.raw().clone();
        let (latch, mut terminal) = Latch::new();
        let view = HostView {
            captured: ctx.params().get(MOUNT_PARAM).map(str::to_owned),
            path: ctx.request().path().to_owned(),
            prefix: ctx.route().prefix().map(str::to_owned),
        };
        let stash = StashedHooks::capture(&req, &res);
        req.insert_extension(Arc::new(BridgeState::new(view, Arc::clone(&latch), stash)));
        latch.watch(&res);

        let app = self.app.clone();
        let (inner_req, inner_res) = (req.clone(), res.clone());
        let mut task = tokio::spawn(async move { app.handle(inner_req, inner_res).await });

        // A task that returns normally may still finish the stream later.
        let outcome = tokio::select! {
            biased;
            outcome = &mut terminal => outcome,
            Err(err) = &mut task => {
                warn!(path = %ctx.route().path(), error = %err, "inner app task died before ending the response");
                return Err(HandlerError::Abandoned);
            }
        };

        match outcome {
            Ok(Terminal::Finished) => Ok(Reply::Closed(res.to_response())),
            Ok(Terminal::Failed(error)) => self.settle(&ctx, &res, error),
            Err(_) => Err(HandlerError::Abandoned),
        }
    }

    fn settle(
        &self,
        ctx: &Context,
        res: &RawResponse,
        error: StreamError,
    ) -> Result<Reply, HandlerError> {
        // Whatever was written goes out, then the connection closes.
        let cut_short = || Reply::Closed(res.to_response().truncated());
        match (self.classifier)(&error) {
            ErrorClass::Operational if !res.headers_sent() => Err(HandlerError::Upstream(error)),
            ErrorClass::Operational => {
                ctx.reporter().report(ctx.route(), error.to_string());
                Ok(cut_short())
            }
            ErrorClass::Expected => {
                debug!(path = %ctx.route().path(), error = %error, "inner app ended the stream with an error");
                Ok(cut_short())
            }
        }
    }
}

/// A plugin serving one inner app from a catch-all route.
#[derive(Debug, Clone)]
pub struct MountPlugin {
    config: MountConfig,
    attributes: PluginAttributes,
}

impl Plugin for MountPlugin {
    fn attributes(&self) -> PluginAttributes {
        self.attributes.clone()
    }

    fn register(&self, realm: &mut Realm<'_>) -> Result<(), ServerError> {
        realm.register(&Mount)?;
        realm.route(RouteConfig::new("*", CATCH_ALL).handler_type(HANDLER_TYPE, self.config.clone()))
    }
}

/// Packages `config` as a plugin named by `attributes`.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_mount::app::App;
/// use rttp_mount::mount::to_plugin;
/// use rttp_mount::plugin::RegisterOptions;
/// use rttp_mount::server::Server;
///
/// # fn main() -> Result<(), rttp_mount::server::ServerError> {
/// let mut server = Server::default();
/// server.register_with(&to_plugin(App::new(), "legacy"), RegisterOptions::prefix("/legacy"))?;
/// # Ok(())
/// # }
/// ```
pub fn to_plugin(
    config: impl Into<MountConfig>,
    attributes: impl Into<PluginAttributes>,
) -> MountPlugin {
    MountPlugin {
        config: config.into(),
        attributes: attributes.into(),
    }
}
