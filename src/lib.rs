//! # rttp-mount
//!
//! Mount an express-style inner application as a single route handler of a
//! hapi-style host server.
//!
//! The host ([`server`]) routes requests, runs plugins and owns the response
//! lifecycle. The inner framework ([`app`]) works directly on a raw
//! request/response pair ([`raw`]). The [`mount`] handler type bridges the two:
//! it rewrites the URL relative to the mount point, hands the raw pair to the
//! inner app and turns the app's finish or error into exactly one host reply.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp_mount::app::App;
//! use rttp_mount::mount::to_plugin;
//! use rttp_mount::plugin::RegisterOptions;
//! use rttp_mount::raw::{RawRequest, RawResponse};
//! use rttp_mount::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut inner = App::new();
//!     inner.get("/hello", |_req: RawRequest, res: RawResponse| async move {
//!         res.send("Hello, World!");
//!         Ok(())
//!     });
//!
//!     let mut server = Server::default();
//!     server.register_with(&to_plugin(inner, "legacy"), RegisterOptions::prefix("/legacy"))?;
//!     server.bind("127.0.0.1:8080").await?.run().await?;
//!     Ok(())
//! }
//! ```

// ── Host ──────────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod plugin;
pub mod router;
pub mod server;

// ── Inner framework ───────────────────────────────────────────────────────────
pub mod app;
pub mod middleware;
pub mod raw;

// ── Bridge ────────────────────────────────────────────────────────────────────
pub mod mount;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, MethodFilter, Request, Response, StatusCode};
pub use mount::{Mount, MountConfig, to_plugin};
pub use server::{Server, ServerError};
