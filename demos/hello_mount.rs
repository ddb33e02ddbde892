//! Serves an inner app under `/legacy` on port 8080.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello_mount
//! curl http://127.0.0.1:8080/legacy/hello?name=ada
//! ```

use rttp_mount::app::App;
use rttp_mount::context::Context;
use rttp_mount::middleware::{LoggerMiddleware, from_middleware};
use rttp_mount::mount::to_plugin;
use rttp_mount::plugin::RegisterOptions;
use rttp_mount::raw::{RawRequest, RawResponse};
use rttp_mount::router::RouteConfig;
use rttp_mount::server::{Server, ServerOptions};
use rttp_mount::{Response, StatusCode};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut inner = App::new();
    inner.use_middleware(from_middleware(Arc::new(LoggerMiddleware)));
    inner.get("/hello", |req: RawRequest, res: RawResponse| async move {
        let name = req.query_param("name").unwrap_or_else(|| "world".into());
        res.send(format!("Hello, {name}!"));
        Ok(())
    });

    let mut server = Server::new(ServerOptions::default());
    server.route(RouteConfig::new("GET", "/").handler(|_ctx: Context| async {
        Response::new(StatusCode::Ok).body("host root")
    }))?;
    server.register_with(&to_plugin(inner, "legacy"), RegisterOptions::prefix("/legacy"))?;

    let listener = server.bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", listener.local_addr());
    listener.run().await?;
    Ok(())
}
