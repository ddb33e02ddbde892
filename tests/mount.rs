use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rttp_mount::app::{App, service_fn};
use rttp_mount::middleware::AppError;
use rttp_mount::mount::{self, ErrorClass, Mount, MountConfig, to_plugin};
use rttp_mount::plugin::{Plugin, PluginAttributes, Realm, RegisterOptions};
use rttp_mount::raw::{RawRequest, RawResponse, StreamError};
use rttp_mount::router::{PayloadOutput, RouteConfig};
use rttp_mount::server::{InjectOptions, Server, ServerError, ServerEvent};
use rttp_mount::{Method, StatusCode};
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn okay_app() -> App {
    let mut app = App::new();
    app.get("/", |_req: RawRequest, res: RawResponse| async move {
        res.send("root");
        Ok(())
    });
    app.get("/be/okay", |_req: RawRequest, res: RawResponse| async move {
        res.send("ok");
        Ok(())
    });
    app
}

fn server_with(path: &str, config: impl Into<MountConfig>) -> Server {
    init_tracing();
    let mut server = Server::default();
    server.register(&Mount).unwrap();
    server
        .route(
            RouteConfig::new("*", path)
                .id("bridge")
                .handler_type(mount::HANDLER_TYPE, config.into()),
        )
        .unwrap();
    server
}

// ── end-to-end scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn catch_all_route_serves_the_inner_root() {
    let mut app = App::new();
    app.get("/", |_req: RawRequest, res: RawResponse| async move {
        res.send("ok");
        Ok(())
    });
    let server = server_with("/{mount*}", app);

    let res = server.inject("/").await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.text(), "ok");
}

#[tokio::test]
async fn prefixed_wildcard_route_strips_the_prefix() {
    let server = server_with("/prefix/{mount*}", okay_app());

    assert_eq!(server.inject("/prefix/be/okay").await.text(), "ok");
    assert_eq!(server.inject("/prefix").await.text(), "root");
    assert_eq!(server.inject("/prefix/").await.text(), "root");
}

#[tokio::test]
async fn query_string_reaches_the_inner_app() {
    let echo = service_fn(|req: RawRequest, res: RawResponse| async move {
        let here = req.query_param("here").unwrap_or_default();
        res.send(format!("{} saw {here}", req.path()));
        Ok(())
    });
    let server = server_with("/prefix/{mount*}", MountConfig::new(echo));

    let res = server.inject("/prefix/anything?here=present").await;
    assert_eq!(res.text(), "/anything saw present");
}

#[tokio::test]
async fn route_without_capture_keeps_the_full_path() {
    let echo = service_fn(|req: RawRequest, res: RawResponse| async move {
        res.send(req.url());
        Ok(())
    });
    let server = server_with("/exact/path", MountConfig::new(echo));

    assert_eq!(server.inject("/exact/path?x=1").await.text(), "/exact/path?x=1");
}

#[tokio::test]
async fn error_after_partial_write_keeps_what_was_sent() {
    let partial = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.write(b"first")?;
        res.emit_error(StreamError::Application("gave up".into()));
        Ok(())
    });
    let server = server_with("/{mount*}", MountConfig::new(partial));
    let mut events = server.events();

    let res = server.inject("/").await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.text(), "first");
    assert!(res.is_verbatim());
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

    let wire = String::from_utf8(res.into_bytes().to_vec()).unwrap();
    assert!(wire.contains("Connection: close\r\n"));
    assert!(!wire.contains("Content-Length"));
    assert!(wire.ends_with("\r\n\r\nfirst"));
}

#[tokio::test]
async fn error_after_finish_is_ignored() {
    let finished = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.end_with("first");
        res.emit_error(StreamError::from(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "peer went away",
        )));
        Ok(())
    });
    let server = server_with("/{mount*}", MountConfig::new(finished));
    let mut events = server.events();

    let res = server.inject("/").await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.text(), "first");
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert!(!res.is_truncated());
}

#[tokio::test]
async fn panicking_inner_handler_still_answers() {
    let panicking = service_fn(|_req: RawRequest, _res: RawResponse| async move {
        panic!("inner bug")
    });
    let server = server_with("/{mount*}", MountConfig::new(panicking));

    let res = tokio::time::timeout(Duration::from_secs(2), server.inject("/"))
        .await
        .expect("request settled");
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert_eq!(res.text(), "Internal Server Error");
}

fn url_echo() -> MountConfig {
    MountConfig::new(service_fn(|req: RawRequest, res: RawResponse| async move {
        res.send(req.url());
        Ok(())
    }))
}

struct Captures;

impl Plugin for Captures {
    fn attributes(&self) -> PluginAttributes {
        "captures".into()
    }

    fn register(&self, realm: &mut Realm<'_>) -> Result<(), ServerError> {
        realm.register(&Mount)?;
        for path in ["/star/{mount*}", "/opt/{mount?}", "/two/{mount*2}"] {
            realm.route(
                RouteConfig::new("GET", path)
                    .handler_type(mount::HANDLER_TYPE, url_echo()),
            )?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn captures_inside_a_prefixed_realm_are_rewritten() {
    init_tracing();
    let mut server = Server::default();
    server
        .register_with(&Captures, RegisterOptions::prefix("/api"))
        .unwrap();

    assert_eq!(server.inject("/api/star/a/b?q=1").await.text(), "/a/b?q=1");
    assert_eq!(server.inject("/api/star").await.text(), "/");
    assert_eq!(server.inject("/api/opt").await.text(), "/");
    assert_eq!(server.inject("/api/opt/one?x=2").await.text(), "/one?x=2");
    assert_eq!(server.inject("/api/two/a/b").await.text(), "/a/b");
    assert_eq!(
        server.inject("/api/two/a").await.status(),
        StatusCode::NotFound
    );
}

#[tokio::test]
async fn data_output_leaves_the_inner_app_an_empty_body() {
    let body_echo = || {
        MountConfig::new(service_fn(|req: RawRequest, res: RawResponse| async move {
            res.send(format!("[{}]", String::from_utf8_lossy(&req.read())));
            Ok(())
        }))
    };
    let mut server = Server::default();
    server.register(&Mount).unwrap();
    server
        .route(
            RouteConfig::new("POST", "/streamed/{mount*}")
                .handler_type(mount::HANDLER_TYPE, body_echo()),
        )
        .unwrap();
    server
        .route(
            RouteConfig::new("POST", "/buffered/{mount*}")
                .payload_output(PayloadOutput::Data)
                .handler_type(mount::HANDLER_TYPE, body_echo()),
        )
        .unwrap();

    let send = |url: &str| InjectOptions::new(Method::Post, url).payload("hello");
    assert_eq!(server.inject(send("/streamed/x")).await.text(), "[hello]");
    assert_eq!(server.inject(send("/buffered/x")).await.text(), "[]");
}

// ── registration ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn mount_plugin_registers_once() {
    let mut server = Server::default();
    server.register(&Mount).unwrap();
    server.register(&Mount).unwrap();
    server
        .register_with(&to_plugin(okay_app(), "a"), RegisterOptions::prefix("/a"))
        .unwrap();
    server
        .register_with(&to_plugin(okay_app(), "b"), RegisterOptions::prefix("/b"))
        .unwrap();

    assert_eq!(server.inject("/a/be/okay").await.text(), "ok");
    assert_eq!(server.inject("/b/be/okay").await.text(), "ok");
}

#[test]
fn mount_routes_need_the_handler_type() {
    let mut server = Server::default();
    let err = server
        .route(RouteConfig::new("*", "/{mount*}").handler_type(mount::HANDLER_TYPE, okay_app()))
        .unwrap_err();
    assert!(matches!(err, ServerError::UnknownHandlerType(name) if name == "mount"));
}

#[test]
fn mount_routes_default_to_raw_payloads() {
    let server = server_with("/{mount*}", okay_app());
    let route = server.lookup("bridge").unwrap();
    assert!(!route.settings().payload.parse);
    assert_eq!(route.settings().payload.output, PayloadOutput::Stream);
    assert!(!route.settings().state.parse);
}

#[test]
fn explicit_route_settings_override_mount_defaults() {
    let mut server = Server::default();
    server.register(&Mount).unwrap();
    server
        .route(
            RouteConfig::new("*", "/{mount*}")
                .id("bridge")
                .state_parse(true)
                .handler_type(mount::HANDLER_TYPE, okay_app()),
        )
        .unwrap();

    let route = server.lookup("bridge").unwrap();
    assert!(route.settings().state.parse);
    assert!(!route.settings().payload.parse);
}

#[test]
fn unsupported_options_are_rejected_at_registration() {
    let mut server = Server::default();
    server.register(&Mount).unwrap();
    let err = server
        .route(RouteConfig::new("*", "/{mount*}").handler_type(mount::HANDLER_TYPE, 42_u32))
        .unwrap_err();
    assert!(matches!(err, ServerError::InvalidHandlerOptions { .. }));
}

#[tokio::test]
async fn inner_app_parses_its_own_json() {
    let mut app = App::new();
    app.post("/users", |req: RawRequest, res: RawResponse| async move {
        let body: serde_json::Value = serde_json::from_slice(&req.read())?;
        res.send(format!("hello {}", body["name"].as_str().unwrap_or("?")));
        Ok(())
    });
    let server = server_with("/{mount*}", app);

    let res = server
        .inject(
            InjectOptions::new(Method::Post, "/users")
                .header("Content-Type", "application/json")
                .payload(r#"{"name":"ada"}"#),
        )
        .await;
    assert_eq!(res.text(), "hello ada");

    // The host leaves malformed JSON for the inner app to judge.
    let res = server
        .inject(
            InjectOptions::new(Method::Post, "/users")
                .header("Content-Type", "application/json")
                .payload("{not json"),
        )
        .await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert_ne!(res.text(), "");
}

#[tokio::test]
async fn to_plugin_serves_under_its_prefix() {
    init_tracing();
    let mut server = Server::default();
    server
        .register_with(&to_plugin(okay_app(), "legacy"), RegisterOptions::prefix("/legacy"))
        .unwrap();

    assert_eq!(server.inject("/legacy/be/okay").await.text(), "ok");
    assert_eq!(server.inject("/legacy").await.text(), "root");
    assert_eq!(server.inject("/be/okay").await.status(), StatusCode::NotFound);

    let res = server.inject("/legacy/missing").await;
    assert_eq!(res.status(), StatusCode::NotFound);
    assert_eq!(res.text(), "Cannot GET /legacy/missing");
}

#[tokio::test]
async fn framework_factory_runs_once_per_route() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let config = MountConfig::new(okay_app()).framework(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        App::new()
    });
    let server = server_with("/{mount*}", config);

    for _ in 0..3 {
        assert_eq!(server.inject("/be/okay").await.text(), "ok");
    }
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

// ── escalation ────────────────────────────────────────────────────────────────

fn broken_pipe() -> StreamError {
    StreamError::from(io::Error::new(io::ErrorKind::BrokenPipe, "socket closed"))
}

#[tokio::test]
async fn operational_error_before_output_becomes_host_500() {
    let failing = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.destroy(Some(broken_pipe()));
        Ok(())
    });
    let server = server_with("/{mount*}", MountConfig::new(failing));
    let mut events = server.events();

    let res = server.inject("/").await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert!(!res.is_verbatim());

    let ServerEvent::RequestError { method, path, message } = events.try_recv().unwrap();
    assert_eq!(method, "*");
    assert_eq!(path, "/{mount*}");
    assert!(message.contains("socket closed"));
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn operational_error_after_output_is_reported_and_closed() {
    let failing = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.write(b"partial")?;
        res.destroy(Some(broken_pipe()));
        Ok(())
    });
    let server = server_with("/{mount*}", MountConfig::new(failing));
    let mut events = server.events();

    let res = server.inject("/").await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(res.text(), "partial");
    assert!(matches!(events.try_recv(), Ok(ServerEvent::RequestError { .. })));
}

#[tokio::test]
async fn application_errors_are_not_escalated() {
    let failing = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.destroy(Some(StreamError::Application("nope".into())));
        Ok(())
    });
    let server = server_with("/{mount*}", MountConfig::new(failing));
    let mut events = server.events();

    let res = server.inject("/").await;
    assert!(res.is_verbatim());
    assert_eq!(res.text(), "");
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn custom_classifier_decides_escalation() {
    let failing = service_fn(|_req: RawRequest, res: RawResponse| async move {
        res.write(b"half")?;
        Err(AppError::msg("handler bailed"))
    });
    let config = MountConfig::new(failing).classifier(|err| match err {
        StreamError::Application(_) => ErrorClass::Operational,
        _ => ErrorClass::Expected,
    });
    let server = server_with("/{mount*}", config);
    let mut events = server.events();

    let res = server.inject("/").await;
    assert_eq!(res.text(), "half");
    let ServerEvent::RequestError { message, .. } = events.try_recv().unwrap();
    assert_eq!(message, "handler bailed");
}
