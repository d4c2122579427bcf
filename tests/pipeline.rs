//! End-to-end dispatch through `App::dispatch`, with requests parsed from raw
//! HTTP bytes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use condor::context::move_file;
use condor::events::Event;
use condor::http::{Request, Response, StatusCode};
use condor::middleware::{Node, node};
use condor::services::ServiceError;
use condor::{App, AppBuilder, Config};
use serde_json::{Value, json};

type Log = Arc<Mutex<Vec<String>>>;

fn request(raw: &str) -> Request {
    Request::parse(raw.as_bytes()).unwrap().0
}

fn get(path: &str) -> Request {
    request(&format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n"))
}

fn post(path: &str, content_type: &str, body: &[u8]) -> Request {
    let mut raw = format!(
        "POST {path} HTTP/1.1\r\nHost: test\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    Request::parse(&raw).unwrap().0
}

async fn send(app: &App, request: Request) -> Response {
    app.dispatch(request)
        .await
        .into_response()
        .expect("request was not cancelled")
}

fn body_json(response: &Response) -> Value {
    serde_json::from_slice(response.body_ref()).unwrap()
}

/// A node that records `name` and continues.
fn recorder(log: &Log, name: &'static str) -> Node {
    let log = Arc::clone(log);
    node(move |ctx| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().unwrap().push(name.to_owned());
            ctx.next().await;
        })
    })
}

fn fail(message: &'static str) {
    panic!("{message}")
}

fn recorded(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn chain_runs_global_then_route_then_handler() {
    let log: Log = Arc::default();
    let mut builder = App::builder(Config::default());
    builder
        .attach_node(recorder(&log, "global-1"))
        .attach_node(recorder(&log, "global-2"));

    let handler_log = Arc::clone(&log);
    builder
        .router()
        .group("/api", vec![recorder(&log, "group")], |api| {
            api.get("/items", move |ctx| {
                let log = Arc::clone(&handler_log);
                Box::pin(async move {
                    log.lock().unwrap().push("handler".to_owned());
                    ctx.response().json("[]");
                })
            })?
            .with(recorder(&log, "route"));
            Ok(())
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/api/items")).await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.headers().get("content-type"), Some("application/json"));
    assert_eq!(
        recorded(&log),
        ["global-1", "global-2", "group", "route", "handler"]
    );
}

#[tokio::test]
async fn middleware_that_does_not_continue_short_circuits() {
    let log: Log = Arc::default();
    let mut builder = App::builder(Config::default());
    builder.attach_node(recorder(&log, "first"));
    builder.attach(|ctx| {
        Box::pin(async move {
            if ctx.request().header("authorization").is_none() {
                ctx.response()
                    .set_status(StatusCode::Unauthorized)
                    .json(r#"{"message": "unauthorized"}"#);
                return;
            }
            ctx.next().await;
        })
    });
    let handler_log = Arc::clone(&log);
    builder
        .router()
        .get("/private", move |_ctx| {
            let log = Arc::clone(&handler_log);
            Box::pin(async move {
                log.lock().unwrap().push("handler".to_owned());
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/private")).await;
    assert_eq!(response.status(), StatusCode::Unauthorized);
    assert_eq!(recorded(&log), ["first"]);

    let response = send(
        &app,
        request("GET /private HTTP/1.1\r\nAuthorization: Bearer t\r\n\r\n"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(recorded(&log), ["first", "first", "handler"]);
}

#[tokio::test]
async fn unknown_path_is_404_and_wrong_method_is_405() {
    let mut builder = App::builder(Config::default());
    builder
        .router()
        .get("/users/:id", |_ctx| Box::pin(async {}))
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/posts")).await;
    assert_eq!(response.status(), StatusCode::NotFound);
    assert_eq!(response.body_text(), r#"{"message": "Not Found"}"#);

    let response = send(&app, post("/users/1", "text/plain", b"")).await;
    assert_eq!(response.status(), StatusCode::MethodNotAllowed);
    assert_eq!(response.body_text(), r#"{"message": "Method not allowed"}"#);
}

fn panicking_app(debug: bool) -> App {
    let mut builder = App::builder(Config::default().with_debug(debug));
    builder
        .router()
        .get("/boom", |_ctx| {
            Box::pin(async move { fail("boom") })
        })
        .unwrap();
    builder.build().unwrap()
}

#[tokio::test]
async fn panic_in_debug_mode_exposes_message_and_trace() {
    let app = panicking_app(true);
    let response = send(&app, get("/boom")).await;

    assert_eq!(response.status(), StatusCode::InternalServerError);
    let body = body_json(&response);
    assert_eq!(body["message"], "boom");
    assert!(body.get("stack trace").is_some());
}

#[tokio::test]
async fn panic_outside_debug_mode_is_generic() {
    let app = panicking_app(false);
    let response = send(&app, get("/boom")).await;

    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(body_json(&response), json!({ "message": "internal error" }));
    assert!(!response.body_text().contains("boom"));

    // The app keeps serving after a panic.
    let response = send(&app, get("/missing")).await;
    assert_eq!(response.status(), StatusCode::NotFound);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_keep_their_own_response() {
    let mut builder = App::builder(Config::default());
    builder
        .router()
        .get("/slow", |ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.response().text("A");
            })
        })
        .unwrap();
    builder
        .router()
        .get("/fast", |ctx| Box::pin(async move { ctx.response().text("B"); }))
        .unwrap();
    let app = builder.build().unwrap();

    let (a, b) = tokio::join!(send(&app, get("/slow")), send(&app, get("/fast")));
    assert_eq!(a.body_text(), "A");
    assert_eq!(b.body_text(), "B");
}

#[tokio::test]
async fn fired_events_run_after_the_chain_in_registration_order() {
    let log: Log = Arc::default();
    let mut builder = App::builder(Config::default());

    for job in ["job-1", "job-2"] {
        let log = Arc::clone(&log);
        builder
            .on("user.created", move |event, ctx| {
                let log = Arc::clone(&log);
                Box::pin(async move {
                    let entry = format!("{job}:{}:{}", event.payload["id"], ctx.request().path());
                    log.lock().unwrap().push(entry);
                })
            })
            .unwrap();
    }

    let handler_log = Arc::clone(&log);
    builder
        .router()
        .post("/users", move |ctx| {
            let log = Arc::clone(&handler_log);
            Box::pin(async move {
                ctx.fire(Event::new("user.created").with_payload(json!({ "id": 7 })))
                    .unwrap();
                let unregistered = ctx.fire(Event::new("user.deleted"));
                log.lock().unwrap().push(format!("handler:{}", unregistered.is_err()));
                ctx.response().set_status(StatusCode::Created);
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, post("/users", "application/json", b"{}")).await;
    assert_eq!(response.status(), StatusCode::Created);
    assert_eq!(
        recorded(&log),
        ["handler:true", "job-1:7:/users", "job-2:7:/users"]
    );
}

#[tokio::test]
async fn events_are_skipped_when_the_handler_panics() {
    let log: Log = Arc::default();
    let mut builder = App::builder(Config::default().with_debug(false));
    let job_log = Arc::clone(&log);
    builder
        .on("audit", move |_event, _ctx| {
            let log = Arc::clone(&job_log);
            Box::pin(async move {
                log.lock().unwrap().push("audit".to_owned());
            })
        })
        .unwrap();
    builder
        .router()
        .get("/", |ctx| {
            Box::pin(async move {
                ctx.fire(Event::new("audit")).unwrap();
                fail("after firing");
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert!(recorded(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn event_jobs_stop_at_the_deadline_and_cannot_refire() {
    let log: Log = Arc::default();
    let config = Config::default().with_request_timeout(Duration::from_millis(50));
    let mut builder = App::builder(config);
    let job_log = Arc::clone(&log);
    builder
        .on("tick", move |_event, ctx| {
            let log = Arc::clone(&job_log);
            Box::pin(async move {
                let refired = ctx.fire(Event::new("tick"));
                log.lock().unwrap().push(format!("refire-rejected:{}", refired.is_err()));
                tokio::time::sleep(Duration::from_secs(1)).await;
                log.lock().unwrap().push("slept".to_owned());
            })
        })
        .unwrap();
    builder
        .router()
        .get("/", |ctx| {
            Box::pin(async move {
                ctx.fire(Event::new("tick")).unwrap();
                ctx.response().text("handled");
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let start = tokio::time::Instant::now();
    let response = send(&app, get("/")).await;
    assert_eq!(response.body_text(), "handled");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(recorded(&log), ["refire-rejected:true"]);
}

#[tokio::test]
async fn sessions_carry_logins_across_requests() {
    let mut builder = App::builder(Config::default().with_sessions(true));
    builder
        .router()
        .post("/login", |ctx| {
            Box::pin(async move {
                ctx.auth().login(7).await.unwrap();
                ctx.response().set_status(StatusCode::NoContent);
            })
        })
        .unwrap();
    builder
        .router()
        .get("/me", |ctx| {
            Box::pin(async move {
                let mut auth = ctx.auth();
                let body = json!({
                    "user": auth.user_id().await.unwrap(),
                    "is_seven": auth.check(7).await.unwrap(),
                });
                ctx.response().json_value(&body).unwrap();
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, post("/login", "application/json", b"{}")).await;
    let cookie = response.headers().get("set-cookie").unwrap().to_owned();
    assert!(cookie.starts_with("condor_session="));
    let pair = cookie.split(';').next().unwrap();

    let raw = format!("GET /me HTTP/1.1\r\nHost: test\r\nCookie: theme=dark; {pair}\r\n\r\n");
    let response = send(&app, request(&raw)).await;
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(body_json(&response), json!({ "user": 7, "is_seven": true }));

    let anonymous = send(&app, get("/me")).await;
    assert_eq!(body_json(&anonymous), json!({ "user": null, "is_seven": false }));
}

#[tokio::test]
async fn terminated_response_ignores_later_writes() {
    let mut builder = App::builder(Config::default());
    builder.attach(|ctx| {
        Box::pin(async move {
            ctx.next().await;
            ctx.response()
                .set_status(StatusCode::InternalServerError)
                .set_header("X-Late", "1")
                .text("overwritten");
        })
    });
    builder
        .router()
        .get("/", |ctx| {
            Box::pin(async move {
                ctx.response().text("final");
                ctx.response().terminate();
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.body_text(), "final");
    assert!(response.headers().get("x-late").is_none());
}

#[tokio::test]
async fn redirect_is_permanent_with_location() {
    let mut builder = App::builder(Config::default());
    builder
        .router()
        .get("/old", |ctx| {
            Box::pin(async move {
                ctx.response().redirect("/new");
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/old")).await;
    assert_eq!(response.status(), StatusCode::PermanentRedirect);
    assert_eq!(response.headers().get("location"), Some("/new"));
    assert!(response.body_ref().is_empty());
}

#[tokio::test]
async fn path_query_and_form_parameters() {
    let mut builder = App::builder(Config::default());
    builder
        .router()
        .post("/posts/:slug", |ctx| {
            Box::pin(async move {
                let request = ctx.request();
                let body = json!({
                    "slug": request.path_param("slug"),
                    "missing": request.path_param("nope"),
                    "page": request.param("page"),
                    "title": request.param("title"),
                    "draft_present": request.has_param("draft"),
                    "draft": request.param("draft"),
                });
                ctx.response().json_value(&body).unwrap();
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(
        &app,
        post(
            "/posts/hello-world?page=2",
            "application/x-www-form-urlencoded",
            b"title=Hi+there&draft=",
        ),
    )
    .await;
    assert_eq!(
        body_json(&response),
        json!({
            "slug": "hello-world",
            "missing": null,
            "page": "2",
            "title": "Hi there",
            "draft_present": true,
            "draft": "",
        })
    );
}

#[tokio::test]
async fn multipart_upload_is_spooled_and_movable() {
    let dest = tempfile::tempdir().unwrap();
    let dest_path = dest.path().to_path_buf();

    let mut builder = App::builder(Config::default());
    builder
        .router()
        .post("/photos", move |ctx| {
            let dest = dest_path.clone();
            Box::pin(async move {
                let title = ctx.request().param("title").unwrap_or_default().to_owned();
                let upload = ctx.request().uploaded_file("photo").await.unwrap();
                let stored = move_file(&upload.full_path, &dest).await.unwrap();
                let body = json!({
                    "title": title,
                    "name": upload.name,
                    "stem": upload.name_without_extension,
                    "extension": upload.extension,
                    "size": upload.size,
                    "temp_removed": !upload.full_path.exists(),
                    "stored": stored.display().to_string(),
                });
                ctx.response().json_value(&body).unwrap();
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    // Binary content with a CRLF-dash run that is not the boundary.
    let image: &[u8] = b"\x89PNG\r\n\x1a\n\x00\xff\r\n--Xy-not-quite\r\n--\xfe\x00";
    let mut body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
Beach\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"photo\"; filename=\"beach.png\"\r\n\
Content-Type: image/png\r\n\r\n"
        .to_vec();
    body.extend_from_slice(image);
    body.extend_from_slice(b"\r\n--XyZ--\r\n");

    let response = send(
        &app,
        post("/photos", "multipart/form-data; boundary=XyZ", &body),
    )
    .await;

    assert_eq!(response.status(), StatusCode::Ok);
    let summary = body_json(&response);
    assert_eq!(summary["title"], "Beach");
    assert_eq!(summary["name"], "beach.png");
    assert_eq!(summary["stem"], "beach");
    assert_eq!(summary["extension"], "png");
    assert_eq!(summary["size"], image.len());
    assert_eq!(summary["temp_removed"], true);

    let stored = summary["stored"].as_str().unwrap();
    assert!(stored.starts_with(dest.path().to_str().unwrap()));
    assert_eq!(tokio::fs::read(stored).await.unwrap(), image);
}

#[tokio::test]
async fn oversized_form_is_rejected_before_the_chain() {
    let log: Log = Arc::default();
    let mut builder = App::builder(Config::default().with_max_upload_size(8));
    builder.attach_node(recorder(&log, "global"));
    builder
        .router()
        .post("/form", |_ctx| Box::pin(async {}))
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(
        &app,
        post("/form", "application/x-www-form-urlencoded", b"field=much-too-long"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PayloadTooLarge);
    assert!(recorded(&log).is_empty());

    let response = send(&app, post("/form", "multipart/form-data", b"x")).await;
    assert_eq!(response.status(), StatusCode::BadRequest);
}

#[tokio::test(start_paused = true)]
async fn request_past_its_deadline_is_cancelled() {
    let config = Config::default().with_request_timeout(Duration::from_millis(100));
    let mut builder = App::builder(config);
    builder
        .router()
        .get("/slow", |ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                ctx.response().text("done");
            })
        })
        .unwrap();
    builder
        .router()
        .get("/quick", |ctx| Box::pin(async move { ctx.response().text("ok"); }))
        .unwrap();
    let app = builder.build().unwrap();

    assert!(app.dispatch(get("/slow")).await.is_cancelled());
    assert_eq!(send(&app, get("/quick")).await.body_text(), "ok");
}

struct Pool {
    dsn: String,
}

fn services_app() -> AppBuilder {
    let mut builder = App::builder(Config::default().with_cache(true));
    builder.provide_lazy(|| Pool {
        dsn: "sqlite://memory".to_owned(),
    });
    builder
}

#[tokio::test]
async fn services_are_reachable_from_handlers() {
    let mut builder = services_app();
    builder
        .router()
        .get("/services", |ctx| {
            Box::pin(async move {
                let pool = ctx.resolve::<Pool>().unwrap();
                let cache = ctx.cache().unwrap();
                cache.set("visits", "1".to_owned()).await.unwrap();
                let visits = cache.get("visits").await.unwrap();
                let jwt_disabled = matches!(
                    ctx.jwt(),
                    Err(ServiceError::FeatureDisabled { feature: "jwt" })
                );
                let body = json!({
                    "dsn": pool.dsn,
                    "visits": visits,
                    "jwt_disabled": jwt_disabled,
                    "request_id_set": !ctx.request_id().is_nil(),
                });
                ctx.response().json_value(&body).unwrap();
            })
        })
        .unwrap();
    let app = builder.build().unwrap();

    let response = send(&app, get("/services")).await;
    assert_eq!(
        body_json(&response),
        json!({
            "dsn": "sqlite://memory",
            "visits": "1",
            "jwt_disabled": true,
            "request_id_set": true,
        })
    );
}
