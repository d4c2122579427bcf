//! A small condor application.
//!
//! ```text
//! APP_HTTP_PORT=8080 cargo run --example hello_world
//! curl localhost:8080/hello/ada
//! curl -X POST -d 'email=ada@example.com&name=Ada' localhost:8080/api/users
//! ```

use std::time::Duration;

use condor::events::Event;
use condor::middleware::LoggerMiddleware;
use condor::security::CorsMiddleware;
use condor::{App, Config, Server, StatusCode};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?.with_request_timeout(Duration::from_secs(30));
    condor::logging::init(&config.log)?;
    let addr = config.http.addr();

    let mut builder = App::builder(config);
    builder
        .attach_middleware(LoggerMiddleware)
        .attach_middleware(CorsMiddleware::new());

    builder.on("user.registered", |event, ctx| {
        Box::pin(async move {
            let sent = ctx
                .mailer()
                .compose()
                .from("welcome@example.com")
                .to(event.payload["email"].as_str().unwrap_or_default())
                .subject("Welcome!")
                .plain_text_body("Thanks for signing up.")
                .send()
                .await;
            if let Err(err) = sent {
                tracing::warn!(error = %err, "welcome mail not sent");
            }
        })
    })?;

    let router = builder.router();
    router.get("/hello/:name", |ctx| {
        Box::pin(async move {
            let name = ctx.request().path_param("name").unwrap_or("world").to_owned();
            ctx.response().text(format!("Hello, {name}!"));
        })
    })?;
    router.options("/*", |_ctx| Box::pin(async {}))?;
    router.group("/api", Vec::new(), |api| {
        api.post("/users", |ctx| {
            Box::pin(async move {
                let input = json!({
                    "email": ctx.request().param("email"),
                    "name": ctx.request().param("name"),
                });
                let checked = ctx
                    .validator()
                    .validate(&input, [("email", "required|email"), ("name", "required|min:2")]);
                match checked {
                    Ok(result) if result.failed() => {
                        ctx.response()
                            .set_status(StatusCode::UnprocessableEntity)
                            .json(result.messages_json());
                    }
                    Ok(_) => {
                        let event = Event::new("user.registered").with_payload(input);
                        if let Err(err) = ctx.fire(event) {
                            tracing::error!(error = %err, "could not queue welcome mail");
                        }
                        ctx.response()
                            .set_status(StatusCode::Created)
                            .json(r#"{"created": true}"#);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "bad validation rules");
                        ctx.response().set_status(StatusCode::InternalServerError);
                    }
                }
            })
        })?;
        Ok(())
    })?;

    Server::bind(addr).await?.serve(builder.build()?).await?;
    Ok(())
}
