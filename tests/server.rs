//! Drives a real `Server` over TCP.

use std::net::SocketAddr;

use condor::security::CorsMiddleware;
use condor::{App, Config, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn start() -> SocketAddr {
    let mut builder = App::builder(Config::default());
    builder.attach_middleware(CorsMiddleware::new());
    builder
        .router()
        .get("/ping", |ctx| Box::pin(async move { ctx.response().text("pong"); }))
        .unwrap();
    builder
        .router()
        .options("/*", |_ctx| Box::pin(async {}))
        .unwrap();
    let app = builder.build().unwrap();

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.serve(app));
    addr
}

async fn exchange(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn serves_a_route() {
    let addr = start().await;
    let reply = exchange(addr, "GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;

    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("\r\n\r\npong"));
}

#[tokio::test]
async fn unknown_route_is_404_on_the_wire() {
    let addr = start().await;
    let reply = exchange(addr, "GET /nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").await;

    assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"), "{reply}");
    assert!(reply.ends_with(r#"{"message": "Not Found"}"#));
}

#[tokio::test]
async fn cors_preflight_over_the_wire() {
    let addr = start().await;
    let reply = exchange(
        addr,
        "OPTIONS /ping HTTP/1.1\r\nHost: x\r\nOrigin: https://a.example\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(reply.starts_with("HTTP/1.1 204 No Content\r\n"), "{reply}");
    assert!(reply.contains("Access-Control-Allow-Origin: *\r\n"));
}

#[tokio::test]
async fn keep_alive_serves_several_requests() {
    let addr = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(concat!(
            "GET /ping HTTP/1.1\r\nHost: x\r\n\r\n",
            "GET /ping HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n"
        ).as_bytes())
        .await
        .unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let reply = String::from_utf8(out).unwrap();

    assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2, "{reply}");
}
