//! Socket-level end-to-end tests driving the real accept loop: handshake,
//! then sign-up/sign-in/sign-out over the framed protocol.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use dvdyellow_server::connection::{decode_frame, encode_frame};
use dvdyellow_server::handshake::{build_hello, read_accept, FRAME_SIZE};
use dvdyellow_server::mux::Mux;
use dvdyellow_server::persistence::Store;
use dvdyellow_server::server::{Server, PROTOCOL_VERSION};
use dvdyellow_server::value::{map, Value};

async fn spawn_test_server() -> std::net::SocketAddr {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let mux = Arc::new(Mux::new(store));
    let server = Server::new(mux, 16);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let bind_addr = addr.to_string();
    tokio::spawn(async move {
        let _ = server.run(&bind_addr).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn read_response(stream: &mut TcpStream) -> Value {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    let (channel, body) = decode_frame(&payload).unwrap();
    assert_eq!(channel, 0);
    body
}

async fn send_request(stream: &mut TcpStream, module: i64, fields: Value) {
    let frame = encode_frame(0, Value::List(vec![Value::Int(module), fields]));
    stream.write_all(&frame).await.unwrap();
}

#[tokio::test]
async fn handshake_then_sign_up_sign_in_sign_out() {
    let addr = spawn_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let hello = build_hello(PROTOCOL_VERSION);
    stream.write_all(&hello).await.unwrap();
    assert!(read_accept(&mut stream).await.unwrap());

    const MODULE_AUTH: i64 = 3;

    send_request(
        &mut stream,
        MODULE_AUTH,
        map().set("command", "sign-up").set("username", "john").set("password", "best123").build(),
    )
    .await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("status").unwrap().as_str(), Some("ok"));

    send_request(
        &mut stream,
        MODULE_AUTH,
        map().set("command", "sign-in").set("username", "john").set("password", "wrong").build(),
    )
    .await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("status").unwrap().as_str(), Some("error"));
    assert_eq!(resp.as_map().unwrap().get("code").unwrap().as_str(), Some("WRONG_PASSWORD"));

    send_request(
        &mut stream,
        MODULE_AUTH,
        map().set("command", "sign-in").set("username", "john").set("password", "best123").build(),
    )
    .await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("status").unwrap().as_str(), Some("ok"));

    send_request(&mut stream, MODULE_AUTH, map().set("command", "get-status").build()).await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("authenticated").unwrap().as_bool(), Some(true));
    assert_eq!(resp.as_map().unwrap().get("username").unwrap().as_str(), Some("john"));

    send_request(&mut stream, MODULE_AUTH, map().set("command", "sign-out").build()).await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("status").unwrap().as_str(), Some("ok"));
}

#[tokio::test]
async fn handshake_rejects_unsupported_version() {
    let addr = spawn_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let hello = build_hello(PROTOCOL_VERSION + 1000);
    stream.write_all(&hello).await.unwrap();

    let mut buf = [0u8; FRAME_SIZE];
    let result = stream.read_exact(&mut buf).await;
    // The server closes without replying for a rejected version.
    assert!(result.is_err());
}

#[tokio::test]
async fn presence_module_requires_authentication() {
    let addr = spawn_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let hello = build_hello(PROTOCOL_VERSION);
    stream.write_all(&hello).await.unwrap();
    assert!(read_accept(&mut stream).await.unwrap());

    const MODULE_PRESENCE: i64 = 4;
    send_request(&mut stream, MODULE_PRESENCE, map().set("command", "start-listening").build()).await;
    let resp = read_response(&mut stream).await;
    assert_eq!(resp.as_map().unwrap().get("status").unwrap().as_str(), Some("error"));
}
