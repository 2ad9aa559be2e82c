use std::time::Duration;

use serde_json::json;
use wire_rpc::{ClientBuilder, ClientError, JsonType, ParamSpec, Server};

async fn spawn_arith_server() -> std::net::SocketAddr {
    let arith = wire_rpc::Service::builder()
        .add_return(
            "Add",
            vec![ParamSpec::new("lhs", JsonType::Double), ParamSpec::new("rhs", JsonType::Double)],
            |req| async move {
                let params = req["params"].as_array().cloned().unwrap_or_default();
                Ok(json!(params[0].as_f64().unwrap() + params[1].as_f64().unwrap()))
            },
        )
        .add_notify("Log", vec![ParamSpec::new("value", JsonType::Double)], |_req| async move {})
        .build();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Server::builder()
        .add_service("Arith", arith)
        .max_message_len(4096)
        .high_water_mark(1024)
        .build();

    tokio::spawn(async move {
        let _ = server.serve(addr).await;
    });

    // Give the listener a moment to bind before the test dials in.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

#[tokio::test]
async fn call_round_trips_a_result() {
    let addr = spawn_arith_server().await;
    let client = ClientBuilder::new()
        .default_timeout(Duration::from_secs(2))
        .connect(addr)
        .await
        .unwrap();

    let result = client.call("Arith.Add", json!([3.0, 4.0]), None).await.unwrap();
    assert_eq!(result, json!(7.0));
}

#[tokio::test]
async fn unknown_method_surfaces_as_a_remote_error() {
    let addr = spawn_arith_server().await;
    let client = ClientBuilder::new()
        .default_timeout(Duration::from_secs(2))
        .connect(addr)
        .await
        .unwrap();

    match client.call("Arith.Pow", json!([1.0, 2.0]), None).await {
        Err(ClientError::Remote { code, .. }) => assert_eq!(code, -32601),
        other => panic!("expected a Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn notify_has_no_reply_but_does_not_break_subsequent_calls() {
    let addr = spawn_arith_server().await;
    let client = ClientBuilder::new()
        .default_timeout(Duration::from_secs(2))
        .connect(addr)
        .await
        .unwrap();

    assert!(client.notify("Arith.Log", json!([1.0])));
    let result = client.call("Arith.Add", json!([1.0, 1.0]), None).await.unwrap();
    assert_eq!(result, json!(2.0));
}

#[tokio::test]
async fn concurrent_calls_on_one_client_are_correlated_independently() {
    let addr = spawn_arith_server().await;
    let client = ClientBuilder::new()
        .default_timeout(Duration::from_secs(2))
        .connect(addr)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .call("Arith.Add", json!([i as f64, 1.0]), None)
                .await
                .unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result, json!(i as f64 + 1.0));
    }
}

#[tokio::test]
async fn oversized_declared_length_closes_the_connection() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let addr = spawn_arith_server().await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();

    // Declares a body far larger than the server's 4096-byte cap.
    stream.write_all(b"999999\r\n").await.unwrap();

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf[..n]);
    assert!(text.contains("-32600"));

    // The server closes the connection after the error frame.
    let mut trailing = [0u8; 16];
    let n = stream.read(&mut trailing).await.unwrap_or(0);
    assert_eq!(n, 0);
}
