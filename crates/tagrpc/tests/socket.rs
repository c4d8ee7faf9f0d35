//! Calls over real TCP connections on the loopback interface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use tagrpc::Client;
use tagrpc::Error;
use tagrpc::MethodOptions;
use tagrpc::Service;
use tagrpc::SocketOptions;
use tagrpc::SocketServer;
use tagrpc::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn echo_service() -> Service {
    let mut service = Service::new();
    service
        .add_function(
            "multiply",
            |args, _| Ok(Value::Int(args[0].cast::<i64>()? * args[1].cast::<i64>()?)),
            MethodOptions::new(),
        )
        .add_async_function(
            "sleep_echo",
            |args, _| async move {
                let millis: u64 = args[0].cast()?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<_, Error>(args[1].clone())
            },
            MethodOptions::new(),
        );
    service
}

async fn spawn_server() -> anyhow::Result<SocketAddr> {
    let server = SocketServer::bind("127.0.0.1:0", Arc::new(echo_service())).await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.run());
    Ok(addr)
}

fn client(addr: SocketAddr, full_duplex: bool) -> anyhow::Result<Client> {
    let socket = SocketOptions {
        full_duplex,
        max_connections: 4,
        ..SocketOptions::default()
    };
    Ok(Client::builder()
        .uri(format!("tcp://{}", addr))
        .socket_options(socket)
        .timeout(Duration::from_secs(10))
        .build()?)
}

#[tokio::test]
async fn test_half_duplex_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let addr = spawn_server().await?;
    let client = client(addr, false)?;

    for n in 1..=5 {
        let product: i64 = client.call("multiply", vec![Value::Int(n), Value::Int(7)]).await?;
        assert_eq!(product, n * 7);
    }
    let names = client.functions().await?;
    assert_eq!(names, vec!["multiply", "sleep_echo"]);
    Ok(())
}

#[tokio::test]
async fn test_half_duplex_pool_serves_concurrent_calls() -> anyhow::Result<()> {
    init_tracing();
    let addr = spawn_server().await?;
    let client = client(addr, false)?;

    let calls = (0..12).map(|n| {
        let client = client.clone();
        async move { client.call::<i64>("multiply", vec![Value::Int(n), Value::Int(n)]).await }
    });
    for (n, result) in join_all(calls).await.into_iter().enumerate() {
        assert_eq!(result?, (n * n) as i64);
    }
    Ok(())
}

#[tokio::test]
async fn test_full_duplex_matches_out_of_order_responses() -> anyhow::Result<()> {
    init_tracing();
    let addr = spawn_server().await?;
    let client = client(addr, true)?;

    // Later calls sleep less, so responses come back in reverse order.
    let calls = (0..8).map(|n| {
        let client = client.clone();
        async move {
            let delay = Value::Int((8 - n) * 20);
            client
                .call::<String>("sleep_echo", vec![delay, Value::from(format!("call {}", n))])
                .await
        }
    });
    for (n, result) in join_all(calls).await.into_iter().enumerate() {
        assert_eq!(result?, format!("call {}", n));
    }
    Ok(())
}

#[tokio::test]
async fn test_refused_connection_is_a_transport_error() -> anyhow::Result<()> {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    for full_duplex in [false, true] {
        let client = client(addr, full_duplex)?;
        let err = client
            .invoke("multiply", &mut vec![Value::Int(1), Value::Int(1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
        assert!(err.is_retryable());
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_scheme_is_rejected() -> anyhow::Result<()> {
    init_tracing();
    let client = Client::builder().uri("http://127.0.0.1:1").build()?;
    let err = client.invoke("multiply", &mut Vec::new(), None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(tagrpc::TransportError::UnknownScheme(_))
    ));
    Ok(())
}
