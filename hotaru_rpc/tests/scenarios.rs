//! End-to-end coverage over real loopback sockets: plain application
//! messaging, RMI success/failure, serializer type mismatches, request
//! interleaving, and cancellation on local close.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use hotaru_rpc::connection::{Controller, ConnectionState, DispatchError, NetworkConnectionBuilder};
use hotaru_rpc::{
    connect as client_connect, ClientBuilder, ControllerErrorKind, JsonSerializer, NetworkConfig, NetworkError,
    ServerBuilder, WireValue,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("hotaru_rpc=debug").try_init();
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    (connected.unwrap(), accepted.unwrap().0)
}

struct AddController;

#[async_trait]
impl Controller for AddController {
    async fn dispatch(
        &self,
        method: &str,
        parameter_types: &[String],
        parameters: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError> {
        match (method, parameter_types) {
            ("Add", [a, b]) if a == "i32" && b == "i32" => {
                let a = parameters[0].as_i64().unwrap();
                let b = parameters[1].as_i64().unwrap();
                Ok(serde_json::json!(a + b))
            }
            _ => Err(DispatchError::MethodNotFound),
        }
    }
}

struct SlowController;

#[async_trait]
impl Controller for SlowController {
    async fn dispatch(
        &self,
        _method: &str,
        _parameter_types: &[String],
        _parameters: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(serde_json::Value::Null)
    }
}

#[tokio::test]
async fn echo_round_trip_carries_plain_application_values() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new().build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let server = NetworkConnectionBuilder::new().build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));

    client.write_object(WireValue::String("hello".to_string())).await.unwrap();

    match server.read_object().await.unwrap() {
        Some(WireValue::String(s)) => assert_eq!(s, "hello"),
        other => panic!("unexpected value: {other:?}"),
    }
}

#[tokio::test]
async fn rmi_call_succeeds_against_a_registered_controller() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let server = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));
    server.use_instance("demo::Math, demo", Arc::new(AddController));

    let controller = client.get_controller("demo::Math, demo");
    let sum: i32 = controller.call("Add", &["i32", "i32"], (2, 3)).await.unwrap();
    assert_eq!(sum, 5);
}

#[tokio::test]
async fn rmi_call_reports_method_not_found() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let server = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));
    server.use_instance("demo::Math, demo", Arc::new(AddController));

    let controller = client.get_controller("demo::Math, demo");
    let err = controller
        .call::<_, i32>("Subtract", &["i32", "i32"], (2, 3))
        .await
        .unwrap_err();
    match err {
        NetworkError::ControllerInvocation(ControllerErrorKind::MethodNotFound { method, .. }) => {
            assert_eq!(method, "Subtract");
        }
        other => panic!("expected MethodNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_object_type_breaks_the_receiving_connection() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new().build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let restrictive = Arc::new(JsonSerializer::new().register("known::Type"));
    let server = NetworkConnectionBuilder::new()
        .serializer(restrictive)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));

    client
        .write_object(WireValue::Object("unknown::Type".to_string(), serde_json::json!({"n": 1})))
        .await
        .unwrap();

    let err = server.read_object().await.unwrap_err();
    match err {
        NetworkError::SerializationTypeNotFound { type_name, .. } => assert_eq!(type_name, "unknown::Type"),
        other => panic!("expected SerializationTypeNotFound, got {other:?}"),
    }
    assert_eq!(server.state(), ConnectionState::Broken);
}

#[tokio::test]
async fn one_hundred_interleaved_rmi_calls_all_correlate_to_their_own_response() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let server = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));
    server.use_instance("demo::Math, demo", Arc::new(AddController));

    let mut handles = Vec::new();
    for n in 0..100 {
        let controller = client.get_controller("demo::Math, demo");
        handles.push(tokio::spawn(async move {
            let sum: i32 = controller.call("Add", &["i32", "i32"], (n, 1)).await.unwrap();
            assert_eq!(sum, n + 1);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn closing_a_connection_cancels_its_outstanding_calls() {
    let (client_stream, server_stream) = tcp_pair().await;
    let client = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(client_stream));
    let server = NetworkConnectionBuilder::new()
        .listening(true)
        .build(hotaru_rpc::connection::TcpConnectionStream::new_tcp(server_stream));
    server.use_instance("demo::Slow, demo", Arc::new(SlowController));

    let controller = client.get_controller("demo::Slow, demo");
    let call = tokio::spawn(async move { controller.call::<_, serde_json::Value>("Anything", &[], ()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        NetworkError::ControllerInvocation(ControllerErrorKind::OperationCancelled)
    ));

    let err = client.write_object(WireValue::Empty).await.unwrap_err();
    assert!(matches!(err, NetworkError::ObjectDisposed));
}

#[tokio::test]
async fn client_and_server_builders_complete_the_credential_handshake() {
    let server = ServerBuilder::new()
        .config(NetworkConfig::default().with_listening(true))
        .bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = server.local_addr();
    let server = Arc::new(server);
    let serve_handle = tokio::spawn(server.clone().serve());

    let client = client_connect(addr).await.unwrap();
    client.write_object(WireValue::String("ping".to_string())).await.unwrap();

    // Give the accept loop a moment to register the peer before we
    // check it, since authentication runs on its own spawned task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.peers().len(), 1);

    serve_handle.abort();
}

#[tokio::test]
async fn anonymous_credentials_are_rejected_by_a_custom_authenticator() {
    let server = ServerBuilder::new()
        .config(NetworkConfig::default().with_listening(true))
        .authenticate(|credentials, _addr| Box::pin(async move { !credentials.is_anonymous() }))
        .bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = server.local_addr();
    let server = Arc::new(server);
    let serve_handle = tokio::spawn(server.clone().serve());

    let err = ClientBuilder::new().connect(addr).await.unwrap_err();
    assert!(matches!(err, NetworkError::ClientAuthentication));

    serve_handle.abort();
}
