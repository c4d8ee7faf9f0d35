use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tagpack::Value;

use crate::client::Client;
use crate::client::ClientBuilder;
use crate::client::backoff;
use crate::context::ClientContext;
use crate::context::ServiceContext;
use crate::error::Error;
use crate::error::Result;
use crate::error::TransportError;
use crate::handler::Invocation;
use crate::handler::InvokeHandler;
use crate::handler::NextInvoke;
use crate::handler::Reply;
use crate::service::Service;
use crate::settings::InvokeSettings;
use crate::settings::MethodOptions;
use crate::settings::ResultMode;
use crate::transport::MemoryTransport;
use crate::transport::Transport;
use crate::transport::TransportResult;

fn arith_service() -> Service {
    let mut service = Service::new();
    service
        .add_function(
            "multiply",
            |args, _| {
                let a: i64 = args[0].cast()?;
                let b: i64 = args[1].cast()?;
                Ok(Value::Int(a * b))
            },
            MethodOptions::new(),
        )
        .add_function("ping", |_, _| Ok(Value::from("pong")), MethodOptions::new());
    service
}

fn client_for(service: Service) -> ClientBuilder {
    let transport = MemoryTransport::new();
    transport.bind("mem://svc", Arc::new(service));
    Client::builder().uri("mem://svc").transport(transport)
}

fn remote_message(error: Error) -> String {
    match error {
        Error::Remote(message) => message,
        other => panic!("expected a remote error, got {:?}", other),
    }
}

// ============================================================================
//  BACKOFF
// ============================================================================

#[test]
fn backoff_grows_linearly_and_caps() {
    assert_eq!(backoff(1, false, 1), Duration::from_millis(500));
    assert_eq!(backoff(2, false, 1), Duration::from_millis(1000));
    assert_eq!(backoff(4, false, 1), Duration::from_millis(2000));
    assert_eq!(backoff(50, false, 1), Duration::from_millis(5000));
}

#[test]
fn backoff_with_failswitch_is_reduced_and_clamped() {
    assert_eq!(backoff(1, true, 3), Duration::ZERO);
    assert_eq!(backoff(3, true, 2), Duration::from_millis(1000));
    assert_eq!(backoff(2, true, 1), Duration::from_millis(1000));
    assert_eq!(backoff(0, true, 0), Duration::ZERO);
}

// ============================================================================
//  SERVICE
// ============================================================================

#[tokio::test]
async fn service_answers_encoded_requests() {
    let service = arith_service();
    assert_eq!(service.handle(b"Cs4\"ping\"z".to_vec()).await, b"Rs4\"pong\"z");
    assert_eq!(service.handle(b"Cs4\"PING\"z".to_vec()).await, b"Rs4\"pong\"z");
    assert_eq!(service.handle(b"Cs8\"multiply\"a2{78}z".to_vec()).await, b"Ri56;z");
    let garbage = service.handle(b"garbage".to_vec()).await;
    assert_eq!(garbage.first(), Some(&b'E'));
}

#[tokio::test]
async fn function_list_reports_registered_names() {
    let mut service = arith_service();
    service.add_function("add", |_, _| Ok(Value::Null), MethodOptions::new().namespace("math"));
    let client = client_for(service).build().unwrap();
    assert_eq!(client.functions().await.unwrap(), vec!["multiply", "ping", "math_add"]);
}

#[tokio::test]
async fn namespaced_method_is_called_by_prefixed_name() {
    let mut service = Service::new();
    service.add_function(
        "add",
        |args, _| Ok(Value::Int(args[0].cast::<i64>()? + args[1].cast::<i64>()?)),
        MethodOptions::new().namespace("math"),
    );
    let client = client_for(service).build().unwrap();
    let sum: i64 = client.call("math_add", vec![Value::Int(2), Value::Int(3)]).await.unwrap();
    assert_eq!(sum, 5);
    let err = client.call::<i64>("add", vec![Value::Int(2), Value::Int(3)]).await.unwrap_err();
    assert_eq!(remote_message(err), "can't find this method add");
}

#[tokio::test]
async fn missing_method_fallback_sees_requested_name() {
    let mut service = arith_service();
    service.add_missing_method(
        |args, ctx| {
            assert!(ctx.missing_method);
            Ok(Value::from(format!("{}/{}", ctx.method, args.len())))
        },
        MethodOptions::new(),
    );
    assert!(service.function_names().contains(&"*".to_string()));
    let client = client_for(service).build().unwrap();
    let echoed: String = client.call("Whatever", vec![Value::Int(1), Value::Int(2)]).await.unwrap();
    assert_eq!(echoed, "Whatever/2");
    let product: i64 = client.call("multiply", vec![Value::Int(3), Value::Int(4)]).await.unwrap();
    assert_eq!(product, 12);
}

async fn explode_later(_: Vec<Value>, _: ServiceContext) -> Result<Value> {
    tokio::task::yield_now().await;
    panic!("later")
}

#[tokio::test]
async fn panicking_method_becomes_error_response() {
    let mut service = Service::new();
    service.add_function("explode", |_, _| panic!("boom"), MethodOptions::new());
    service.add_async_function("explode_later", explode_later, MethodOptions::new());
    let client = client_for(service).build().unwrap();

    let err = client.invoke("explode", &mut Vec::new(), None).await.unwrap_err();
    assert_eq!(remote_message(err), "panic: boom");
    let err = client.invoke("explode_later", &mut Vec::new(), None).await.unwrap_err();
    assert_eq!(remote_message(err), "panic: later");
}

#[tokio::test]
async fn async_methods_run_to_completion() {
    let mut service = Service::new();
    service.add_async_function(
        "slow_echo",
        |args, _| async move {
            tokio::task::yield_now().await;
            Ok::<_, Error>(args.into_iter().next().unwrap_or(Value::Null))
        },
        MethodOptions::new(),
    );
    let client = client_for(service).build().unwrap();
    let echoed: String = client.call("slow_echo", vec![Value::from("hi")]).await.unwrap();
    assert_eq!(echoed, "hi");
}

// ============================================================================
//  BY REFERENCE
// ============================================================================

#[tokio::test]
async fn byref_call_receives_modified_arguments() {
    let mut service = Service::new();
    service
        .add_function(
            "swap",
            |args, _| {
                args.swap(0, 1);
                Ok(Value::Null)
            },
            MethodOptions::new(),
        )
        .add_function(
            "swap_private",
            |args, _| {
                args.swap(0, 1);
                Ok(Value::Null)
            },
            MethodOptions::new().byref(false),
        );
    let client = client_for(service).byref(true).build().unwrap();

    let mut args = vec![Value::Int(1), Value::Int(2)];
    client.invoke("swap", &mut args, None).await.unwrap();
    assert_eq!(args, vec![Value::Int(2), Value::Int(1)]);

    let mut args = vec![Value::Int(1), Value::Int(2)];
    client
        .invoke("swap", &mut args, Some(InvokeSettings::new().byref(false)))
        .await
        .unwrap();
    assert_eq!(args, vec![Value::Int(1), Value::Int(2)]);

    let mut args = vec![Value::Int(1), Value::Int(2)];
    client.invoke("swap_private", &mut args, None).await.unwrap();
    assert_eq!(args, vec![Value::Int(1), Value::Int(2)]);
}

// ============================================================================
//  RESULT MODES
// ============================================================================

#[tokio::test]
async fn serialized_results_pass_through_undecoded() {
    let mut service = arith_service();
    service.add_function(
        "preencoded",
        |_, _| Ok(Value::Bytes(b"i42;".to_vec())),
        MethodOptions::new().mode(ResultMode::Serialized),
    );
    let client = client_for(service).build().unwrap();

    let answer: i64 = client.call("preencoded", Vec::new()).await.unwrap();
    assert_eq!(answer, 42);

    let raw = client
        .invoke("ping", &mut Vec::new(), Some(InvokeSettings::new().mode(ResultMode::Raw)))
        .await
        .unwrap();
    assert_eq!(raw, Value::Bytes(b"Rs4\"pong\"".to_vec()));

    let serialized = client
        .invoke("ping", &mut Vec::new(), Some(InvokeSettings::new().mode(ResultMode::Serialized)))
        .await
        .unwrap();
    assert_eq!(serialized, Value::Bytes(b"s4\"pong\"".to_vec()));
}

// ============================================================================
//  HANDLERS
// ============================================================================

struct Trace {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl InvokeHandler<ClientContext> for Trace {
    async fn invoke(&self, call: Invocation, ctx: &mut ClientContext, next: NextInvoke<'_, ClientContext>) -> Result<Reply> {
        self.log.lock().unwrap().push(format!("{}>", self.label));
        let reply = next.invoke(call, ctx).await;
        self.log.lock().unwrap().push(format!("<{}", self.label));
        reply
    }
}

#[tokio::test]
async fn first_registered_handler_is_outermost() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let client = client_for(arith_service())
        .invoke_handler(Trace { label: "a", log: log.clone() })
        .invoke_handler(Trace { label: "b", log: log.clone() })
        .build()
        .unwrap();
    let pong: String = client.call("ping", Vec::new()).await.unwrap();
    assert_eq!(pong, "pong");
    assert_eq!(*log.lock().unwrap(), vec!["a>", "b>", "<b", "<a"]);
}

struct Doubler;

#[async_trait]
impl InvokeHandler<ServiceContext> for Doubler {
    async fn invoke(&self, call: Invocation, ctx: &mut ServiceContext, next: NextInvoke<'_, ServiceContext>) -> Result<Reply> {
        let mut reply = next.invoke(call, ctx).await?;
        if let Value::Int(n) = reply.result {
            reply.result = Value::Int(n * 2);
        }
        Ok(reply)
    }
}

/// Answers without calling the method at all.
struct Cached;

#[async_trait]
impl InvokeHandler<ClientContext> for Cached {
    async fn invoke(&self, call: Invocation, ctx: &mut ClientContext, next: NextInvoke<'_, ClientContext>) -> Result<Reply> {
        if call.name == "ping" {
            return Ok(Reply::new(Value::from("cached")));
        }
        next.invoke(call, ctx).await
    }
}

#[tokio::test]
async fn handlers_can_rewrite_or_short_circuit() {
    let mut service = arith_service();
    service.add_invoke_handler(Doubler);
    let client = client_for(service).invoke_handler(Cached).build().unwrap();

    let product: i64 = client.call("multiply", vec![Value::Int(3), Value::Int(4)]).await.unwrap();
    assert_eq!(product, 24);
    let pong: String = client.call("ping", Vec::new()).await.unwrap();
    assert_eq!(pong, "cached");
}

// ============================================================================
//  CLIENT
// ============================================================================

struct Stall;

#[async_trait]
impl Transport for Stall {
    async fn send_and_receive(&self, _uri: &str, _request: Vec<u8>) -> TransportResult<Vec<u8>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn slow_transport_times_out() {
    let client = Client::builder()
        .uri("mem://slow")
        .transport(Stall)
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let err = client.invoke("anything", &mut Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Timeout)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn builder_requires_an_endpoint() {
    assert!(matches!(Client::builder().build(), Err(Error::Config(_))));
}

#[tokio::test]
async fn unknown_endpoint_is_refused() {
    let client = Client::builder()
        .uri("mem://nowhere")
        .transport(MemoryTransport::new())
        .build()
        .unwrap();
    let err = client.invoke("ping", &mut Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Refused(_))));
}

#[tokio::test(start_paused = true)]
async fn first_retry_waits_one_step() {
    let client = Client::builder()
        .uri("mem://nowhere")
        .transport(MemoryTransport::new())
        .idempotent(true)
        .retry(1)
        .build()
        .unwrap();
    let start = tokio::time::Instant::now();
    let err = client.invoke("ping", &mut Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Refused(_))));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn promise_invocation_settles_with_result() {
    let client = client_for(arith_service()).build().unwrap();
    let product = client
        .invoke_promise("multiply", vec![Value::Int(6), Value::Int(7)], None)
        .await
        .unwrap();
    assert_eq!(product, Value::Int(42));

    let failed = client.invoke_promise("missing", Vec::new(), None).await.unwrap_err();
    assert_eq!(remote_message(Error::from(failed)), "can't find this method missing");
}
