use indoc::formatdoc;
use integration_tests::{TestOpenAIServer, client_config};
use llm::{Diagnostic, DiagnosticSink, GenerationRequest, LlmClient, LlmError, Message};
use tokio_util::sync::CancellationToken;

// Nothing listens on port 1, so connecting through it is refused at once.
const DEAD_PROXY: &str = "http://127.0.0.1:1";

fn request() -> GenerationRequest {
    GenerationRequest::new("mock/model", vec![Message::user("ping")])
}

#[tokio::test]
async fn failing_proxy_is_skipped() {
    let server = TestOpenAIServer::start().await;

    // The mock server doubles as a plain HTTP forward proxy: it routes the
    // absolute-form request by path.
    let extra = formatdoc! {r#"
        [[proxy.pool]]
        url = "{DEAD_PROXY}"

        [[proxy.pool]]
        url = "http://{address}"
    "#, address = server.address()};

    let (sink, mut diagnostics) = DiagnosticSink::channel(16);
    let client = LlmClient::builder(&client_config(&server, &extra))
        .diagnostics(sink)
        .build()
        .unwrap();

    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "Hello from mock");
    assert_eq!(server.requests().len(), 1);

    let failures: Vec<_> = client
        .proxy_dispatcher()
        .pool()
        .entries()
        .iter()
        .map(|entry| entry.failure_count())
        .collect();

    assert_eq!(failures, vec![1, 0]);

    let Ok(Diagnostic::ProxyFailed { proxy, failure_count, .. }) = diagnostics.try_recv() else {
        unreachable!("expected a proxy failure");
    };

    assert_eq!(proxy, DEAD_PROXY);
    assert_eq!(failure_count, 1);
}

#[tokio::test]
async fn every_proxy_failing_is_a_transport_error() {
    let server = TestOpenAIServer::start().await;

    let extra = formatdoc! {r#"
        [[proxy.pool]]
        url = "{DEAD_PROXY}"
    "#};

    let client = LlmClient::builder(&client_config(&server, &extra)).build().unwrap();
    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error.root(), LlmError::ProxiesExhausted { attempted: 1, .. }));
    assert_eq!(error.error_type(), "transport_error");
    assert!(server.requests().is_empty());
    assert_eq!(client.proxy_dispatcher().pool().entries()[0].failure_count(), 2);
}

#[tokio::test]
async fn blacklisted_pool_fails_without_connecting() {
    let server = TestOpenAIServer::start().await;

    let extra = formatdoc! {r#"
        [proxy]
        failure_threshold = 1
        cooldown = "30m"

        [[proxy.pool]]
        url = "{DEAD_PROXY}"
    "#};

    let client = LlmClient::builder(&client_config(&server, &extra)).build().unwrap();
    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error.root(), LlmError::NoProxyAvailable));
    assert_eq!(client.proxy_dispatcher().pool().entries()[0].failure_count(), 1);
}

#[tokio::test]
async fn empty_pool_without_direct_egress_never_connects() {
    let server = TestOpenAIServer::start().await;

    let mut config = client_config(&server, "");
    config.proxy.direct = false;

    let client = LlmClient::builder(&config).build().unwrap();
    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error.root(), LlmError::NoProxyAvailable));
    assert!(server.requests().is_empty());
}
