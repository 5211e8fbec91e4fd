use std::time::{Duration, Instant};

use indoc::indoc;
use integration_tests::{ScriptedReply, TestOpenAIServer, client_config, content_frame};
use llm::{Diagnostic, DiagnosticSink, GenerationRequest, LlmClient, LlmError, Message, TimeoutKind};
use tokio_util::sync::CancellationToken;

fn request() -> GenerationRequest {
    GenerationRequest::new("mock/model", vec![Message::user("Tell me a story")])
}

#[tokio::test]
async fn server_error_then_success() {
    let server = TestOpenAIServer::with_script(vec![
        ScriptedReply::Status(500, "Internal Server Error".to_string()),
        ScriptedReply::text(&["Recovered"]),
    ])
    .await;

    let (sink, mut diagnostics) = DiagnosticSink::channel(16);
    let client = LlmClient::builder(&client_config(&server, ""))
        .diagnostics(sink)
        .build()
        .unwrap();

    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "Recovered");
    assert_eq!(server.requests().len(), 2);

    let Ok(Diagnostic::AttemptFailed { attempt, error, .. }) = diagnostics.try_recv() else {
        unreachable!("expected an attempt failure");
    };

    assert_eq!(attempt, 1);
    assert!(error.contains("(500)"));
}

#[tokio::test]
async fn exhausted_attempts_carry_an_excerpt() {
    let server = TestOpenAIServer::with_script(vec![
        ScriptedReply::Status(503, "overloaded".to_string()),
        ScriptedReply::Status(503, "still overloaded".to_string()),
        ScriptedReply::Status(503, "gave up".to_string()),
    ])
    .await;

    let config = client_config(
        &server,
        indoc! {r#"
            [retry]
            max_attempts = 3
            backoff_base = "10ms"
        "#},
    );

    let client = LlmClient::builder(&config).build().unwrap();
    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    let LlmError::AttemptsExhausted {
        attempts, excerpt, ..
    } = &error
    else {
        unreachable!("unexpected error: {error}");
    };

    assert_eq!(*attempts, 3);
    assert_eq!(error.status(), Some(503));
    assert!(excerpt.request_tail.contains("Tell me a story"));

    assert!(excerpt.response.as_deref().is_some_and(|body| body.contains("gave up")));
}

#[tokio::test]
async fn stalled_stream_is_abandoned_and_retried() {
    let server = TestOpenAIServer::with_script(vec![
        ScriptedReply::stalled(vec![content_frame("Once", None)]),
        ScriptedReply::text(&["Once upon a time"]),
    ])
    .await;

    let config = client_config(
        &server,
        indoc! {r#"
            [stream]
            idle_timeout = "300ms"

            [retry]
            backoff_base = "10ms"
        "#},
    );

    let (sink, mut diagnostics) = DiagnosticSink::channel(16);
    let client = LlmClient::builder(&config).diagnostics(sink).build().unwrap();

    let start = Instant::now();
    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "Once upon a time");
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_secs(10));

    let Ok(Diagnostic::AttemptFailed { error, .. }) = diagnostics.try_recv() else {
        unreachable!("expected an attempt failure");
    };

    assert!(error.starts_with("Idle timeout"));
}

#[tokio::test]
async fn slow_but_steady_stream_is_not_interrupted() {
    let reply = ScriptedReply::text(&["a", "b", "c", "d"]).with_delay(Duration::from_millis(100));
    let server = TestOpenAIServer::with_script(vec![reply]).await;

    let config = client_config(&server, "[stream]\nidle_timeout = \"400ms\"\n");
    let client = LlmClient::builder(&config).build().unwrap();

    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "abcd");
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn attempt_deadline_is_a_timeout() {
    let server = TestOpenAIServer::with_script(vec![ScriptedReply::stalled(Vec::new())]).await;

    let config = client_config(
        &server,
        indoc! {r#"
            [stream]
            idle_timeout_enabled = false

            [retry]
            max_attempts = 1
            attempt_timeout = "300ms"
        "#},
    );

    let client = LlmClient::builder(&config).build().unwrap();
    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(error.root(), LlmError::Timeout(TimeoutKind::Deadline(_))));
    assert_eq!(error.error_type(), "timeout_error");
}

#[tokio::test]
async fn cancellation_stops_a_hanging_stream() {
    let server = TestOpenAIServer::with_script(vec![ScriptedReply::stalled(vec![content_frame("Hmm", None)])]).await;

    let config = client_config(&server, "[stream]\nidle_timeout_enabled = false\n");
    let client = LlmClient::builder(&config).build().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let error = client.send(&request(), &cancel).await.unwrap_err();

    assert!(matches!(error, LlmError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(server.requests().len(), 1);
}
