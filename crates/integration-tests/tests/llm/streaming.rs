use integration_tests::{ScriptedReply, TestOpenAIServer, client_config, content_frame};
use llm::{GenerationRequest, GenerationSettings, LlmClient, LlmError, Message, SendOptions, StreamDelta};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn request() -> GenerationRequest {
    GenerationRequest::new("mock/model", vec![Message::system("Be brief."), Message::user("Say hello")])
}

#[tokio::test]
async fn streamed_text_is_accumulated() {
    let server = TestOpenAIServer::with_script(vec![ScriptedReply::text(&["Hello", ",", " world", "!"])]).await;
    let client = LlmClient::builder(&client_config(&server, "")).build().unwrap();

    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    insta::assert_json_snapshot!(response, @r#"
    {
      "text": "Hello, world!",
      "images": [],
      "finish_reason": "stop",
      "native_finish_reason": "stop",
      "usage": {
        "prompt_tokens": 10,
        "completion_tokens": 5,
        "total_tokens": 15,
        "cost": 0.0001
      },
      "model": "mock/model"
    }
    "#);
}

#[tokio::test]
async fn request_is_always_streamed() {
    let server = TestOpenAIServer::start().await;
    let client = LlmClient::builder(&client_config(&server, "")).build().unwrap();

    let settings = GenerationSettings {
        temperature: Some(0.2),
        max_tokens: Some(0),
        ..GenerationSettings::new("mock/model")
    };

    client
        .send_with_context(
            &[Message::user("Hi")],
            &settings,
            &CancellationToken::new(),
            SendOptions::default(),
        )
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-key"));

    insta::assert_json_snapshot!(requests[0].body, @r#"
    {
      "max_tokens": 1,
      "messages": [
        {
          "content": "Hi",
          "role": "user"
        }
      ],
      "model": "mock/model",
      "stream": true,
      "stream_options": {
        "include_usage": true
      },
      "temperature": 0.2
    }
    "#);
}

#[tokio::test]
async fn deltas_arrive_in_order() {
    let server = TestOpenAIServer::with_script(vec![ScriptedReply::text(&["one ", "two ", "three"])]).await;
    let client = LlmClient::builder(&client_config(&server, "")).build().unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let request = request();

    let response = client
        .send_with_context(
            &request.messages,
            &request.settings,
            &CancellationToken::new(),
            SendOptions { deltas: Some(sender) },
        )
        .await
        .unwrap();

    let mut text = String::new();

    while let Some(delta) = receiver.recv().await {
        if let StreamDelta::Text(fragment) = delta {
            text.push_str(&fragment);
        }
    }

    assert_eq!(text, "one two three");
    assert_eq!(response.text, text);
}

#[tokio::test]
async fn content_policy_rejection_becomes_a_refusal() {
    let frames = vec![
        content_frame("I'll explain how", None),
        r#"{"choices":[{"delta":{},"finish_reason":"content_filter","native_finish_reason":"PROHIBITED_CONTENT"}]}"#
            .to_string(),
        "[DONE]".to_string(),
    ];

    let server = TestOpenAIServer::with_script(vec![ScriptedReply::frames(frames)]).await;

    let config = client_config(
        &server,
        r#"
        [stream]
        refusal_message = "I can't help with that."
        "#,
    );

    let client = LlmClient::builder(&config).build().unwrap();
    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "I can't help with that.");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.native_finish_reason.as_deref(), Some("PROHIBITED_CONTENT"));
}

#[tokio::test]
async fn stream_without_finish_reason_is_incomplete() {
    let frames = vec![content_frame("Once upon", None), content_frame(" a time", None)];
    let server = TestOpenAIServer::with_script(vec![ScriptedReply::frames(frames)]).await;

    let config = client_config(&server, "[retry]\nmax_attempts = 1\n");
    let client = LlmClient::builder(&config).build().unwrap();

    let error = client.send(&request(), &CancellationToken::new()).await.unwrap_err();

    let LlmError::IncompleteGeneration { finish_reason, last_line } = error.root() else {
        unreachable!("unexpected error: {error}");
    };

    assert!(finish_reason.is_none());
    assert!(last_line.as_deref().is_some_and(|line| line.contains(" a time")));
}

#[tokio::test]
async fn mid_stream_provider_error_is_retried() {
    let failing = vec![
        content_frame("Hel", None),
        r#"{"error":{"message":"Upstream provider disconnected","code":502}}"#.to_string(),
    ];

    let server = TestOpenAIServer::with_script(vec![
        ScriptedReply::frames(failing),
        ScriptedReply::text(&["Hello"]),
    ])
    .await;

    let client = LlmClient::builder(&client_config(&server, "")).build().unwrap();
    let response = client.send(&request(), &CancellationToken::new()).await.unwrap();

    assert_eq!(response.text, "Hello");
    assert_eq!(server.requests().len(), 2);
}
