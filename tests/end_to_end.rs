//! Full loop: mocked Messages API driving the executor on a fake desktop.

#![cfg(unix)]

mod common;

use common::{decode, FakeDesktop};
use glass_desktop::{
    ActionExecutor, Agent, AgentConfig, AgentEvent, AnthropicClient, ClientConfig, Completion,
    ContentBlock,
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn click_task_against_fake_desktop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "role": "assistant",
            "content": [{
                "type": "tool_use", "id": "toolu_1", "name": "computer",
                "input": { "action": "left_click", "coordinate": [100, 200] }
            }]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "role": "assistant",
            "content": [{ "type": "text", "text": "The button was clicked." }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let desk = FakeDesktop::new();
    let computer = ActionExecutor::launch(desk.config()).await.unwrap();
    let client = AnthropicClient::new(ClientConfig {
        api_base: format!("{}/v1", server.uri()),
        api_key: "k".into(),
        ..ClientConfig::default()
    })
    .unwrap();
    let agent = Agent::new(computer, client, AgentConfig::default());

    let mut events = Vec::new();
    let outcome = agent
        .execute("click the button at (100,200)", |ev| events.push(ev))
        .await;
    agent.computer().stop().await;
    let report = outcome.unwrap();

    assert_eq!(
        report.completion,
        Completion::Answered { text: "The button was clicked.".into() }
    );
    assert_eq!(desk.calls(), vec!["mousemove --sync 100 200 click 1"]);

    let shots: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Screenshot { base64 } => Some(decode(base64)),
            _ => None,
        })
        .collect();
    assert_eq!(
        shots,
        vec![
            "desktop\n".to_string(),
            "desktop\nmousemove --sync 100 200 click 1\n".to_string(),
        ]
    );
    assert_eq!(
        events.last(),
        Some(&AgentEvent::Text { content: "The button was clicked.".into() })
    );

    // The second request carried the post-click screenshot as the tool result.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let result = &body["messages"][2]["content"][0];
    assert_eq!(result["type"], "tool_result");
    assert_eq!(result["tool_use_id"], "toolu_1");
    let image: ContentBlock = serde_json::from_value(result["content"][0].clone()).unwrap();
    match image {
        ContentBlock::Image { source } => {
            assert_eq!(decode(&source.data), "desktop\nmousemove --sync 100 200 click 1\n")
        }
        other => panic!("expected image, got {other:?}"),
    }
}
