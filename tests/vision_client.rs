mod common;

use axum::http::StatusCode;

use common::MockVision;
use diagram_crop::vision::{VisionClient, VisionModel, VisionRequest};

fn request() -> VisionRequest {
    VisionRequest {
        image_data_uri: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        prompt: "where is the figure?".to_string(),
        max_tokens: 100,
        temperature: 0.1,
    }
}

#[tokio::test]
async fn sends_image_and_prompt_with_bearer_key() {
    let (mock, url) = MockVision::start(StatusCode::OK, "", r#"{"box": [1, 2, 3, 4]}"#).await;
    let client = VisionClient::new(reqwest::Client::new(), url, "sk-test").with_model("vl-test");

    let reply = client.complete(request()).await.unwrap();
    assert_eq!(reply, r#"{"box": [1, 2, 3, 4]}"#);

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "vl-test");
    let content = &body["messages"][0]["content"];
    assert_eq!(content[0]["type"], "image_url");
    assert_eq!(
        content[0]["image_url"]["url"],
        "data:image/png;base64,iVBORw0KGgo="
    );
    assert_eq!(content[1]["text"], "where is the figure?");
}

#[tokio::test]
async fn error_status_carries_api_message() {
    let (_mock, url) = MockVision::start(StatusCode::NOT_FOUND, "", "").await;
    let client = VisionClient::new(reqwest::Client::new(), url, "sk-test");

    let err = client.complete(request()).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("404"), "{}", message);
    assert!(message.contains("model not found"), "{}", message);
}

#[test]
fn blank_model_keeps_default() {
    let client = VisionClient::new(reqwest::Client::new(), "http://localhost", "sk")
        .with_model("  ");
    assert!(!client.model().trim().is_empty());
}
