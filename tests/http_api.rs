#![cfg(feature = "server")]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use llm_contract::http::{AppState, router};
use llm_contract::schema::{ContractForm, ProjectForm};
use llm_contract::types::{ContentPart, GenerateRequest, GenerateResponse};
use llm_contract::{Engine, InvocationError, LanguageModel, Project, Store, User};
use serde_json::{Value, json};
use tower::util::ServiceExt;

struct UppercaseModel;

#[async_trait]
impl LanguageModel for UppercaseModel {
    fn provider(&self) -> &str {
        "fake"
    }

    fn model_id(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, InvocationError> {
        let input = request
            .messages
            .last()
            .and_then(|message| serde_json::from_str::<Value>(&message.content).ok())
            .and_then(|value| value.get("input").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        Ok(GenerateResponse {
            content: vec![ContentPart::ToolCall {
                id: "call_1".to_string(),
                name: "structured_response".to_string(),
                arguments: json!({"output": input.to_uppercase(), "was_corrected": true}),
            }],
            ..GenerateResponse::default()
        })
    }
}

async fn app() -> (axum::Router, Project) {
    let engine = Engine::new(Store::memory(), Arc::new(UppercaseModel));
    engine
        .store()
        .save(&User::new("u1", "octocat"))
        .await
        .expect("save user");
    let form = ProjectForm {
        name: "Shout".to_string(),
        instructions: "Uppercase the input.".to_string(),
        request: ContractForm::from_pairs(&["input"], &["Text"]).expect("request form"),
        response: ContractForm::from_pairs(&["output", "was_corrected"], &["Text", "Boolean"])
            .expect("response form"),
        model: None,
        collect_payload: None,
    };
    let project = engine
        .create_project("u1", &form)
        .await
        .expect("create project");
    (router(AppState::new(engine)), project)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn invoke_returns_the_validated_record() {
    let (app, project) = app().await;
    let response = app
        .oneshot(
            Request::post(format!("/api/{}", project.endpoint))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"input": "hello"}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"output": "HELLO", "was_corrected": true})
    );
}

#[tokio::test]
async fn form_bodies_are_decoded() {
    let (app, project) = app().await;
    let response = app
        .oneshot(
            Request::post(format!("/api/{}", project.endpoint))
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("input=quiet+please"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["output"], "QUIET PLEASE");
}

#[tokio::test]
async fn validation_failure_is_422_with_error_envelope() {
    let (app, project) = app().await;
    let response = app
        .oneshot(
            Request::post(format!("/api/{}", project.endpoint))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"input": "hello", "extra": 1}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_payload");
    assert!(body["error"]["message"].as_str().is_some());
}

#[tokio::test]
async fn missing_content_type_is_422() {
    let (app, project) = app().await;
    let response = app
        .oneshot(
            Request::post(format!("/api/{}", project.endpoint))
                .body(Body::from(r#"{"input": "hello"}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_endpoint_is_404() {
    let (app, _) = app().await;
    let response = app
        .oneshot(
            Request::post("/api/does-not-exist")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "not_found");
}
