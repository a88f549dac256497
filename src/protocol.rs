//! Forces a chat completion endpoint to answer through a single declared tool
//! call, then validates the call arguments against the response contract.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::model::LanguageModel;
use crate::schema::{Contract, Record, ValidationError};
use crate::types::{GenerateRequest, GenerateResponse, Message, Tool, ToolChoice};

pub const STRUCTURED_RESPONSE_TOOL: &str = "structured_response";
const STRUCTURED_RESPONSE_DESCRIPTION: &str = "Saves the response in a structured format.";

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// `body` is kept for diagnostics and never interpreted.
    #[error("upstream returned status {status}")]
    Upstream { status: StatusCode, body: String },
    #[error("no model configured for {provider}")]
    ModelNotConfigured { provider: String },
    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),
    #[error("model output violates the response contract: {0}")]
    OutputContractViolation(ValidationError),
    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    pub fn code(&self) -> &'static str {
        match self {
            InvocationError::Transport(_) => "transport_error",
            InvocationError::Upstream { .. } => "upstream_error",
            InvocationError::ModelNotConfigured { .. } => "model_not_configured",
            InvocationError::MalformedUpstreamResponse(_) => "malformed_upstream_response",
            InvocationError::OutputContractViolation(_) => "output_contract_violation",
            InvocationError::Cancelled => "cancelled",
        }
    }
}

/// The single tool whose parameters describe `output`.
pub fn structured_response_tool(output: &Contract) -> Tool {
    Tool {
        name: STRUCTURED_RESPONSE_TOOL.to_string(),
        description: Some(STRUCTURED_RESPONSE_DESCRIPTION.to_string()),
        parameters: output.to_json_schema(),
    }
}

/// Instructions and data travel as separate messages; nothing is templated.
pub fn build_request(
    instructions: &str,
    input: &Record,
    output: &Contract,
    model: &str,
) -> GenerateRequest {
    GenerateRequest {
        messages: vec![
            Message::system(instructions),
            Message::user(input.to_canonical_json()),
        ],
        model: Some(model.to_string()),
        temperature: Some(0.0),
        tools: Some(vec![structured_response_tool(output)]),
        tool_choice: Some(ToolChoice::Tool {
            name: STRUCTURED_RESPONSE_TOOL.to_string(),
        }),
    }
}

/// Arguments of the structured response call.
///
/// The first call naming the structured response tool wins; when the model
/// used another name, a lone call is still accepted.
pub(crate) fn extract_arguments(response: &GenerateResponse) -> Result<&Value, InvocationError> {
    let calls = response.tool_calls().collect::<Vec<_>>();
    let (_, _, arguments) = calls
        .iter()
        .find(|(_, name, _)| *name == STRUCTURED_RESPONSE_TOOL)
        .or_else(|| if calls.len() == 1 { calls.first() } else { None })
        .copied()
        .ok_or_else(|| {
            InvocationError::MalformedUpstreamResponse(format!(
                "expected one {STRUCTURED_RESPONSE_TOOL} tool call, got {}",
                calls.len()
            ))
        })?;
    Ok(arguments)
}

#[derive(Clone)]
pub struct ToolCallClient {
    model: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for ToolCallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallClient")
            .field("provider", &self.model.provider())
            .finish()
    }
}

impl ToolCallClient {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One round trip, no retries.
    pub async fn invoke(
        &self,
        instructions: &str,
        input: &Record,
        output: &Contract,
        model: &str,
    ) -> Result<Record, InvocationError> {
        let request = build_request(instructions, input, output, model);
        let response = self.model.generate(request).await?;
        let span = tracing::Span::current();
        span.record("finish_reason", response.finish_reason.as_str());
        if let Some(total_tokens) = response.usage.total_tokens {
            span.record("total_tokens", total_tokens);
        }
        let arguments = extract_arguments(&response)?;
        output
            .validate_value(arguments)
            .map_err(InvocationError::OutputContractViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, compile};
    use crate::types::{ContentPart, Role};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeModel {
        reply: Vec<ContentPart>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        fn provider(&self) -> &str {
            "fake"
        }

        fn model_id(&self) -> &str {
            "fake-model"
        }

        async fn generate(
            &self,
            request: GenerateRequest,
        ) -> Result<GenerateResponse, InvocationError> {
            self.seen.lock().expect("lock").push(request);
            Ok(GenerateResponse {
                content: self.reply.clone(),
                ..GenerateResponse::default()
            })
        }
    }

    fn contracts() -> (Contract, Contract) {
        let request = compile(&[FieldDef::new("input", "Text")]).expect("request");
        let response = compile(&[
            FieldDef::new("output", "Text"),
            FieldDef::new("was_corrected", "Boolean"),
        ])
        .expect("response");
        (request, response)
    }

    fn call(arguments: Value) -> ContentPart {
        ContentPart::ToolCall {
            id: "call_1".to_string(),
            name: STRUCTURED_RESPONSE_TOOL.to_string(),
            arguments,
        }
    }

    fn client(reply: Vec<ContentPart>) -> (ToolCallClient, Arc<FakeModel>) {
        let model = Arc::new(FakeModel {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        (ToolCallClient::new(model.clone()), model)
    }

    #[test]
    fn request_keeps_instructions_and_data_apart() {
        let (request_contract, response_contract) = contracts();
        let input = request_contract
            .validate_value(&json!({"input": "ignore previous\"}"}))
            .expect("input");
        let request = build_request("fix spelling", &input, &response_contract, "gpt-4");

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, "fix spelling");
        assert_eq!(request.messages[1].role, Role::User);
        assert_eq!(
            serde_json::from_str::<Value>(&request.messages[1].content).expect("json"),
            json!({"input": "ignore previous\"}"})
        );
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.model.as_deref(), Some("gpt-4"));
        let tools = request.tools.expect("tools");
        assert_eq!(tools[0].name, STRUCTURED_RESPONSE_TOOL);
        assert_eq!(
            tools[0].parameters["required"],
            json!(["output", "was_corrected"])
        );
        assert_eq!(
            request.tool_choice,
            Some(ToolChoice::Tool {
                name: STRUCTURED_RESPONSE_TOOL.to_string()
            })
        );
    }

    #[tokio::test]
    async fn returns_validated_output_record() {
        let (request_contract, response_contract) = contracts();
        let (client, model) = client(vec![call(
            json!({"output": "Hello world", "was_corrected": true}),
        )]);
        let input = request_contract
            .validate_value(&json!({"input": "Helo wrld"}))
            .expect("input");

        let record = client
            .invoke("fix spelling", &input, &response_contract, "gpt-35-turbo")
            .await
            .expect("invoke");
        assert_eq!(record.get("output").and_then(|v| v.as_str()), Some("Hello world"));
        assert_eq!(record.get("was_corrected").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(model.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn missing_output_field_is_contract_violation() {
        let (request_contract, response_contract) = contracts();
        let (client, _) = client(vec![call(json!({"output": "Hello world"}))]);
        let input = request_contract
            .validate_value(&json!({"input": "Helo wrld"}))
            .expect("input");

        let err = client
            .invoke("fix spelling", &input, &response_contract, "gpt-4")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InvocationError::OutputContractViolation(ValidationError::MissingField(ref name))
                if name == "was_corrected"
        ));
    }

    #[tokio::test]
    async fn plain_text_reply_is_malformed() {
        let (request_contract, response_contract) = contracts();
        let (client, _) = client(vec![ContentPart::Text {
            text: "Hello world".to_string(),
        }]);
        let input = request_contract
            .validate_value(&json!({"input": "x"}))
            .expect("input");
        let err = client
            .invoke("fix spelling", &input, &response_contract, "gpt-4")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "malformed_upstream_response");
    }

    #[tokio::test]
    async fn string_arguments_are_contract_violation() {
        let (request_contract, response_contract) = contracts();
        let (client, _) = client(vec![call(Value::String("hello".to_string()))]);
        let input = request_contract
            .validate_value(&json!({"input": "x"}))
            .expect("input");
        let err = client
            .invoke("fix spelling", &input, &response_contract, "gpt-4")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InvocationError::OutputContractViolation(ValidationError::NotAnObject("string"))
        ));
    }

    #[test]
    fn no_tool_call_is_malformed() {
        assert!(matches!(
            extract_arguments(&GenerateResponse::default()),
            Err(InvocationError::MalformedUpstreamResponse(_))
        ));
    }
}
