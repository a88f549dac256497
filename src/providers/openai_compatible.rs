use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ConfigError;
use crate::model::LanguageModel;
use crate::profile::{Env, HttpAuth, ProviderConfig, resolve_auth_token};
use crate::protocol::InvocationError;
use crate::types::{
    ContentPart, FinishReason, GenerateRequest, GenerateResponse, Message, Tool, ToolChoice,
    Usage, parse_tool_call_arguments,
};

#[derive(Clone)]
pub struct OpenAICompatible {
    http: reqwest::Client,
    base_url: String,
    auth: Option<HttpAuth>,
    default_model: String,
    deployments: bool,
    http_headers: BTreeMap<String, String>,
    http_query_params: BTreeMap<String, String>,
}

impl std::fmt::Debug for OpenAICompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAICompatible")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("default_model", &self.default_model)
            .field("deployments", &self.deployments)
            .finish()
    }
}

impl OpenAICompatible {
    pub fn new(api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("reqwest client build should not fail");

        let api_key = api_key.into();
        let auth = if api_key.trim().is_empty() {
            None
        } else {
            HttpAuth::bearer(api_key.trim()).ok()
        };

        Self {
            http,
            base_url: "https://api.openai.com/v1".to_string(),
            auth,
            default_model: String::new(),
            deployments: false,
            http_headers: BTreeMap::new(),
            http_query_params: BTreeMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Route requests to `{base_url}/deployments/{model}/chat/completions`.
    pub fn with_deployments(mut self, deployments: bool) -> Self {
        self.deployments = deployments;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_query_params.insert(name.into(), value.into());
        self
    }

    pub fn from_config(config: &ProviderConfig, env: &Env) -> Result<Self, ConfigError> {
        let mut out = Self::new(String::new());
        if let Some(auth) = config.auth.as_ref() {
            let token = resolve_auth_token(auth, env)?;
            out.auth = Some(HttpAuth::for_provider(auth, &token)?);
        }
        if let Some(base_url) = config.base_url.as_deref().filter(|s| !s.trim().is_empty()) {
            out = out.with_base_url(base_url.trim());
        }
        if let Some(model) = config
            .default_model
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            out = out.with_model(model.trim());
        }
        out.deployments = config.deployments;
        out.http_headers = config.http_headers.clone();
        out.http_query_params = config.http_query_params.clone();
        Ok(out)
    }

    fn chat_completions_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if self.deployments {
            format!("{base}/deployments/{model}/chat/completions")
        } else {
            format!("{base}/chat/completions")
        }
    }

    fn resolve_model<'a>(&'a self, request: &'a GenerateRequest) -> Result<&'a str, InvocationError> {
        if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            return Ok(model);
        }
        if !self.default_model.trim().is_empty() {
            return Ok(self.default_model.as_str());
        }
        Err(InvocationError::ModelNotConfigured {
            provider: self.provider().to_string(),
        })
    }

    fn tool_to_openai(tool: &Tool) -> Value {
        let mut function = Map::<String, Value>::new();
        function.insert("name".to_string(), Value::String(tool.name.clone()));
        if let Some(description) = &tool.description {
            function.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        function.insert("parameters".to_string(), tool.parameters.clone());

        let mut out = Map::<String, Value>::new();
        out.insert("type".to_string(), Value::String("function".to_string()));
        out.insert("function".to_string(), Value::Object(function));
        Value::Object(out)
    }

    fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
        let ToolChoice::Tool { name } = choice;
        serde_json::json!({
            "type": "function",
            "function": { "name": name }
        })
    }

    fn messages_to_chat_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                serde_json::json!({
                    "role": message.role,
                    "content": message.content,
                })
            })
            .collect()
    }

    fn parse_usage(value: &Value) -> Usage {
        let mut usage = Usage::default();
        if let Some(obj) = value.as_object() {
            usage.input_tokens = obj.get("prompt_tokens").and_then(Value::as_u64);
            usage.output_tokens = obj.get("completion_tokens").and_then(Value::as_u64);
            usage.total_tokens = obj.get("total_tokens").and_then(Value::as_u64);
        }
        usage.merge_total();
        usage
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatChoice {
    #[serde(default)]
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatToolCall {
    #[serde(default)]
    id: String,
    #[serde(default)]
    function: ChatToolFunction,
}

#[derive(Debug, Deserialize, Default)]
struct ChatToolFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[async_trait]
impl LanguageModel for OpenAICompatible {
    fn provider(&self) -> &str {
        "openai-compatible"
    }

    fn model_id(&self) -> &str {
        self.default_model.as_str()
    }

    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateResponse, InvocationError> {
        let model = self.resolve_model(&request)?;

        let mut body = Map::<String, Value>::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert(
            "messages".to_string(),
            Value::Array(Self::messages_to_chat_messages(&request.messages)),
        );
        if let Some(temperature) = request.temperature {
            body.insert(
                "temperature".to_string(),
                Value::Number(
                    serde_json::Number::from_f64(f64::from(temperature))
                        .unwrap_or_else(|| 0.into()),
                ),
            );
        }
        if let Some(tools) = request.tools.as_ref() {
            body.insert(
                "tools".to_string(),
                Value::Array(tools.iter().map(Self::tool_to_openai).collect()),
            );
        }
        if let Some(tool_choice) = request.tool_choice.as_ref() {
            body.insert(
                "tool_choice".to_string(),
                Self::tool_choice_to_openai(tool_choice),
            );
        }

        let url = self.chat_completions_url(model);
        let mut req = self.http.post(url);
        if let Some(auth) = self.auth.as_ref() {
            req = auth.apply(req);
        }
        for (name, value) in &self.http_headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if !self.http_query_params.is_empty() {
            req = req.query(&self.http_query_params);
        }
        let response = req.json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InvocationError::Upstream { status, body: text });
        }

        let bytes = response.bytes().await?;
        let parsed = serde_json::from_slice::<ChatCompletionsResponse>(&bytes).map_err(|err| {
            InvocationError::MalformedUpstreamResponse(format!(
                "invalid chat/completions json: {err}"
            ))
        })?;
        let choice = parsed.choices.first().ok_or_else(|| {
            InvocationError::MalformedUpstreamResponse(
                "chat/completions response has no choices".to_string(),
            )
        })?;

        let mut content = Vec::<ContentPart>::new();
        if let Some(text) = choice.message.content.as_deref().filter(|t| !t.is_empty()) {
            content.push(ContentPart::Text {
                text: text.to_string(),
            });
        }
        if let Some(tool_calls) = choice.message.tool_calls.as_ref() {
            for tool_call in tool_calls {
                content.push(ContentPart::ToolCall {
                    id: tool_call.id.clone(),
                    name: tool_call.function.name.clone(),
                    arguments: parse_tool_call_arguments(&tool_call.function.arguments)
                        .map_err(|err| {
                            InvocationError::MalformedUpstreamResponse(format!(
                                "tool call arguments are not valid json: {err}"
                            ))
                        })?,
                });
            }
        }

        let usage = parsed
            .usage
            .as_ref()
            .map(Self::parse_usage)
            .unwrap_or_default();

        Ok(GenerateResponse {
            content,
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
            usage,
        })
    }
}
