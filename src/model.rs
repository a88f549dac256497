use async_trait::async_trait;

use crate::protocol::InvocationError;
use crate::types::{GenerateRequest, GenerateResponse};

/// A chat completion backend able to honor forced tool calls.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn provider(&self) -> &str;
    fn model_id(&self) -> &str;

    async fn generate(&self, request: GenerateRequest)
    -> Result<GenerateResponse, InvocationError>;
}
