use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderAuth {
    /// `Authorization: Bearer <token>`.
    #[serde(rename = "api_key_env", alias = "env", alias = "api_key")]
    ApiKeyEnv {
        #[serde(default)]
        keys: Vec<String>,
    },
    /// Token sent in a custom header, e.g. Azure's `api-key`.
    #[serde(alias = "header_env")]
    HttpHeaderEnv {
        header: String,
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

impl std::fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderAuth::ApiKeyEnv { keys } => {
                f.debug_struct("ApiKeyEnv").field("keys", keys).finish()
            }
            ProviderAuth::HttpHeaderEnv {
                header,
                keys,
                prefix,
            } => f
                .debug_struct("HttpHeaderEnv")
                .field("header", header)
                .field("keys", keys)
                .field("prefix", prefix)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Route each model to `deployments/{model}/chat/completions` under `base_url`.
    #[serde(default)]
    pub deployments: bool,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub http_query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: Option<ProviderAuth>,
}
