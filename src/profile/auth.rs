use reqwest::header::{HeaderName, HeaderValue};

use crate::config::ConfigError;

use super::config::ProviderAuth;
use super::env::Env;

const DEFAULT_KEYS: &[&str] = &["OPENAI_API_KEY", "AZURE_OPENAI_API_KEY"];

#[derive(Clone)]
pub(crate) struct HttpAuth {
    pub(crate) header: HeaderName,
    pub(crate) value: HeaderValue,
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl HttpAuth {
    pub(crate) fn bearer(token: &str) -> Result<Self, ConfigError> {
        Self::header_value("authorization", Some("Bearer "), token)
    }

    pub(crate) fn header_value(
        header: &str,
        prefix: Option<&str>,
        token: &str,
    ) -> Result<Self, ConfigError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(ConfigError::InvalidAuth(
                "auth header name must be non-empty".to_string(),
            ));
        }

        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|err| {
            ConfigError::InvalidAuth(format!("invalid auth header name {header:?}: {err}"))
        })?;

        let mut out = String::new();
        if let Some(prefix) = prefix {
            out.push_str(prefix);
        }
        out.push_str(token);
        let mut value = HeaderValue::from_str(&out).map_err(|err| {
            ConfigError::InvalidAuth(format!("invalid auth header value for {header:?}: {err}"))
        })?;
        value.set_sensitive(true);

        Ok(Self { header, value })
    }

    /// Builds the request header for `auth` around an already resolved token.
    pub(crate) fn for_provider(auth: &ProviderAuth, token: &str) -> Result<Self, ConfigError> {
        match auth {
            ProviderAuth::ApiKeyEnv { .. } => Self::bearer(token),
            ProviderAuth::HttpHeaderEnv { header, prefix, .. } => {
                Self::header_value(header, prefix.as_deref(), token)
            }
        }
    }

    pub(crate) fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(self.header.clone(), self.value.clone())
    }
}

pub fn resolve_auth_token(auth: &ProviderAuth, env: &Env) -> Result<String, ConfigError> {
    resolve_auth_token_with_default_keys(auth, env, DEFAULT_KEYS)
}

/// Looks up the first configured key that is set; `default_keys` apply when
/// the auth entry names none.
pub fn resolve_auth_token_with_default_keys(
    auth: &ProviderAuth,
    env: &Env,
    default_keys: &[&str],
) -> Result<String, ConfigError> {
    let keys = match auth {
        ProviderAuth::ApiKeyEnv { keys } | ProviderAuth::HttpHeaderEnv { keys, .. } => keys,
    };

    let found = if keys.is_empty() {
        default_keys.iter().find_map(|key| env.get(key))
    } else {
        keys.iter().find_map(|key| env.get(key.as_str()))
    };

    found.map(|value| value.trim().to_string()).ok_or_else(|| {
        let tried = if keys.is_empty() {
            default_keys.join(", ")
        } else {
            keys.join(", ")
        };
        ConfigError::MissingApiKey(tried)
    })
}
