//! Upstream provider profile: where to send chat requests and how to authenticate.

mod auth;
mod config;
mod env;

pub(crate) use auth::HttpAuth;
pub use auth::{resolve_auth_token, resolve_auth_token_with_default_keys};
pub use config::{ProviderAuth, ProviderConfig};
pub use env::{Env, parse_dotenv};
