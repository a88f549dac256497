//! Typed LLM endpoints with metered credits.
//!
//! An operator declares request and response contracts for a project. Each
//! call to the project's public endpoint is decoded, validated, answered by a
//! chat model through a forced tool call, validated again and billed.

pub mod codec;
pub mod config;
pub mod engine;
pub mod entities;
mod error;
#[cfg(feature = "server")]
pub mod http;
pub mod keys;
pub mod metering;
pub mod model;
pub mod profile;
pub mod protocol;
pub mod providers;
pub mod schema;
pub mod store;
#[cfg(feature = "server")]
pub mod telemetry;
pub mod types;
pub mod usage;
pub mod utils;

pub use codec::{CodecError, PayloadKind, decode};
pub use config::{ConfigError, EngineConfig, StoreConfig};
pub use engine::{Dashboard, Engine, ProjectDetail};
pub use entities::{Document, Endpoint, Invocation, Principal, Project, User};
pub use error::{Error, Result};
pub use metering::{CostRateTable, MeteringError, meter};
pub use model::LanguageModel;
pub use profile::{Env, ProviderAuth, ProviderConfig};
pub use protocol::{InvocationError, STRUCTURED_RESPONSE_TOOL, ToolCallClient};
pub use providers::OpenAICompatible;
pub use schema::{
    CompilationError, Contract, FieldDef, FieldType, FieldValue, Record, TypeTag,
    ValidationError, compile,
};
pub use store::{DocumentStore, MemoryStore, Store, StoreError};
pub use usage::{UsageSeries, UsageStats, usage_series};
