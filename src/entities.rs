//! Persisted documents: users, projects, endpoint mappings and invocations.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DEFAULT_CREDITS, DEFAULT_MODEL};
use crate::keys::generate_id;
use crate::schema::{CompilationError, Contract, FieldDef, Record, compile};
use crate::usage::UsageStats;

/// A JSON document stored in one collection under `(id, partition_key)`.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn partition_key(&self) -> &str {
        self.id()
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// The identity handed over by the login layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub login: String,
    pub provider: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

pub const SUPPORTED_IDENTITY_PROVIDER: &str = "github";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub login: String,
    pub provider: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub credits_avail: u64,
    #[serde(flatten)]
    pub usage: UsageStats,
}

impl User {
    pub fn new(id: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
            provider: SUPPORTED_IDENTITY_PROVIDER.to_string(),
            roles: Vec::new(),
            email: None,
            username: None,
            credits_avail: DEFAULT_CREDITS,
            usage: UsageStats::default(),
        }
    }

    pub fn from_principal(principal: &Principal, credits_avail: u64) -> Self {
        Self {
            id: principal.id.clone(),
            login: principal.login.clone(),
            provider: principal.provider.clone(),
            roles: principal.roles.clone(),
            email: principal.email.clone(),
            username: principal.username.clone(),
            credits_avail,
            usage: UsageStats::default(),
        }
    }

    pub fn credits_used(&self) -> u64 {
        self.usage.credits_used
    }

    pub fn credits_remaining(&self) -> u64 {
        self.credits_avail.saturating_sub(self.usage.credits_used)
    }

    pub fn is_out_of_credits(&self) -> bool {
        self.usage.credits_used >= self.credits_avail
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    /// Owning user id; also the partition key.
    pub user: String,
    pub name: String,
    pub instructions: String,
    pub request: Vec<FieldDef>,
    pub response: Vec<FieldDef>,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub collect_payload: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub created_ms: u64,
    #[serde(flatten)]
    pub usage: UsageStats,
}

fn default_active() -> bool {
    true
}

impl Project {
    pub fn new(
        user: impl Into<String>,
        name: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            user: user.into(),
            name: name.into(),
            instructions: instructions.into(),
            request: Vec::new(),
            response: Vec::new(),
            endpoint: generate_id(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            collect_payload: false,
            active: true,
            created_ms: now_millis(),
            usage: UsageStats::default(),
        }
    }

    pub fn request_contract(&self) -> Result<Contract, CompilationError> {
        compile(&self.request)
    }

    pub fn response_contract(&self) -> Result<Contract, CompilationError> {
        compile(&self.response)
    }

    pub fn endpoint_mapping(&self) -> Endpoint {
        Endpoint {
            id: self.endpoint.clone(),
            project: self.id.clone(),
            user: self.user.clone(),
        }
    }
}

impl Document for Project {
    const COLLECTION: &'static str = "projects";

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.user
    }
}

/// Public endpoint key resolving to its project and owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub project: String,
    pub user: String,
}

impl Document for Endpoint {
    const COLLECTION: &'static str = "endpoints";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One call attempt. Written once, removed only with its project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub credits_used: u64,
    pub latency_seconds: f64,
    pub success: bool,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

fn payload(project: &Project, record: Option<&Record>) -> Option<Value> {
    if !project.collect_payload {
        return None;
    }
    record.map(|record| Value::Object(record.to_json_map()))
}

impl Invocation {
    pub fn succeeded(
        project: &Project,
        credits_used: u64,
        latency_seconds: f64,
        request: &Record,
        response: &Record,
    ) -> Self {
        Self {
            id: generate_id(),
            project_id: project.id.clone(),
            user_id: project.user.clone(),
            credits_used,
            latency_seconds,
            success: true,
            model: project.model.clone(),
            request: payload(project, Some(request)),
            response: payload(project, Some(response)),
            error: None,
            timestamp_ms: now_millis(),
        }
    }

    /// A failed attempt is never charged.
    pub fn failed(
        project: &Project,
        latency_seconds: f64,
        request: &Record,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            project_id: project.id.clone(),
            user_id: project.user.clone(),
            credits_used: 0,
            latency_seconds,
            success: false,
            model: project.model.clone(),
            request: payload(project, Some(request)),
            response: None,
            error: Some(error.into()),
            timestamp_ms: now_millis(),
        }
    }
}

impl Document for Invocation {
    const COLLECTION: &'static str = "invocations";

    fn id(&self) -> &str {
        &self.id
    }

    fn partition_key(&self) -> &str {
        &self.user_id
    }
}
