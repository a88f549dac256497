//! Project management and the metered invocation pipeline.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::codec;
use crate::config::{ConfigError, DEFAULT_CREDITS, DEFAULT_MODEL, EngineConfig};
use crate::entities::{
    Endpoint, Invocation, Principal, Project, SUPPORTED_IDENTITY_PROVIDER, User,
};
use crate::error::{Error, Result};
use crate::metering::{self, CostRateTable, LatencyTimer};
use crate::model::LanguageModel;
use crate::protocol::{InvocationError, ToolCallClient};
use crate::schema::{ProjectForm, Record};
use crate::store::Store;
use crate::usage::{self, UsageSeries, usage_series};

#[derive(Clone, Debug, Serialize)]
pub struct Dashboard {
    pub user: User,
    pub projects: Vec<Project>,
    pub series: UsageSeries,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    /// Newest first.
    pub invocations: Vec<Invocation>,
}

#[derive(Clone, Debug)]
pub struct Engine {
    store: Store,
    client: ToolCallClient,
    rates: CostRateTable,
    default_credits: u64,
    default_model: String,
}

impl Engine {
    pub fn new(store: Store, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            store,
            client: ToolCallClient::new(model),
            rates: CostRateTable::builtin(),
            default_credits: DEFAULT_CREDITS,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        store: Store,
        model: Arc<dyn LanguageModel>,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(store, model)
            .with_cost_rates(config.cost_rate_table()?)
            .with_default_credits(config.default_credits)
            .with_default_model(config.default_model.clone()))
    }

    pub fn with_cost_rates(mut self, rates: CostRateTable) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_default_credits(mut self, credits: u64) -> Self {
        self.default_credits = credits;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn load_user(&self, user_id: &str) -> Result<User> {
        self.store
            .try_get::<User>(user_id, None)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    async fn load_project(&self, user_id: &str, project_id: &str) -> Result<Project> {
        self.store
            .try_get::<Project>(project_id, Some(user_id))
            .await?
            .ok_or_else(|| Error::not_found("project", project_id))
    }

    /// First login creates the user with the default credit balance.
    pub async fn get_or_create_user(&self, principal: &Principal) -> Result<User> {
        if !principal
            .provider
            .eq_ignore_ascii_case(SUPPORTED_IDENTITY_PROVIDER)
        {
            return Err(Error::UnsupportedIdentityProvider {
                provider: principal.provider.clone(),
            });
        }
        if let Some(user) = self.store.try_get::<User>(&principal.id, None).await? {
            return Ok(user);
        }
        let user = User::from_principal(principal, self.default_credits);
        self.store.save(&user).await?;
        tracing::info!(user_id = %user.id, login = %user.login, "created user");
        Ok(user)
    }

    pub async fn create_project(&self, user_id: &str, form: &ProjectForm) -> Result<Project> {
        self.load_user(user_id).await?;
        form.compile_contracts()?;

        let mut project = Project::new(user_id, form.name.trim(), form.instructions.trim());
        project.request = form.request.fields.clone();
        project.response = form.response.fields.clone();
        project.model = form
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        project.collect_payload = form.collect_payload.unwrap_or(false);

        self.store.save(&project).await?;
        self.store.save(&project.endpoint_mapping()).await?;
        tracing::info!(
            project_id = %project.id,
            endpoint = %project.endpoint,
            user_id,
            "created project"
        );
        Ok(project)
    }

    /// Replaces name, instructions and both contracts; nothing changes unless
    /// both contracts compile.
    pub async fn update_contract(
        &self,
        user_id: &str,
        project_id: &str,
        form: &ProjectForm,
    ) -> Result<Project> {
        let mut project = self.load_project(user_id, project_id).await?;
        form.compile_contracts()?;

        project.name = form.name.trim().to_string();
        project.instructions = form.instructions.trim().to_string();
        project.request = form.request.fields.clone();
        project.response = form.response.fields.clone();
        if let Some(model) = form.model.as_ref() {
            project.model = model.clone();
        }
        if let Some(collect_payload) = form.collect_payload {
            project.collect_payload = collect_payload;
        }
        self.store.save(&project).await?;
        Ok(project)
    }

    /// Removes the project, its endpoint and every invocation recorded for it.
    pub async fn delete_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        let project = self.load_project(user_id, project_id).await?;
        let invocations = self
            .store
            .find::<Invocation, _>(Some(user_id), |inv| inv.project_id == project.id)
            .await?;
        for invocation in &invocations {
            self.store.delete(invocation).await?;
        }
        self.store.delete(&project.endpoint_mapping()).await?;
        self.store.delete(&project).await?;
        tracing::info!(
            project_id,
            invocations = invocations.len(),
            "deleted project"
        );
        Ok(())
    }

    pub async fn dashboard(&self, user_id: &str) -> Result<Dashboard> {
        let mut user = self.load_user(user_id).await?;
        let invocations = self
            .store
            .find::<Invocation, _>(Some(user_id), |_| true)
            .await?;
        usage::refresh(&self.store, &mut user, &invocations).await?;

        let mut projects = self
            .store
            .find::<Project, _>(Some(user_id), |_| true)
            .await?;
        for project in &mut projects {
            let own = invocations
                .iter()
                .filter(|inv| inv.project_id == project.id)
                .cloned()
                .collect::<Vec<_>>();
            usage::refresh(&self.store, project, &own).await?;
        }
        projects.sort_by(|a, b| a.created_ms.cmp(&b.created_ms).then(a.id.cmp(&b.id)));

        Ok(Dashboard {
            user,
            projects,
            series: usage_series(&invocations),
        })
    }

    pub async fn project_detail(&self, user_id: &str, project_id: &str) -> Result<ProjectDetail> {
        let mut project = self.load_project(user_id, project_id).await?;
        let mut invocations = self
            .store
            .find::<Invocation, _>(Some(user_id), |inv| inv.project_id == project_id)
            .await?;
        usage::refresh(&self.store, &mut project, &invocations).await?;
        invocations.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        Ok(ProjectDetail {
            project,
            invocations,
        })
    }

    pub async fn invoke(&self, endpoint: &str, content_type: &str, body: &[u8]) -> Result<Record> {
        self.invoke_with_cancellation(endpoint, content_type, body, &CancellationToken::new())
            .await
    }

    /// Runs one metered call against the project behind `endpoint`.
    ///
    /// Errors before the model is contacted leave no trace. Errors after it
    /// record a failed, uncharged invocation. Cancelling `cancel` while the
    /// model call is in flight counts as such a failure.
    pub async fn invoke_with_cancellation(
        &self,
        endpoint: &str,
        content_type: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Record> {
        let span = tracing::info_span!(
            "llm_contract.invoke",
            endpoint = %endpoint,
            project_id = tracing::field::Empty,
            model = tracing::field::Empty,
            status = tracing::field::Empty,
            credits = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            finish_reason = tracing::field::Empty,
            total_tokens = tracing::field::Empty,
        );
        let result = self
            .run_invocation(endpoint, content_type, body, cancel)
            .instrument(span.clone())
            .await;
        match &result {
            Ok(_) => {
                span.record("status", 200u16);
            }
            Err(err) => {
                span.record("status", err.status_code().as_u16());
                tracing::debug!(parent: &span, error = %err, "invocation rejected");
            }
        }
        result
    }

    async fn run_invocation(
        &self,
        endpoint_id: &str,
        content_type: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Record> {
        let span = tracing::Span::current();

        let endpoint = self
            .store
            .try_get::<Endpoint>(endpoint_id, None)
            .await?
            .ok_or_else(|| Error::not_found("endpoint", endpoint_id))?;
        let user = self.load_user(&endpoint.user).await?;
        if user.is_out_of_credits() {
            return Err(Error::OutOfCredits { user_id: user.id });
        }
        let project = self
            .load_project(&endpoint.user, &endpoint.project)
            .await?;
        if !project.active {
            return Err(Error::not_found("project", &project.id));
        }
        span.record("project_id", project.id.as_str());
        span.record("model", project.model.as_str());

        let request_contract = project.request_contract()?;
        let response_contract = project.response_contract()?;
        let raw = codec::decode(content_type, body)?;
        let request = request_contract.validate(&raw)?;
        self.rates.rate(&project.model)?;

        let timer = LatencyTimer::start();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InvocationError::Cancelled),
            result = self.client.invoke(
                &project.instructions,
                &request,
                &response_contract,
                &project.model,
            ) => result,
        };
        let latency = timer.elapsed_seconds();
        span.record("latency_ms", (latency * 1000.0).round() as u64);

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "model call failed");
                let failed = Invocation::failed(&project, latency, &request, err.to_string());
                if let Err(store_err) = self.store.save(&failed).await {
                    tracing::error!(
                        invocation_id = %failed.id,
                        error = %store_err,
                        "failed to record failed invocation"
                    );
                }
                return Err(err.into());
            }
        };

        let credits = metering::meter(&self.rates, &project, &request, &response)?;
        span.record("credits", credits);

        let invocation = Invocation::succeeded(&project, credits, latency, &request, &response);
        self.store.save(&invocation).await?;

        // Debit against a fresh read; concurrent calls may overshoot the balance.
        let mut user = self.load_user(&endpoint.user).await?;
        user.usage.credits_used = user.usage.credits_used.saturating_add(credits);
        self.store.save(&user).await?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ContractForm;
    use crate::types::{ContentPart, GenerateRequest, GenerateResponse};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        arguments: Mutex<Value>,
        calls: AtomicUsize,
        stall: bool,
    }

    impl ScriptedModel {
        fn replying(arguments: Value) -> Arc<Self> {
            Arc::new(Self {
                arguments: Mutex::new(arguments),
                calls: AtomicUsize::new(0),
                stall: false,
            })
        }

        fn stalled() -> Arc<Self> {
            Arc::new(Self {
                arguments: Mutex::new(Value::Null),
                calls: AtomicUsize::new(0),
                stall: true,
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: GenerateRequest,
        ) -> std::result::Result<GenerateResponse, InvocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                std::future::pending::<()>().await;
            }
            let arguments = self.arguments.lock().expect("lock").clone();
            Ok(GenerateResponse {
                content: vec![ContentPart::ToolCall {
                    id: "call_1".to_string(),
                    name: "structured_response".to_string(),
                    arguments,
                }],
                ..GenerateResponse::default()
            })
        }
    }

    fn spelling_form() -> ProjectForm {
        ProjectForm {
            name: "Spelling".to_string(),
            instructions: "fix spelling".to_string(),
            request: ContractForm::from_pairs(&["input"], &["Text"]).expect("request"),
            response: ContractForm::from_pairs(&["output", "was_corrected"], &["Text", "Boolean"])
                .expect("response"),
            model: None,
            collect_payload: Some(true),
        }
    }

    async fn setup(model: Arc<ScriptedModel>) -> (Engine, Project) {
        let engine = Engine::new(Store::memory(), model);
        engine
            .store()
            .save(&User::new("u1", "octocat"))
            .await
            .expect("user");
        let project = engine
            .create_project("u1", &spelling_form())
            .await
            .expect("project");
        (engine, project)
    }

    async fn invocations(engine: &Engine) -> Vec<Invocation> {
        engine
            .store()
            .find::<Invocation, _>(None, |_| true)
            .await
            .expect("find")
    }

    #[tokio::test]
    async fn successful_call_is_metered_and_debited() {
        let model = ScriptedModel::replying(json!({"output": "Hello world", "was_corrected": true}));
        let (engine, project) = setup(model.clone()).await;

        let record = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "Helo wrld"}"#)
            .await
            .expect("invoke");
        assert_eq!(
            record.to_canonical_json(),
            r#"{"output":"Hello world","was_corrected":true}"#
        );

        let recorded = invocations(&engine).await;
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].success);
        assert!(recorded[0].credits_used > 0);
        assert_eq!(recorded[0].request, Some(json!({"input": "Helo wrld"})));

        let user: User = engine.store().get("u1", None).await.expect("user");
        assert_eq!(user.usage.credits_used, recorded[0].credits_used);
    }

    #[tokio::test]
    async fn unknown_field_is_rejected_before_the_model() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, project) = setup(model.clone()).await;

        let err = engine
            .invoke(
                &project.endpoint,
                "application/json",
                br#"{"input": "x", "extra": 1}"#,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 422);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(invocations(&engine).await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_balance_returns_402() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, project) = setup(model.clone()).await;
        let mut user: User = engine.store().get("u1", None).await.expect("user");
        user.usage.credits_used = user.credits_avail;
        engine.store().save(&user).await.expect("save");

        let err = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "x"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutOfCredits { .. }));
        assert_eq!(err.status_code().as_u16(), 402);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(invocations(&engine).await.is_empty());
    }

    #[tokio::test]
    async fn contract_violation_records_uncharged_failure() {
        let model = ScriptedModel::replying(json!({"output": "Hello world"}));
        let (engine, project) = setup(model).await;

        let err = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "Helo wrld"}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Invocation(InvocationError::OutputContractViolation(_))
        ));

        let recorded = invocations(&engine).await;
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].success);
        assert_eq!(recorded[0].credits_used, 0);
        let user: User = engine.store().get("u1", None).await.expect("user");
        assert_eq!(user.usage.credits_used, 0);
    }

    #[tokio::test]
    async fn string_arguments_are_a_contract_violation() {
        let model = ScriptedModel::replying(json!("Hello world"));
        let (engine, project) = setup(model).await;

        let err = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "Helo wrld"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "output_contract_violation");
        assert_eq!(err.status_code().as_u16(), 502);

        let recorded = invocations(&engine).await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].credits_used, 0);
    }

    #[tokio::test]
    async fn unknown_cost_rate_fails_before_the_model() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, mut project) = setup(model.clone()).await;
        project.model = "gpt-unpriced".to_string();
        engine.store().save(&project).await.expect("save");

        let err = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_model_cost_rate");
        assert_eq!(err.status_code().as_u16(), 500);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_endpoint_and_inactive_project_are_404() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, mut project) = setup(model).await;

        let err = engine
            .invoke("nope", "application/json", b"{}")
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);

        project.active = false;
        engine.store().save(&project).await.expect("save");
        let err = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_422() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, project) = setup(model).await;
        let err = engine
            .invoke(&project.endpoint, "text/plain", b"input=x")
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 422);
        assert_eq!(err.to_string(), "Invalid Content-Type: text/plain");
    }

    #[tokio::test]
    async fn cancellation_records_failure_without_debit() {
        let model = ScriptedModel::stalled();
        let (engine, project) = setup(model).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = engine
            .invoke_with_cancellation(
                &project.endpoint,
                "application/x-www-form-urlencoded",
                b"input=Helo+wrld",
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 499);

        let recorded = invocations(&engine).await;
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].success);
        assert_eq!(recorded[0].credits_used, 0);
    }

    #[tokio::test]
    async fn user_creation_requires_github() {
        let engine = Engine::new(Store::memory(), ScriptedModel::replying(json!({})));
        let mut principal = Principal {
            id: "42".to_string(),
            login: "octocat".to_string(),
            provider: "github".to_string(),
            roles: vec!["authenticated".to_string()],
            email: None,
            username: None,
        };
        let user = engine.get_or_create_user(&principal).await.expect("user");
        assert_eq!(user.credits_avail, 1000);
        let again = engine.get_or_create_user(&principal).await.expect("user");
        assert_eq!(again, user);

        principal.provider = "aad".to_string();
        let err = engine.get_or_create_user(&principal).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 403);
    }

    #[tokio::test]
    async fn update_contract_is_all_or_nothing() {
        let model = ScriptedModel::replying(json!({}));
        let (engine, project) = setup(model).await;

        let mut bad = spelling_form();
        bad.instructions = "changed".to_string();
        bad.response = ContractForm::from_pairs(&["when"], &["Date"]).expect("form");
        assert!(matches!(
            engine.update_contract("u1", &project.id, &bad).await,
            Err(Error::Compilation(_))
        ));
        let unchanged: Project = engine
            .store()
            .get(&project.id, Some("u1"))
            .await
            .expect("project");
        assert_eq!(unchanged.instructions, "fix spelling");

        let mut good = spelling_form();
        good.request = ContractForm::from_pairs(&["input", "lang"], &["Text", "str"])
            .expect("form");
        let updated = engine
            .update_contract("u1", &project.id, &good)
            .await
            .expect("update");
        assert_eq!(updated.request.len(), 2);
        assert_eq!(updated.endpoint, project.endpoint);
    }

    #[tokio::test]
    async fn delete_project_cascades() {
        let model = ScriptedModel::replying(json!({"output": "ok", "was_corrected": false}));
        let (engine, project) = setup(model).await;
        let other = engine
            .create_project("u1", &spelling_form())
            .await
            .expect("project");
        for target in [&project, &other] {
            engine
                .invoke(&target.endpoint, "application/json", br#"{"input": "x"}"#)
                .await
                .expect("invoke");
        }

        engine
            .delete_project("u1", &project.id)
            .await
            .expect("delete");
        let remaining = invocations(&engine).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].project_id, other.id);
        assert!(
            engine
                .store()
                .try_get::<Endpoint>(&project.endpoint, None)
                .await
                .expect("get")
                .is_none()
        );
        assert!(matches!(
            engine.project_detail("u1", &project.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn dashboard_refreshes_rollups() {
        let model = ScriptedModel::replying(json!({"output": "ok", "was_corrected": false}));
        let (engine, project) = setup(model.clone()).await;
        for _ in 0..2 {
            engine
                .invoke(&project.endpoint, "application/json", br#"{"input": "x"}"#)
                .await
                .expect("invoke");
        }
        *model.arguments.lock().expect("lock") = json!({});
        let _ = engine
            .invoke(&project.endpoint, "application/json", br#"{"input": "x"}"#)
            .await;

        let dashboard = engine.dashboard("u1").await.expect("dashboard");
        assert_eq!(dashboard.user.usage.invocations, 3);
        assert!((dashboard.user.usage.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(dashboard.projects.len(), 1);
        assert_eq!(dashboard.projects[0].usage.invocations, 3);
        assert_eq!(dashboard.series.labels.len(), 1);
        assert_eq!(dashboard.series.series[0].counts, vec![3]);

        let detail = engine
            .project_detail("u1", &project.id)
            .await
            .expect("detail");
        assert_eq!(detail.invocations.len(), 3);
        assert!(detail.invocations[0].timestamp_ms >= detail.invocations[2].timestamp_ms);
    }
}
