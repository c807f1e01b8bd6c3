//! Engine facade: top-level API for akh-reflect.
//!
//! The `Engine` owns the collaborators (model store, fact source, reasoner,
//! entity classifier), the clock and the operation tracker, and exposes the
//! mental-model operations: CRUD, refresh, generate, reflect and research.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{
    AgentContext, AgentDeps, AgentError, Budget, LoopLimits, OutputMode, ReflectLoop,
    ReflectResponse, ResearchResponse, Toolset, learn_placeholder,
};
use crate::bank::BankProfile;
use crate::clock::MonotonicClock;
use crate::config::ReflectConfig;
use crate::error::{RefreshError, ReflectResult, StoreError};
use crate::facts::FactSource;
use crate::llm::{EntityClassifier, Reasoner};
use crate::model::{MentalModel, ModelFilter, TagsMatch, validate_tags};
use crate::refresh::{
    GenerateReport, OperationKind, OperationReport, OperationStatus, OperationTracker,
    RefreshReport, Refresher,
};
use crate::store::ModelStore;
use crate::store::durable::DurableStore;
use crate::store::mem::MemStore;

/// A reflect request.
#[derive(Debug, Clone, Default)]
pub struct ReflectRequest {
    pub query: String,
    pub budget: Budget,
    /// Recall token budget; defaults to the budget level's.
    pub max_tokens: Option<usize>,
    pub tags: Vec<String>,
    pub tags_match: TagsMatch,
    /// Include `tool_calls` and `llm_calls` in the response.
    pub include_trace: bool,
    /// Answer as one text, or as titled observations.
    pub output_mode: OutputMode,
}

impl ReflectRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Owned handles a background operation needs.
struct Shared {
    config: Arc<ReflectConfig>,
    store: Arc<dyn ModelStore>,
    facts: Arc<dyn FactSource>,
    reasoner: Arc<dyn Reasoner>,
    classifier: Arc<dyn EntityClassifier>,
    clock: Arc<MonotonicClock>,
}

impl Shared {
    fn refresher(&self) -> Refresher<'_> {
        Refresher {
            store: self.store.as_ref(),
            facts: self.facts.as_ref(),
            reasoner: self.reasoner.as_ref(),
            classifier: self.classifier.as_ref(),
            clock: &self.clock,
            config: &self.config,
        }
    }
}

/// The akh-reflect engine.
pub struct Engine {
    config: Arc<ReflectConfig>,
    store: Arc<dyn ModelStore>,
    facts: Arc<dyn FactSource>,
    reasoner: Arc<dyn Reasoner>,
    classifier: Arc<dyn EntityClassifier>,
    clock: Arc<MonotonicClock>,
    operations: Arc<OperationTracker>,
}

impl Engine {
    /// Create an engine over the given collaborators.
    pub fn new(
        config: ReflectConfig,
        store: Arc<dyn ModelStore>,
        facts: Arc<dyn FactSource>,
        reasoner: Arc<dyn Reasoner>,
        classifier: Arc<dyn EntityClassifier>,
    ) -> ReflectResult<Self> {
        config.validate()?;
        tracing::info!(
            llm = %config.llm.base_url,
            model = %config.llm.model,
            parallelism = config.refresh.parallelism,
            "initializing akh-reflect engine"
        );
        let operations = Arc::new(OperationTracker::with_retention(
            config.refresh.operation_retention,
        ));
        Ok(Self {
            config: Arc::new(config),
            store,
            facts,
            reasoner,
            classifier,
            clock: Arc::new(MonotonicClock::new()),
            operations,
        })
    }

    /// Create an engine whose store lives in `data_dir` (redb), or in memory
    /// when `data_dir` is `None`.
    pub fn open(
        config: ReflectConfig,
        data_dir: Option<&Path>,
        facts: Arc<dyn FactSource>,
        reasoner: Arc<dyn Reasoner>,
        classifier: Arc<dyn EntityClassifier>,
    ) -> ReflectResult<Self> {
        let store: Arc<dyn ModelStore> = match data_dir {
            Some(dir) => Arc::new(DurableStore::open(dir)?),
            None => Arc::new(MemStore::new()),
        };
        Self::new(config, store, facts, reasoner, classifier)
    }

    pub fn config(&self) -> &ReflectConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ModelStore {
        self.store.as_ref()
    }

    fn shared(&self) -> Shared {
        Shared {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            facts: Arc::clone(&self.facts),
            reasoner: Arc::clone(&self.reasoner),
            classifier: Arc::clone(&self.classifier),
            clock: Arc::clone(&self.clock),
        }
    }

    fn deps(&self) -> AgentDeps {
        AgentDeps {
            store: Arc::clone(&self.store),
            facts: Arc::clone(&self.facts),
            clock: Arc::clone(&self.clock),
        }
    }

    // -----------------------------------------------------------------------
    // Model CRUD
    // -----------------------------------------------------------------------

    /// Create a user-pinned model. Fails with a conflict if the id exists.
    pub fn create_pinned(
        &self,
        bank_id: &str,
        name: &str,
        description: &str,
        tags: &[String],
    ) -> ReflectResult<MentalModel> {
        let tags = validate_tags(tags)?;
        let model = MentalModel::pinned(bank_id, name, description, tags, self.clock.now())?;
        self.store.create(model.clone())?;
        tracing::info!(bank_id, model_id = %model.id, "pinned model created");
        Ok(model)
    }

    pub fn list_models(&self, bank_id: &str, filter: &ModelFilter) -> ReflectResult<Vec<MentalModel>> {
        Ok(self.store.list(bank_id, filter)?)
    }

    pub fn get_model(&self, bank_id: &str, model_id: &str) -> ReflectResult<MentalModel> {
        self.store
            .get(bank_id, model_id)?
            .ok_or_else(|| not_found(bank_id, model_id).into())
    }

    pub fn delete_model(&self, bank_id: &str, model_id: &str) -> ReflectResult<()> {
        if !self.store.delete(bank_id, model_id)? {
            return Err(not_found(bank_id, model_id).into());
        }
        tracing::info!(bank_id, model_id, "model deleted");
        Ok(())
    }

    /// Create or reuse a `learned` placeholder outside any loop.
    pub fn learn(&self, bank_id: &str, name: &str, description: &str) -> ReflectResult<MentalModel> {
        let (model, _) = learn_placeholder(
            self.store.as_ref(),
            &self.clock,
            bank_id,
            name,
            description,
            Default::default(),
        )?;
        Ok(model)
    }

    // -----------------------------------------------------------------------
    // Background operations
    // -----------------------------------------------------------------------

    /// Start a refresh for `profile`'s bank. Returns the operation id.
    pub fn submit_refresh(&self, profile: &BankProfile) -> ReflectResult<String> {
        profile.validate()?;
        let profile = profile.clone();
        let bank_id = profile.bank_id.clone();
        let shared = self.shared();
        let op_id = self.operations.submit(&bank_id, OperationKind::Refresh, move |cancel| {
            shared
                .refresher()
                .run(&profile, cancel)
                .map(OperationReport::Refresh)
                .map_err(|e| e.to_string())
        })?;
        Ok(op_id)
    }

    /// Submit a refresh and wait for its report.
    pub fn refresh_blocking(&self, profile: &BankProfile) -> ReflectResult<RefreshReport> {
        let op_id = self.submit_refresh(profile)?;
        match self.wait_operation(&op_id)? {
            OperationStatus::Completed {
                report: OperationReport::Refresh(report),
            }
            | OperationStatus::Cancelled {
                report: Some(OperationReport::Refresh(report)),
            } => Ok(report),
            OperationStatus::Failed { message } => {
                Err(RefreshError::OperationFailed { operation_id: op_id, message }.into())
            }
            other => Err(RefreshError::OperationFailed {
                operation_id: op_id,
                message: format!("unexpected operation state: {other:?}"),
            }
            .into()),
        }
    }

    /// Regenerate one model in the background. Pinned models are included.
    pub fn submit_generate(&self, bank_id: &str, model_id: &str) -> ReflectResult<String> {
        self.get_model(bank_id, model_id)?;
        let shared = self.shared();
        let (bank, model) = (bank_id.to_string(), model_id.to_string());
        let op_id = self.operations.submit(bank_id, OperationKind::Generate, move |_| {
            let status = shared.refresher().generate_one(&bank, &model);
            Ok(OperationReport::Generate(GenerateReport {
                bank_id: bank,
                model_id: model,
                status,
            }))
        })?;
        Ok(op_id)
    }

    pub fn operation_status(&self, op_id: &str) -> ReflectResult<OperationStatus> {
        Ok(self.operations.status(op_id)?)
    }

    pub fn cancel_operation(&self, op_id: &str) -> ReflectResult<OperationStatus> {
        Ok(self.operations.cancel(op_id)?)
    }

    pub fn wait_operation(&self, op_id: &str) -> ReflectResult<OperationStatus> {
        Ok(self.operations.wait(op_id)?)
    }

    // -----------------------------------------------------------------------
    // Agent loops
    // -----------------------------------------------------------------------

    fn context(
        &self,
        profile: &BankProfile,
        query: &str,
        tags: &[String],
        tags_match: TagsMatch,
    ) -> ReflectResult<AgentContext> {
        profile.validate()?;
        if query.trim().is_empty() {
            return Err(AgentError::EmptyQuery.into());
        }
        let mut ctx = AgentContext::new(profile.bank_id.clone());
        ctx.mission = profile.mission().map(str::to_string);
        ctx.disposition = profile.disposition;
        ctx.tags = validate_tags(tags)?.into_iter().collect();
        ctx.tags_match = tags_match;
        Ok(ctx)
    }

    fn limits(&self, budget: Budget) -> LoopLimits {
        LoopLimits {
            max_iterations: budget.iterations().min(self.config.agent.max_iterations),
            timeout: Duration::from_secs(self.config.agent.timeout_secs),
        }
    }

    /// Answer a query with the full toolset, including `learn`.
    pub fn reflect(&self, profile: &BankProfile, request: &ReflectRequest) -> ReflectResult<ReflectResponse> {
        let mut ctx = self.context(profile, &request.query, &request.tags, request.tags_match)?;
        ctx.budget = request.budget;
        ctx.output_mode = request.output_mode;
        let ceiling = self.config.agent.recall_max_tokens;
        ctx.max_tokens = Some(
            request
                .max_tokens
                .unwrap_or_else(|| request.budget.recall_tokens())
                .min(ceiling),
        );

        let limits = self.limits(request.budget);
        let result = ReflectLoop::new(
            self.deps(),
            Arc::clone(&self.reasoner),
            ctx,
            Toolset::Reflect,
            limits,
        )
        .run(&request.query);
        Ok(ReflectResponse::from_loop(result, request.include_trace))
    }

    /// Answer a query by browsing models and recalling facts; never writes.
    pub fn research(&self, profile: &BankProfile, query: &str, tags: &[String]) -> ReflectResult<ResearchResponse> {
        let mut ctx = self.context(profile, query, tags, TagsMatch::Any)?;
        ctx.max_tokens = Some(ctx.recall_max_tokens().min(self.config.agent.recall_max_tokens));
        let limits = self.limits(ctx.budget);
        let result = ReflectLoop::new(
            self.deps(),
            Arc::clone(&self.reasoner),
            ctx,
            Toolset::Research,
            limits,
        )
        .run(query);
        Ok(ResearchResponse::from_loop(result))
    }
}

fn not_found(bank_id: &str, model_id: &str) -> StoreError {
    StoreError::NotFound {
        bank_id: bank_id.to_string(),
        id: model_id.to_string(),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
