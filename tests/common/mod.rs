//! Shared test doubles: a scripted reasoner and fixed classifiers.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use akh_reflect::agent::action::Action;
use akh_reflect::config::ReflectConfig;
use akh_reflect::engine::Engine;
use akh_reflect::error::StoreError;
use akh_reflect::facts::{
    EntityMention, ExpandDepth, ExpandedContext, FactCorpus, FactRecord, FactResult, FactSource,
    RecallQuery, RecalledFact,
};
use akh_reflect::llm::{
    EntityCandidate, EntityClassifier, FinalAnswer, FinalRequest, LlmError, Reasoner,
    RuleClassifier, StepRequest, StructuralProposal, SynthesisRequest,
};
use akh_reflect::model::{MentalModel, ModelFilter, ModelSubtype};
use akh_reflect::provenance::{DraftClaim, DraftObservation, FactId, Observation};
use akh_reflect::store::mem::MemStore;
use akh_reflect::store::{CommitOutcome, ModelStore, StoreResult};

/// A reasoner that replays queued steps and answers everything else
/// deterministically.
#[derive(Default)]
pub struct ScriptedReasoner {
    steps: Mutex<VecDeque<Result<Action, String>>>,
    final_answer: Mutex<Option<FinalAnswer>>,
    structural: Mutex<Vec<StructuralProposal>>,
    structural_down: AtomicBool,
    /// Sleep before answering each step.
    step_delay: Mutex<Option<Duration>>,
    /// Sleeps for successive `synthesize` calls; later calls run at once.
    synth_delays: Mutex<VecDeque<Duration>>,
    /// Tool names offered at each step, in order.
    pub offered: Mutex<Vec<Vec<&'static str>>>,
    pub structural_calls: AtomicUsize,
    pub synthesize_calls: AtomicUsize,
    pub final_calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: Vec<Action>) -> Self {
        let r = Self::new();
        for s in steps {
            r.push_step(s);
        }
        r
    }

    pub fn push_step(&self, action: Action) {
        self.steps.lock().unwrap().push_back(Ok(action));
    }

    pub fn push_failure(&self, message: &str) {
        self.steps.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn set_final_answer(&self, answer: FinalAnswer) {
        *self.final_answer.lock().unwrap() = Some(answer);
    }

    pub fn set_structural(&self, proposals: &[(&str, &str)]) {
        *self.structural.lock().unwrap() = proposals
            .iter()
            .map(|(n, d)| StructuralProposal {
                name: n.to_string(),
                description: d.to_string(),
            })
            .collect();
        self.structural_down.store(false, Ordering::SeqCst);
    }

    pub fn fail_structural(&self) {
        self.structural_down.store(true, Ordering::SeqCst);
    }

    pub fn stall_steps(&self, delay: Duration) {
        *self.step_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_synthesis(&self, delays: &[Duration]) {
        self.synth_delays.lock().unwrap().extend(delays.iter().copied());
    }

    fn unavailable(message: String) -> LlmError {
        LlmError::RequestFailed { message }
    }
}

impl Reasoner for ScriptedReasoner {
    fn next_step(&self, req: &StepRequest<'_>) -> Result<Action, LlmError> {
        self.offered
            .lock()
            .unwrap()
            .push(req.tools.iter().map(|t| t.name).collect());
        let delay = *self.step_delay.lock().unwrap();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        match self.steps.lock().unwrap().pop_front() {
            Some(Ok(action)) => Ok(action),
            Some(Err(message)) => Err(Self::unavailable(message)),
            None => Err(Self::unavailable("script exhausted".into())),
        }
    }

    fn final_answer(&self, _: &FinalRequest<'_>) -> Result<FinalAnswer, LlmError> {
        self.final_calls.fetch_add(1, Ordering::SeqCst);
        self.final_answer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Self::unavailable("no final answer scripted".into()))
    }

    fn derive_structural(
        &self,
        _mission: &str,
        _existing: &[StructuralProposal],
    ) -> Result<Vec<StructuralProposal>, LlmError> {
        self.structural_calls.fetch_add(1, Ordering::SeqCst);
        if self.structural_down.load(Ordering::SeqCst) {
            return Err(Self::unavailable("structural backend down".into()));
        }
        Ok(self.structural.lock().unwrap().clone())
    }

    /// One observation with one claim per retrieved fact.
    fn synthesize(&self, req: &SynthesisRequest<'_>) -> Result<Vec<DraftObservation>, LlmError> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.synth_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(vec![DraftObservation {
            title: req.model_name.to_string(),
            claims: req
                .facts
                .iter()
                .map(|f| DraftClaim {
                    text: f.text.clone(),
                    fact_ids: vec![f.id.clone()],
                })
                .collect(),
        }])
    }
}

/// A classifier whose backend is always down.
pub struct DownClassifier;

impl EntityClassifier for DownClassifier {
    fn is_nameable(&self, _: &EntityCandidate) -> Result<bool, LlmError> {
        Err(LlmError::Unavailable {
            url: "http://127.0.0.1:9".into(),
        })
    }
}

/// A fact source whose recall hangs for queries containing `marker`.
pub struct StallingFacts {
    pub inner: FactCorpus,
    pub marker: &'static str,
    pub delay: Duration,
}

impl FactSource for StallingFacts {
    fn recall(&self, bank_id: &str, query: &RecallQuery) -> FactResult<Vec<RecalledFact>> {
        if query.query.contains(self.marker) {
            thread::sleep(self.delay);
        }
        self.inner.recall(bank_id, query)
    }

    fn expand(
        &self,
        bank_id: &str,
        fact_ids: &[FactId],
        depth: ExpandDepth,
    ) -> FactResult<Vec<ExpandedContext>> {
        self.inner.expand(bank_id, fact_ids, depth)
    }

    fn entity_mentions(&self, bank_id: &str) -> FactResult<Vec<EntityMention>> {
        self.inner.entity_mentions(bank_id)
    }
}

/// A store that refuses to create the listed ids and records the largest
/// structural set seen when a structural model is created.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemStore,
    failing: Mutex<BTreeSet<String>>,
    pub peak_structural: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_create(&self, ids: &[&str]) {
        *self.failing.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    fn structural_count(&self, bank_id: &str) -> usize {
        self.inner
            .list(bank_id, &ModelFilter::all().with_subtype(ModelSubtype::Structural))
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl ModelStore for FlakyStore {
    fn get(&self, bank_id: &str, id: &str) -> StoreResult<Option<MentalModel>> {
        self.inner.get(bank_id, id)
    }

    fn list(&self, bank_id: &str, filter: &ModelFilter) -> StoreResult<Vec<MentalModel>> {
        self.inner.list(bank_id, filter)
    }

    fn create(&self, model: MentalModel) -> StoreResult<()> {
        if self.failing.lock().unwrap().contains(&model.id) {
            return Err(StoreError::Redb {
                message: format!("write of {} refused", model.id),
            });
        }
        let structural = model.subtype == ModelSubtype::Structural;
        let bank_id = model.bank_id.clone();
        self.inner.create(model)?;
        if structural {
            self.peak_structural
                .fetch_max(self.structural_count(&bank_id), Ordering::SeqCst);
        }
        Ok(())
    }

    fn create_if_absent(&self, model: MentalModel) -> StoreResult<(MentalModel, bool)> {
        self.inner.create_if_absent(model)
    }

    fn update_identity(
        &self,
        bank_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> StoreResult<bool> {
        self.inner.update_identity(bank_id, id, name, description)
    }

    fn delete(&self, bank_id: &str, id: &str) -> StoreResult<bool> {
        self.inner.delete(bank_id, id)
    }

    fn commit_observations(
        &self,
        bank_id: &str,
        id: &str,
        observations: Vec<Observation>,
        fingerprint: u64,
        generated_at: u64,
    ) -> StoreResult<CommitOutcome> {
        self.inner
            .commit_observations(bank_id, id, observations, fingerprint, generated_at)
    }

    fn mission_marker(&self, bank_id: &str) -> StoreResult<Option<u64>> {
        self.inner.mission_marker(bank_id)
    }

    fn set_mission_marker(&self, bank_id: &str, hash: u64) -> StoreResult<()> {
        self.inner.set_mission_marker(bank_id, hash)
    }
}

/// Facts about an engineering team in bank "acme".
pub fn team_corpus() -> FactCorpus {
    let corpus = FactCorpus::new();
    let facts: &[(&str, &str, &[&str])] = &[
        ("f1", "Alice leads the platform team and owns the sprint goals.", &["Alice"]),
        ("f2", "Bob joined the team as a backend engineer in March.", &["Bob"]),
        ("f3", "The team decided to migrate deployments to Kubernetes.", &[]),
        ("f4", "Sprint goals for Q3 focus on search latency.", &[]),
        ("f5", "Key decisions are recorded in the architecture log.", &[]),
        ("f6", "Alice approved the Kubernetes migration plan.", &["Alice"]),
    ];
    for (id, text, entities) in facts {
        corpus.insert(FactRecord::new("acme", id, text).with_entities(entities));
    }
    corpus
}

/// Add `n` facts mentioning `name` to bank "acme".
pub fn add_mentions(corpus: &FactCorpus, name: &str, n: usize) {
    for i in 0..n {
        let id = format!("m-{}-{i}", name.to_lowercase());
        let text = format!("{name} was mentioned in standup number {i}.");
        corpus.insert(FactRecord::new("acme", &id, &text).with_entities(&[name]));
    }
}

pub fn engine_with(
    store: Arc<dyn ModelStore>,
    facts: FactCorpus,
    reasoner: Arc<ScriptedReasoner>,
    classifier: Arc<dyn EntityClassifier>,
) -> Engine {
    Engine::new(ReflectConfig::default(), store, Arc::new(facts), reasoner, classifier).unwrap()
}

/// In-memory engine with the rule classifier and a custom config.
pub fn engine_over(
    config: ReflectConfig,
    facts: Arc<dyn FactSource>,
    reasoner: Arc<ScriptedReasoner>,
) -> Engine {
    Engine::new(
        config,
        Arc::new(MemStore::new()),
        facts,
        reasoner,
        Arc::new(RuleClassifier::new()),
    )
    .unwrap()
}

/// In-memory engine with the rule classifier.
pub fn engine(facts: FactCorpus, reasoner: Arc<ScriptedReasoner>) -> Engine {
    engine_with(
        Arc::new(MemStore::new()),
        facts,
        reasoner,
        Arc::new(RuleClassifier::new()),
    )
}
