//! Execution of loop actions against the store and the fact source.
//!
//! Dispatch is an exhaustive match over [`Action`]; `done` never reaches
//! here because terminating the loop is the driver's job.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use crate::clock::MonotonicClock;
use crate::facts::{FactSource, RecallQuery};
use crate::model::{MentalModel, ModelFilter, tags_match, TagsMatch};
use crate::provenance::FactId;
use crate::store::ModelStore;

use super::AgentContext;
use super::action::Action;
use super::disposition::{ReasoningPolicy, is_emotionally_framed};
use super::error::{AgentError, AgentResult};
use super::trace::Trace;

/// Collaborators a loop reads from and writes to. Owned handles, so a tool
/// call can run on a worker thread that may outlive the step.
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Arc<dyn ModelStore>,
    pub facts: Arc<dyn FactSource>,
    pub clock: Arc<MonotonicClock>,
}

/// Result of one executed tool call.
#[derive(Debug, Clone)]
pub(crate) struct Dispatched {
    pub output: serde_json::Value,
    /// Id returned by a `learn` call.
    pub learned: Option<String>,
}

impl Dispatched {
    fn output(output: serde_json::Value) -> Self {
        Self {
            output,
            learned: None,
        }
    }
}

/// Create (or reuse) a `learned` placeholder. Returns the stored record and
/// whether this call created it.
pub fn learn_placeholder(
    store: &dyn ModelStore,
    clock: &MonotonicClock,
    bank_id: &str,
    name: &str,
    description: &str,
    tags: BTreeSet<String>,
) -> AgentResult<(MentalModel, bool)> {
    let mut model = MentalModel::learned(bank_id, name, description, clock.now())?;
    model.tags = tags;
    let (stored, created) = store.create_if_absent(model)?;
    if created {
        tracing::info!(bank_id, model_id = %stored.id, "learned model placeholder created");
    } else {
        tracing::debug!(bank_id, model_id = %stored.id, "learn reused existing model");
    }
    Ok((stored, created))
}

fn visible(model: &MentalModel, ctx: &AgentContext) -> bool {
    tags_match(&model.tags, &ctx.tags, ctx.tags_match)
}

pub(crate) fn execute(
    deps: &AgentDeps,
    ctx: &AgentContext,
    policy: &ReasoningPolicy,
    trace: &mut Trace,
    action: &Action,
) -> AgentResult<Dispatched> {
    match action {
        Action::ListMentalModels { tags } => {
            let filter = ModelFilter::all().with_tags(ctx.tags.clone(), ctx.tags_match);
            let summaries: Vec<_> = deps
                .store
                .list(&ctx.bank_id, &filter)?
                .iter()
                .filter(|m| tags_match(&m.tags, tags, TagsMatch::Any))
                .map(MentalModel::summary)
                .collect();
            trace.record_summaries(&summaries);
            Ok(Dispatched::output(json!({ "models": summaries })))
        }

        Action::GetMentalModel { model_id } => {
            match deps.store.get(&ctx.bank_id, model_id)? {
                Some(model) if visible(&model, ctx) => {
                    trace.record_model(&model);
                    Ok(Dispatched::output(json!({ "found": true, "model": model })))
                }
                _ => Ok(Dispatched::output(json!({ "found": false, "model_id": model_id }))),
            }
        }

        Action::Recall { query, max_tokens } => {
            // A step may ask for a smaller budget than the invocation's, never a larger one.
            let ceiling = ctx.recall_max_tokens();
            let budget = max_tokens.map_or(ceiling, |t| t.min(ceiling));
            let request = RecallQuery::new(query.clone(), budget)
                .with_tags(ctx.tags.clone(), ctx.tags_match);
            let recalled = deps.facts.recall(&ctx.bank_id, &request)?;
            let (kept, withheld): (Vec<_>, Vec<_>) = recalled
                .into_iter()
                .partition(|f| policy.include_emotional_context || !is_emotionally_framed(&f.text));
            if !withheld.is_empty() {
                tracing::debug!(
                    bank_id = %ctx.bank_id,
                    withheld = withheld.len(),
                    "emotionally framed facts withheld from recall"
                );
            }
            trace.record_facts(&kept);
            let memories: Vec<_> = kept
                .iter()
                .map(|f| json!({ "id": f.id, "text": f.text, "type": f.fact_type }))
                .collect();
            Ok(Dispatched::output(json!({
                "memories": memories,
                "withheld": withheld.len(),
            })))
        }

        Action::Expand { fact_ids, depth } => {
            let (known, unknown): (Vec<FactId>, Vec<FactId>) = fact_ids
                .iter()
                .cloned()
                .partition(|id| trace.fact(id).is_some());
            let results = if known.is_empty() {
                Vec::new()
            } else {
                deps.facts.expand(&ctx.bank_id, &known, *depth)?
            };
            Ok(Dispatched::output(json!({
                "results": results,
                "unknown": unknown,
            })))
        }

        Action::Learn { name, description } => {
            let tags: BTreeSet<String> = ctx.tags.iter().cloned().collect();
            let (model, created) = learn_placeholder(
                deps.store.as_ref(),
                &deps.clock,
                &ctx.bank_id,
                name,
                description,
                tags,
            )?;
            Ok(Dispatched {
                output: json!({ "model_id": model.id, "created": created }),
                learned: Some(model.id),
            })
        }

        Action::Done { .. } => Err(AgentError::InvalidAction {
            message: "done terminates the loop and is not dispatched".into(),
        }),
    }
}
