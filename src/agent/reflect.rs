//! The loop driver: `(state, trace) -> (action, new state)` with the iteration
//! cap and the wall-clock deadline as explicit transition guards.
//!
//! Reasoner and tool calls run on a worker thread and are awaited for at most
//! the time left before the deadline. A call that overruns is abandoned; the
//! loop ends as [`LoopOutcome::TimedOut`] without waiting for it.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::llm::{FinalRequest, LlmError, Reasoner, StepRequest};
use crate::provenance::FactId;

use super::action::{Action, DoneObservation};
use super::dispatch::{self, AgentDeps};
use super::disposition::ReasoningPolicy;
use super::error::AgentError;
use super::response::ReflectObservation;
use super::tool::{ToolSignature, Toolset};
use super::trace::{Citations, Trace, TraceEntry};
use super::{AgentContext, OutputMode};

/// Facts quoted by the deterministic fallback answer.
const FALLBACK_FACTS: usize = 3;

/// Hard limits of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: usize,
    pub timeout: Duration,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout: Duration::from_secs(120),
        }
    }
}

/// How a loop ended. Only `Done` is a full success; the others still carry a
/// best-effort answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Done,
    IterationsExhausted,
    TimedOut,
    ReasonerUnavailable,
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Done => "done",
            Self::IterationsExhausted => "iterations_exhausted",
            Self::TimedOut => "timed_out",
            Self::ReasonerUnavailable => "reasoner_unavailable",
        })
    }
}

/// Timing of one reasoner call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmCallRecord {
    pub scope: String,
    pub duration_ms: u64,
}

/// Everything a finished loop produced.
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub answer: String,
    /// Citations restricted to ids seen in the trace.
    pub citations: Citations,
    pub outcome: LoopOutcome,
    pub iterations: usize,
    pub trace: Trace,
    pub llm_calls: Vec<LlmCallRecord>,
    /// Ids returned by `learn`, in call order.
    pub models_created: Vec<String>,
    /// Settled observations; empty unless observations were requested and
    /// the loop ended with `done`.
    pub observations: Vec<ReflectObservation>,
}

enum Finish {
    Done {
        answer: String,
        fact_ids: Vec<FactId>,
        model_ids: Vec<String>,
        observations: Vec<DoneObservation>,
    },
    Forced(LoopOutcome),
}

enum Transition {
    Continue,
    Finish(Finish),
}

struct LoopState {
    trace: Trace,
    iteration: usize,
    llm_calls: Vec<LlmCallRecord>,
    models_created: Vec<String>,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Why a bounded call produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overrun {
    /// The limit passed first.
    Deadline,
    /// The worker could not start or panicked.
    Lost,
}

/// Run `f` on a named worker thread and wait at most `limit` for its result.
/// A worker that overruns is detached and its result discarded.
fn bounded<T, F>(name: &str, limit: Duration, f: F) -> Result<T, Overrun>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("akh-reflect-{name}"))
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| {
            tracing::warn!(worker = name, error = %e, "failed to spawn worker thread");
            Overrun::Lost
        })?;
    rx.recv_timeout(limit).map_err(|e| match e {
        RecvTimeoutError::Timeout => Overrun::Deadline,
        RecvTimeoutError::Disconnected => Overrun::Lost,
    })
}

/// Owned copy of a [`StepRequest`] that can move to a worker.
struct StepInput {
    query: String,
    mission: Option<String>,
    policy: ReasoningPolicy,
    tools: Vec<ToolSignature>,
    trace: Vec<TraceEntry>,
    iteration: usize,
    max_iterations: usize,
    remaining: Duration,
}

impl StepInput {
    fn request(&self) -> StepRequest<'_> {
        StepRequest {
            query: &self.query,
            mission: self.mission.as_deref(),
            policy: &self.policy,
            tools: &self.tools,
            trace: &self.trace,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            remaining: self.remaining,
        }
    }
}

/// One reflect or research invocation.
pub struct ReflectLoop {
    deps: AgentDeps,
    reasoner: Arc<dyn Reasoner>,
    ctx: AgentContext,
    toolset: Toolset,
    limits: LoopLimits,
}

impl ReflectLoop {
    pub fn new(
        deps: AgentDeps,
        reasoner: Arc<dyn Reasoner>,
        ctx: AgentContext,
        toolset: Toolset,
        limits: LoopLimits,
    ) -> Self {
        Self {
            deps,
            reasoner,
            ctx,
            toolset,
            limits,
        }
    }

    /// Run to completion. Never fails: every exit path yields an answer.
    pub fn run(&self, query: &str) -> LoopResult {
        let started = Instant::now();
        let deadline = started + self.limits.timeout;
        let policy = self.ctx.disposition.policy();
        let tools = self.toolset.signatures(self.ctx.output_mode);
        let finish_tools = Toolset::finish_only(self.ctx.output_mode);
        let mut state = LoopState {
            trace: Trace::new(),
            iteration: 0,
            llm_calls: Vec::new(),
            models_created: Vec::new(),
        };

        let finish = loop {
            if state.iteration >= self.limits.max_iterations {
                break Finish::Forced(LoopOutcome::IterationsExhausted);
            }
            if Instant::now() >= deadline {
                break Finish::Forced(LoopOutcome::TimedOut);
            }
            state.iteration += 1;
            match self.step(&mut state, query, &policy, &tools, &finish_tools, deadline) {
                Transition::Continue => continue,
                Transition::Finish(f) => break f,
            }
        };

        let result = self.finish(state, query, &policy, finish, deadline);
        tracing::info!(
            bank_id = %self.ctx.bank_id,
            toolset = self.toolset.name(),
            iterations = result.iterations,
            outcome = %result.outcome,
            tool_calls = result.trace.entries().len(),
            duration_ms = millis(started.elapsed()),
            "agent loop finished"
        );
        result
    }

    fn step(
        &self,
        state: &mut LoopState,
        query: &str,
        policy: &ReasoningPolicy,
        tools: &[ToolSignature],
        finish_tools: &[ToolSignature],
        deadline: Instant,
    ) -> Transition {
        let iteration = state.iteration;
        let is_last = iteration >= self.limits.max_iterations;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let input = StepInput {
            query: query.to_string(),
            mission: self.ctx.mission.clone(),
            policy: *policy,
            tools: (if is_last { finish_tools } else { tools }).to_vec(),
            trace: state.trace.entries().to_vec(),
            iteration,
            max_iterations: self.limits.max_iterations,
            remaining,
        };

        let reasoner = Arc::clone(&self.reasoner);
        let t0 = Instant::now();
        let decided = bounded("step", remaining, move || reasoner.next_step(&input.request()));
        let duration_ms = millis(t0.elapsed());
        let decided = match decided {
            Ok(decided) => decided,
            Err(Overrun::Deadline) => {
                state.llm_calls.push(LlmCallRecord {
                    scope: format!("agent_{iteration}_timeout"),
                    duration_ms,
                });
                tracing::warn!(iteration, duration_ms, "reasoner step overran the deadline");
                return Transition::Finish(Finish::Forced(LoopOutcome::TimedOut));
            }
            Err(Overrun::Lost) => Err(LlmError::RequestFailed {
                message: "reasoner call was lost".into(),
            }),
        };
        let scope = match decided {
            Ok(_) => format!("agent_{iteration}"),
            Err(_) => format!("agent_{iteration}_err"),
        };
        state.llm_calls.push(LlmCallRecord { scope, duration_ms });

        let action = match decided {
            Ok(action) => action,
            Err(e) => {
                if !state.trace.has_evidence() && !is_last {
                    tracing::warn!(iteration, error = %e, "reasoner step failed before any evidence, retrying");
                    return Transition::Continue;
                }
                tracing::warn!(iteration, error = %e, "reasoner step failed, forcing final answer");
                return Transition::Finish(Finish::Forced(LoopOutcome::ReasonerUnavailable));
            }
        };
        tracing::debug!(iteration, tool = action.tool_name(), "agent step");

        if is_last && !matches!(action, Action::Done { .. }) {
            return Transition::Finish(Finish::Forced(LoopOutcome::IterationsExhausted));
        }

        if !self.toolset.permits(action.tool_name()) {
            let err = AgentError::ToolNotAvailable {
                tool_name: action.tool_name().into(),
                toolset: self.toolset.name().into(),
            };
            reject(state, &action, err.to_string());
            return Transition::Continue;
        }

        if let Action::Done {
            fact_ids,
            model_ids,
            observations,
            ..
        } = &action
        {
            let cited: Vec<FactId> = fact_ids
                .iter()
                .chain(observations.iter().flat_map(|o| o.fact_ids.iter()))
                .cloned()
                .collect();
            if let Some(message) = done_rejection(&state.trace, policy, &cited, model_ids, is_last) {
                reject(state, &action, message);
                return Transition::Continue;
            }
        }

        match action {
            Action::Done {
                answer,
                fact_ids,
                model_ids,
                observations,
            } => Transition::Finish(Finish::Done {
                answer,
                fact_ids,
                model_ids,
                observations,
            }),
            other => self.call_tool(state, policy, other, deadline),
        }
    }

    /// Execute a tool on a worker against a copy of the trace, adopting the
    /// copy once the call returns in time.
    fn call_tool(
        &self,
        state: &mut LoopState,
        policy: &ReasoningPolicy,
        action: Action,
        deadline: Instant,
    ) -> Transition {
        let iteration = state.iteration;
        let tool = action.tool_name();
        let input = action.arguments();
        let remaining = deadline.saturating_duration_since(Instant::now());

        let deps = self.deps.clone();
        let ctx = self.ctx.clone();
        let policy = *policy;
        let mut trace = state.trace.clone();
        let t0 = Instant::now();
        let ran = bounded(tool, remaining, move || {
            let executed = dispatch::execute(&deps, &ctx, &policy, &mut trace, &action);
            (executed, trace)
        });
        let duration_ms = millis(t0.elapsed());

        let (output, success, transition) = match ran {
            Ok((executed, trace)) => {
                state.trace = trace;
                match executed {
                    Ok(done) => {
                        if let Some(id) = done.learned {
                            if !state.models_created.contains(&id) {
                                state.models_created.push(id);
                            }
                        }
                        (done.output, true, Transition::Continue)
                    }
                    Err(e) => {
                        tracing::warn!(iteration, tool, error = %e, "tool call failed");
                        (json!({ "error": e.to_string() }), false, Transition::Continue)
                    }
                }
            }
            Err(Overrun::Deadline) => {
                tracing::warn!(iteration, tool, duration_ms, "tool call overran the deadline");
                (
                    json!({ "error": "tool call exceeded the remaining time budget" }),
                    false,
                    Transition::Finish(Finish::Forced(LoopOutcome::TimedOut)),
                )
            }
            Err(Overrun::Lost) => {
                tracing::warn!(iteration, tool, "tool call was lost");
                (json!({ "error": "tool call was lost" }), false, Transition::Continue)
            }
        };
        state.trace.push(TraceEntry {
            iteration,
            tool: tool.into(),
            input,
            output,
            success,
            duration_ms,
        });
        transition
    }

    fn finish(
        &self,
        mut state: LoopState,
        query: &str,
        policy: &ReasoningPolicy,
        finish: Finish,
        deadline: Instant,
    ) -> LoopResult {
        let mut settled = Vec::new();
        let (answer, citations, outcome) = match finish {
            Finish::Done {
                answer,
                fact_ids,
                model_ids,
                observations,
            } => {
                let mut citations = state.trace.filter_citations(&fact_ids, &model_ids);
                if self.ctx.output_mode == OutputMode::Observations {
                    settled = settle_observations(&state.trace, observations, &mut citations);
                }
                let answer = if !settled.is_empty() {
                    render_observations(&settled)
                } else if answer.trim().is_empty() {
                    fallback_answer(query, &state.trace).0
                } else {
                    answer.trim().to_string()
                };
                (answer, citations, LoopOutcome::Done)
            }
            Finish::Forced(outcome) => {
                let (answer, citations) =
                    self.best_effort(&mut state, query, policy, outcome, deadline);
                (answer, citations, outcome)
            }
        };

        if !citations.dropped.is_empty() {
            tracing::warn!(
                bank_id = %self.ctx.bank_id,
                dropped = citations.dropped.len(),
                "dropped citations that never appeared in the trace"
            );
        }

        LoopResult {
            answer,
            citations,
            outcome,
            iterations: state.iteration,
            trace: state.trace,
            llm_calls: state.llm_calls,
            models_created: state.models_created,
            observations: settled,
        }
    }

    /// Answer from whatever the trace holds. Asks the reasoner once when time
    /// and policy allow; otherwise quotes the trace verbatim.
    fn best_effort(
        &self,
        state: &mut LoopState,
        query: &str,
        policy: &ReasoningPolicy,
        outcome: LoopOutcome,
        deadline: Instant,
    ) -> (String, Citations) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if outcome == LoopOutcome::TimedOut || remaining.is_zero() || !policy.allow_paraphrase {
            return fallback_answer(query, &state.trace);
        }

        let reasoner = Arc::clone(&self.reasoner);
        let (owned_query, policy, entries) = (query.to_string(), *policy, state.trace.entries().to_vec());
        let t0 = Instant::now();
        let composed = bounded("final", remaining, move || {
            reasoner.final_answer(&FinalRequest {
                query: &owned_query,
                policy: &policy,
                trace: &entries,
                remaining,
            })
        });
        let duration_ms = millis(t0.elapsed());
        let scope = match composed {
            Err(Overrun::Deadline) => "final_timeout",
            _ => "final",
        };
        state.llm_calls.push(LlmCallRecord {
            scope: scope.into(),
            duration_ms,
        });
        match composed {
            Ok(Ok(fa)) if !fa.answer.trim().is_empty() => {
                let citations = state.trace.filter_citations(&fa.fact_ids, &fa.model_ids);
                (fa.answer.trim().to_string(), citations)
            }
            Ok(Ok(_)) => fallback_answer(query, &state.trace),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "final answer synthesis failed, using trace fallback");
                fallback_answer(query, &state.trace)
            }
            Err(overrun) => {
                tracing::warn!(?overrun, "final answer synthesis did not return, using trace fallback");
                fallback_answer(query, &state.trace)
            }
        }
    }
}

/// Why a `done` must be refused, if it must. Both guards are waived on the
/// last allowed step.
fn done_rejection(
    trace: &Trace,
    policy: &ReasoningPolicy,
    fact_ids: &[FactId],
    model_ids: &[String],
    is_last: bool,
) -> Option<String> {
    if is_last {
        return None;
    }
    if !trace.has_evidence() {
        return Some("gather evidence with recall or list_mental_models before answering".into());
    }
    if policy.min_corroboration > 1 {
        let support = trace.corroboration(&trace.filter_citations(fact_ids, model_ids));
        if support < policy.min_corroboration {
            return Some(format!(
                "answer cites {support} independent source(s); at least {} are required",
                policy.min_corroboration
            ));
        }
    }
    None
}

/// Restrict each proposed observation's fact ids to the trace, folding the
/// kept ids into `citations`. Observations with no text are dropped.
fn settle_observations(
    trace: &Trace,
    proposed: Vec<DoneObservation>,
    citations: &mut Citations,
) -> Vec<ReflectObservation> {
    let mut settled = Vec::new();
    for obs in proposed {
        let text = obs.text.trim();
        if text.is_empty() {
            continue;
        }
        let own = trace.filter_citations(&obs.fact_ids, &[]);
        for id in &own.fact_ids {
            if !citations.fact_ids.contains(id) {
                citations.fact_ids.push(id.clone());
            }
        }
        citations.dropped.extend(own.dropped);
        settled.push(ReflectObservation {
            title: obs.title.trim().to_string(),
            text: text.to_string(),
            fact_ids: own.fact_ids,
        });
    }
    settled
}

/// `## title` headed sections separated by blank lines.
fn render_observations(observations: &[ReflectObservation]) -> String {
    observations
        .iter()
        .map(|o| {
            if o.title.is_empty() {
                o.text.clone()
            } else {
                format!("## {}\n{}", o.title, o.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn reject(state: &mut LoopState, action: &Action, message: String) {
    tracing::debug!(iteration = state.iteration, tool = action.tool_name(), %message, "action rejected");
    state.trace.push(TraceEntry {
        iteration: state.iteration,
        tool: action.tool_name().into(),
        input: action.arguments(),
        output: json!({ "error": message }),
        success: false,
        duration_ms: 0,
    });
}

/// Deterministic answer assembled from the trace: the first recalled facts
/// quoted verbatim, else model descriptions, else a plain "nothing found".
pub fn fallback_answer(query: &str, trace: &Trace) -> (String, Citations) {
    let facts: Vec<_> = trace.facts_by_rank().into_iter().take(FALLBACK_FACTS).collect();
    if !facts.is_empty() {
        let quoted: Vec<String> = facts
            .iter()
            .map(|(id, f)| format!("\"{}\" [{}]", f.text, id))
            .collect();
        let citations = Citations {
            fact_ids: facts.iter().map(|(id, _)| (*id).clone()).collect(),
            ..Default::default()
        };
        return (
            format!("Relevant facts found: {}", quoted.join("; ")),
            citations,
        );
    }

    let models: Vec<_> = trace.models().take(FALLBACK_FACTS).collect();
    if !models.is_empty() {
        let described: Vec<String> = models
            .iter()
            .map(|(_, m)| format!("{}: {}", m.name, m.description))
            .collect();
        let citations = Citations {
            model_ids: models.iter().map(|(id, _)| (*id).clone()).collect(),
            ..Default::default()
        };
        return (
            format!("Relevant mental models: {}", described.join("; ")),
            citations,
        );
    }

    (
        format!("No information relevant to \"{query}\" was found."),
        Citations::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::RecalledFact;

    fn seen(ids: &[&str]) -> Trace {
        let mut trace = Trace::new();
        let recalled: Vec<RecalledFact> = ids
            .iter()
            .map(|id| RecalledFact {
                id: FactId::new(*id),
                text: format!("text {id}"),
                fact_type: "world".into(),
                score: 1.0,
                tags: Vec::new(),
            })
            .collect();
        trace.record_facts(&recalled);
        trace
    }

    #[test]
    fn bounded_gives_up_at_the_limit() {
        let t0 = Instant::now();
        let out = bounded("slow", Duration::from_millis(50), || {
            thread::sleep(Duration::from_secs(2));
            1
        });
        assert_eq!(out, Err(Overrun::Deadline));
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert_eq!(bounded("quick", Duration::from_secs(1), || 7), Ok(7));
    }

    #[test]
    fn panicking_worker_is_lost() {
        let out: Result<(), _> = bounded("boom", Duration::from_secs(1), || panic!("boom"));
        assert_eq!(out, Err(Overrun::Lost));
    }

    #[test]
    fn observations_keep_only_their_seen_facts() {
        let trace = seen(&["f1", "f2"]);
        let mut citations = Citations::default();
        let settled = settle_observations(
            &trace,
            vec![
                DoneObservation {
                    title: "Ownership".into(),
                    text: "Alice owns the platform.".into(),
                    fact_ids: vec![FactId::new("f1"), FactId::new("f9")],
                },
                DoneObservation {
                    title: String::new(),
                    text: "Bob is on call.".into(),
                    fact_ids: vec![FactId::new("f2")],
                },
                DoneObservation {
                    title: "Empty".into(),
                    text: "  ".into(),
                    fact_ids: vec![FactId::new("f1")],
                },
            ],
            &mut citations,
        );
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].fact_ids, vec![FactId::new("f1")]);
        assert_eq!(citations.fact_ids, vec![FactId::new("f1"), FactId::new("f2")]);
        assert_eq!(citations.dropped.len(), 1);
        assert_eq!(
            render_observations(&settled),
            "## Ownership\nAlice owns the platform.\n\nBob is on call."
        );
    }
}
