//! Reflect and research loops driven by a scripted reasoner.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use akh_reflect::agent::action::{Action, DoneObservation};
use akh_reflect::agent::{Budget, Disposition, LoopOutcome, OutputMode};
use akh_reflect::bank::BankProfile;
use akh_reflect::config::ReflectConfig;
use akh_reflect::engine::{Engine, ReflectRequest};
use akh_reflect::facts::FactRecord;
use akh_reflect::llm::{FinalAnswer, RuleClassifier};
use akh_reflect::model::{ModelFilter, ModelSubtype};
use akh_reflect::provenance::FactId;
use akh_reflect::store::mem::MemStore;

use common::{ScriptedReasoner, StallingFacts, engine, engine_over, team_corpus};

fn recall(query: &str) -> Action {
    Action::Recall {
        query: query.into(),
        max_tokens: None,
    }
}

fn done(answer: &str, facts: &[&str], models: &[&str]) -> Action {
    Action::Done {
        answer: answer.into(),
        fact_ids: facts.iter().map(|f| FactId::new(*f)).collect(),
        model_ids: models.iter().map(|m| m.to_string()).collect(),
        observations: Vec::new(),
    }
}

fn one_second_budget() -> ReflectConfig {
    let mut config = ReflectConfig::default();
    config.agent.timeout_secs = 1;
    config
}

fn acme() -> BankProfile {
    BankProfile::new("acme")
}

fn traced(query: &str) -> ReflectRequest {
    ReflectRequest {
        include_trace: true,
        ..ReflectRequest::new(query)
    }
}

fn based_on_ids(resp: &akh_reflect::agent::ReflectResponse) -> Vec<&str> {
    resp.based_on.iter().map(|b| b.id.as_str()).collect()
}

#[test]
fn done_with_citations_answers_and_drops_unseen_ids() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("who leads the platform team"),
        done("Alice leads the platform team.", &["f1", "f99"], &[]),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .reflect(&acme(), &ReflectRequest::new("Who leads the platform team?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(resp.text, "Alice leads the platform team.");
    assert_eq!(resp.iterations, 2);
    assert_eq!(based_on_ids(&resp), vec!["f1"]);
    assert_eq!(resp.dropped_citations.len(), 1);
    assert_eq!(resp.dropped_citations[0].id, "f99");
    assert!(resp.tool_calls.is_none());
    assert!(resp.llm_calls.is_none());
}

#[test]
fn done_before_any_evidence_is_rejected() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        done("Probably Alice.", &[], &[]),
        recall("platform team lead"),
        done("Alice leads the platform team.", &["f1"], &[]),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .reflect(&acme(), &traced("Who leads the platform team?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(resp.iterations, 3);
    assert_eq!(resp.text, "Alice leads the platform team.");

    let calls = resp.tool_calls.unwrap();
    assert_eq!(calls[0].tool, "done");
    assert!(!calls[0].success);
    assert_eq!(calls[1].tool, "recall");
    assert!(calls[1].success);
}

#[test]
fn last_iteration_only_offers_done() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    for _ in 0..5 {
        reasoner.push_step(recall("sprint goals"));
    }
    let engine = engine(team_corpus(), reasoner.clone());

    let request = ReflectRequest {
        budget: Budget::Low,
        ..ReflectRequest::new("What are the sprint goals?")
    };
    let resp = engine.reflect(&acme(), &request).unwrap();

    assert_eq!(resp.outcome, LoopOutcome::IterationsExhausted);
    assert_eq!(resp.iterations, 5);
    let offered = reasoner.offered.lock().unwrap();
    assert_eq!(offered.len(), 5);
    assert!(offered[0].contains(&"recall"));
    assert!(offered[0].contains(&"learn"));
    assert_eq!(offered[4], vec!["done"]);

    // No composed answer was scripted, so the trace is quoted.
    assert_eq!(reasoner.final_calls.load(Ordering::SeqCst), 1);
    assert!(resp.text.starts_with("Relevant facts found:"), "{}", resp.text);
    assert!(resp.text.contains("[f1]") || resp.text.contains("[f4]"));
}

#[test]
fn exhausted_loop_composes_a_final_answer() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    for _ in 0..5 {
        reasoner.push_step(recall("sprint goals"));
    }
    reasoner.set_final_answer(FinalAnswer {
        answer: "The sprint focuses on search latency.".into(),
        fact_ids: vec![FactId::new("f4"), FactId::new("f42")],
        model_ids: Vec::new(),
    });
    let engine = engine(team_corpus(), reasoner.clone());

    let request = ReflectRequest {
        budget: Budget::Low,
        include_trace: true,
        ..ReflectRequest::new("What are the sprint goals?")
    };
    let resp = engine.reflect(&acme(), &request).unwrap();
    assert_eq!(resp.outcome, LoopOutcome::IterationsExhausted);
    assert_eq!(resp.text, "The sprint focuses on search latency.");
    assert_eq!(based_on_ids(&resp), vec!["f4"]);
    assert_eq!(resp.dropped_citations[0].id, "f42");
    let scopes: Vec<_> = resp
        .llm_calls
        .unwrap()
        .into_iter()
        .map(|c| c.scope)
        .collect();
    assert_eq!(scopes.last().map(String::as_str), Some("final"));
}

#[test]
fn literal_disposition_quotes_instead_of_paraphrasing() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    for _ in 0..5 {
        reasoner.push_step(recall("Kubernetes migration"));
    }
    reasoner.set_final_answer(FinalAnswer {
        answer: "They are moving to Kubernetes.".into(),
        fact_ids: Vec::new(),
        model_ids: Vec::new(),
    });
    let engine = engine(team_corpus(), reasoner.clone());
    let profile = acme().with_disposition(Disposition::new(3, 5, 3).unwrap());

    let request = ReflectRequest {
        budget: Budget::Low,
        ..ReflectRequest::new("What is happening with Kubernetes?")
    };
    let resp = engine.reflect(&profile, &request).unwrap();
    assert_eq!(resp.outcome, LoopOutcome::IterationsExhausted);
    assert_eq!(reasoner.final_calls.load(Ordering::SeqCst), 0);
    assert!(resp.text.starts_with("Relevant facts found:"));
    assert!(resp.text.contains("\"Alice approved the Kubernetes migration plan.\""));
}

#[test]
fn zero_timeout_answers_without_calling_the_reasoner() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![recall("anything")]));
    let mut config = ReflectConfig::default();
    config.agent.timeout_secs = 0;
    let engine = Engine::new(
        config,
        Arc::new(MemStore::new()),
        Arc::new(team_corpus()),
        reasoner.clone(),
        Arc::new(RuleClassifier::new()),
    )
    .unwrap();

    let resp = engine
        .reflect(&acme(), &ReflectRequest::new("Who is on the team?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::TimedOut);
    assert_eq!(resp.iterations, 0);
    assert_eq!(resp.text, "No information relevant to \"Who is on the team?\" was found.");
    assert!(reasoner.offered.lock().unwrap().is_empty());
    assert_eq!(reasoner.final_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn learning_the_same_name_twice_creates_one_model() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        Action::Learn {
            name: "Kubernetes Strategy".into(),
            description: "How the team is adopting Kubernetes".into(),
        },
        Action::Learn {
            name: "kubernetes strategy".into(),
            description: "A different description".into(),
        },
        Action::ListMentalModels { tags: Vec::new() },
        done("Tracking it as a new topic.", &[], &["kubernetes-strategy"]),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .reflect(&acme(), &ReflectRequest::new("What is our Kubernetes strategy?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(resp.mental_models_created, vec!["kubernetes-strategy"]);
    assert_eq!(based_on_ids(&resp), vec!["kubernetes-strategy"]);
    assert_eq!(resp.based_on[0].kind, "mental_model");

    let learned = engine
        .list_models("acme", &ModelFilter::all().with_subtype(ModelSubtype::Learned))
        .unwrap();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].description, "How the team is adopting Kubernetes");
    assert!(learned[0].is_placeholder());
}

#[test]
fn research_never_learns() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        Action::Learn {
            name: "Kubernetes Strategy".into(),
            description: "How the team is adopting Kubernetes".into(),
        },
        recall("Kubernetes migration"),
        done("The team is migrating deployments to Kubernetes.", &["f3"], &[]),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .research(&acme(), "What is the plan for Kubernetes?", &[])
        .unwrap();
    assert_eq!(resp.answer, "The team is migrating deployments to Kubernetes.");
    assert_eq!(
        resp.facts_used,
        vec!["The team decided to migrate deployments to Kubernetes."]
    );
    assert!(resp.mental_models_used.is_empty());

    let offered = reasoner.offered.lock().unwrap();
    assert!(!offered[0].contains(&"learn"));
    assert!(offered[0].contains(&"recall"));
    assert!(engine.list_models("acme", &ModelFilter::all()).unwrap().is_empty());
}

#[test]
fn low_empathy_withholds_emotional_facts() {
    let corpus = team_corpus();
    corpus.insert(FactRecord::new(
        "acme",
        "f7",
        "Bob felt frustrated after the sprint review.",
    ));
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("Bob sprint review"),
        done("Bob joined in March.", &["f2", "f7"], &[]),
    ]));
    let engine = engine(corpus, reasoner.clone());
    let profile = acme().with_disposition(Disposition::new(3, 3, 1).unwrap());

    let resp = engine.reflect(&profile, &traced("How is Bob doing?")).unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(based_on_ids(&resp), vec!["f2"]);
    assert_eq!(resp.dropped_citations[0].id, "f7");

    let calls = resp.tool_calls.unwrap();
    assert_eq!(calls[0].output["withheld"], 1);
    let returned: Vec<&str> = calls[0].output["memories"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(!returned.contains(&"f7"));
}

#[test]
fn high_skepticism_needs_two_sources() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("Alice"),
        done("Alice runs the platform team.", &["f1"], &[]),
        done("Alice runs the platform team.", &["f1", "f6"], &[]),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());
    let profile = acme().with_disposition(Disposition::new(5, 3, 3).unwrap());

    let resp = engine.reflect(&profile, &traced("What does Alice do?")).unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(resp.iterations, 3);
    assert_eq!(based_on_ids(&resp), vec!["f1", "f6"]);

    let calls = resp.tool_calls.unwrap();
    assert_eq!(calls[1].tool, "done");
    assert!(!calls[1].success);
}

#[test]
fn reasoner_failure_before_evidence_is_retried() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    reasoner.push_failure("connection reset");
    reasoner.push_step(recall("platform team"));
    reasoner.push_step(done("Alice leads the platform team.", &["f1"], &[]));
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .reflect(&acme(), &traced("Who leads the platform team?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(resp.iterations, 3);
    let llm_calls = resp.llm_calls.unwrap();
    assert_eq!(llm_calls[0].scope, "agent_1_err");
    assert_eq!(llm_calls[1].scope, "agent_2");
}

#[test]
fn reasoner_failure_after_evidence_falls_back_to_the_trace() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    reasoner.push_step(recall("platform team"));
    reasoner.push_failure("connection reset");
    let engine = engine(team_corpus(), reasoner.clone());

    let resp = engine
        .reflect(&acme(), &ReflectRequest::new("Who leads the platform team?"))
        .unwrap();
    assert_eq!(resp.outcome, LoopOutcome::ReasonerUnavailable);
    assert_eq!(resp.iterations, 2);
    assert!(resp.text.starts_with("Relevant facts found:"));
    assert!(!resp.based_on.is_empty());
}

#[test]
fn tags_limit_which_models_can_be_cited() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        Action::ListMentalModels { tags: Vec::new() },
        done(
            "The roadmap is public.",
            &[],
            &["pinned-roadmap", "pinned-salaries"],
        ),
    ]));
    let engine = engine(team_corpus(), reasoner.clone());
    engine
        .create_pinned("acme", "Roadmap", "Upcoming launches", &["public".into()])
        .unwrap();
    engine
        .create_pinned("acme", "Salaries", "Compensation bands", &["hr".into()])
        .unwrap();

    let request = ReflectRequest {
        tags: vec!["public".into()],
        ..ReflectRequest::new("What is on the roadmap?")
    };
    let resp = engine.reflect(&acme(), &request).unwrap();
    assert_eq!(based_on_ids(&resp), vec!["pinned-roadmap"]);
    assert_eq!(resp.dropped_citations[0].id, "pinned-salaries");
}

#[test]
fn empty_query_is_rejected() {
    let engine = engine(team_corpus(), Arc::new(ScriptedReasoner::new()));
    assert!(engine.reflect(&acme(), &ReflectRequest::new("   ")).is_err());
    assert!(engine.research(&acme(), "", &[]).is_err());
}

#[test]
fn stalled_recall_times_out_mid_loop() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("who leads the platform team"),
        recall("slow archive search"),
        done("never reached", &["f1"], &[]),
    ]));
    let facts = StallingFacts {
        inner: team_corpus(),
        marker: "slow archive",
        delay: Duration::from_secs(5),
    };
    let engine = engine_over(one_second_budget(), Arc::new(facts), reasoner.clone());

    let started = Instant::now();
    let resp = engine
        .reflect(&acme(), &traced("Who leads the platform team?"))
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert_eq!(resp.outcome, LoopOutcome::TimedOut);
    assert_eq!(resp.iterations, 2);

    // The first recall is kept and quoted; the stalled one is recorded as failed.
    assert!(resp.text.starts_with("Relevant facts found:"), "{}", resp.text);
    assert!(resp.text.contains("[f1]"));
    let calls = resp.tool_calls.unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].success);
    assert_eq!(calls[1].tool, "recall");
    assert!(!calls[1].success);
    assert_eq!(reasoner.final_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stalled_reasoner_step_times_out() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![recall("platform team")]));
    reasoner.stall_steps(Duration::from_secs(5));
    let engine = engine_over(one_second_budget(), Arc::new(team_corpus()), reasoner.clone());

    let started = Instant::now();
    let resp = engine
        .reflect(&acme(), &traced("Who leads the platform team?"))
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert_eq!(resp.outcome, LoopOutcome::TimedOut);
    assert_eq!(resp.iterations, 1);
    assert!(resp.tool_calls.unwrap().is_empty());
    assert_eq!(resp.llm_calls.unwrap()[0].scope, "agent_1_timeout");
    assert_eq!(
        resp.text,
        "No information relevant to \"Who leads the platform team?\" was found."
    );
}

#[test]
fn observations_mode_returns_titled_findings() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("who leads the platform team"),
        Action::Done {
            answer: String::new(),
            fact_ids: Vec::new(),
            model_ids: Vec::new(),
            observations: vec![
                DoneObservation {
                    title: "Leadership".into(),
                    text: "Alice leads the platform team.".into(),
                    fact_ids: vec![FactId::new("f1"), FactId::new("f77")],
                },
                DoneObservation {
                    title: "Hiring".into(),
                    text: "Nothing recent was found.".into(),
                    fact_ids: Vec::new(),
                },
            ],
        },
    ]));
    let engine = engine(team_corpus(), reasoner.clone());

    let request = ReflectRequest {
        output_mode: OutputMode::Observations,
        ..ReflectRequest::new("Who leads the platform team?")
    };
    let resp = engine.reflect(&acme(), &request).unwrap();
    assert_eq!(resp.outcome, LoopOutcome::Done);
    assert_eq!(
        resp.text,
        "## Leadership\nAlice leads the platform team.\n\n## Hiring\nNothing recent was found."
    );
    let observations = resp.observations.as_ref().unwrap();
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].fact_ids, vec![FactId::new("f1")]);
    assert!(observations[1].fact_ids.is_empty());
    assert_eq!(based_on_ids(&resp), vec!["f1"]);
    assert_eq!(resp.dropped_citations[0].id, "f77");

    let offered = reasoner.offered.lock().unwrap();
    assert!(offered[0].contains(&"done"));
}

#[test]
fn answer_mode_has_no_observations() {
    let reasoner = Arc::new(ScriptedReasoner::with_steps(vec![
        recall("who leads the platform team"),
        done("Alice leads the platform team.", &["f1"], &[]),
    ]));
    let engine = engine(team_corpus(), reasoner);
    let resp = engine
        .reflect(&acme(), &ReflectRequest::new("Who leads the platform team?"))
        .unwrap();
    assert!(resp.observations.is_none());
}

#[test]
fn concurrent_learns_of_one_name_share_a_record() {
    let engine = engine(team_corpus(), Arc::new(ScriptedReasoner::new()));
    let gate = Barrier::new(2);

    let (a, b) = thread::scope(|s| {
        let a = s.spawn(|| {
            gate.wait();
            engine
                .learn("acme", "Kubernetes Strategy", "How the team is adopting Kubernetes")
                .unwrap()
        });
        let b = s.spawn(|| {
            gate.wait();
            engine
                .learn("acme", "Kubernetes Strategy", "Cluster ownership and rollout")
                .unwrap()
        });
        (a.join().unwrap(), b.join().unwrap())
    });

    assert_eq!(a.id, "kubernetes-strategy");
    assert_eq!(a, b);
    let learned = engine
        .list_models("acme", &ModelFilter::all().with_subtype(ModelSubtype::Learned))
        .unwrap();
    assert_eq!(learned.len(), 1);
}

#[test]
fn learned_names_cannot_enter_the_pinned_namespace() {
    let engine = engine(team_corpus(), Arc::new(ScriptedReasoner::new()));
    engine
        .create_pinned("acme", "Roadmap", "Upcoming launches", &[])
        .unwrap();

    assert!(engine.learn("acme", "Pinned Roadmap", "Shadow copy").is_err());
    let roadmap = engine.get_model("acme", "pinned-roadmap").unwrap();
    assert_eq!(roadmap.subtype, ModelSubtype::Pinned);
    assert_eq!(roadmap.description, "Upcoming launches");
}
