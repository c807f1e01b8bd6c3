//! akh-reflect CLI: mental models and reflection over a fact corpus.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use akh_reflect::agent::{Budget, Disposition, OutputMode};
use akh_reflect::bank::BankProfile;
use akh_reflect::config::ReflectConfig;
use akh_reflect::engine::{Engine, ReflectRequest};
use akh_reflect::facts::{FactCorpus, FactSource};
use akh_reflect::llm::{EntityClassifier, OllamaClient, RuleClassifier};
use akh_reflect::model::{ModelFilter, ModelSubtype, ModelType, TagsMatch};
use akh_reflect::paths::ReflectPaths;
use akh_reflect::refresh::OperationStatus;

#[derive(Parser)]
#[command(name = "akh-reflect", version, about = "Mental models and reflection over a fact corpus")]
struct Cli {
    /// Directory of the durable model store (default: $XDG_DATA_HOME/akh-reflect/store).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep models in memory only; nothing is written to disk.
    #[arg(long, global = true, conflicts_with = "data_dir")]
    in_memory: bool,

    /// Config file (default: $XDG_CONFIG_HOME/akh-reflect/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON file of facts to recall from.
    #[arg(long, global = true)]
    facts: Option<PathBuf>,

    /// Bank id.
    #[arg(long, global = true, default_value = "default")]
    bank: String,

    /// Bank profile TOML (mission, disposition). Overrides --bank.
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Bank mission, overriding the profile's.
    #[arg(long, global = true)]
    mission: Option<String>,

    /// Classify emergent entities with the language model instead of rules.
    #[arg(long, global = true)]
    llm_classifier: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage mental models.
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Re-derive and regenerate the bank's models.
    Refresh {
        /// Print the full report instead of just the operation result state.
        #[arg(long)]
        wait: bool,
    },

    /// Regenerate one model's observations.
    Generate {
        /// Model id.
        id: String,
    },

    /// Answer a query with the full toolset.
    Reflect {
        query: String,

        /// low | mid | high
        #[arg(long, default_value = "mid")]
        budget: Budget,

        #[arg(long)]
        max_tokens: Option<usize>,

        /// Comma-separated visibility tags.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// any | all
        #[arg(long, default_value = "any")]
        tags_match: TagsMatch,

        /// Skepticism, literalism, empathy (1-5 each), e.g. "4,3,2".
        #[arg(long)]
        disposition: Option<String>,

        /// Include tool and reasoner call records.
        #[arg(long)]
        trace: bool,

        /// answer | observations
        #[arg(long, default_value = "answer")]
        output: OutputMode,
    },

    /// Answer a query by browsing models and recalling facts (read-only).
    Research {
        query: String,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// List models in the bank.
    List {
        #[arg(long)]
        subtype: Option<ModelSubtype>,

        #[arg(long = "type")]
        model_type: Option<ModelType>,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long, default_value = "any")]
        tags_match: TagsMatch,
    },
    /// Show one model including observations.
    Get { id: String },
    /// Create a pinned model.
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        description: String,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Delete a model.
    Delete { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration as TOML.
    Show,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn parse_disposition(spec: &str) -> Result<Disposition> {
    let parts: Vec<u8> = spec
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .into_diagnostic()?;
    match parts.as_slice() {
        [s, l, e] => Ok(Disposition::new(*s, *l, *e)?),
        _ => Err(miette::miette!(
            help = "Pass three integers: skepticism,literalism,empathy",
            "malformed disposition \"{spec}\""
        )),
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ReflectConfig::resolve(cli.config.as_deref())?;

    if let Commands::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let mut profile = match &cli.profile {
        Some(path) => BankProfile::load(path)?,
        None => BankProfile::new(cli.bank.clone()),
    };
    if let Some(mission) = &cli.mission {
        profile.mission = Some(mission.clone());
    }
    let bank_id = profile.bank_id.clone();

    let facts: Arc<dyn FactSource> = match &cli.facts {
        Some(path) => Arc::new(FactCorpus::from_json_file(path)?),
        None => Arc::new(FactCorpus::new()),
    };
    let ollama = Arc::new(OllamaClient::new(config.llm.clone()));
    if !matches!(cli.command, Commands::Models { .. }) && !ollama.probe() {
        tracing::warn!(
            url = %config.llm.base_url,
            model = ollama.model(),
            "reasoning backend not reachable; answers and refreshes will degrade"
        );
    }
    let classifier: Arc<dyn EntityClassifier> = if cli.llm_classifier {
        ollama.clone()
    } else {
        Arc::new(RuleClassifier::new())
    };
    let data_dir = match (&cli.data_dir, cli.in_memory) {
        (_, true) => None,
        (Some(dir), false) => Some(dir.clone()),
        (None, false) => Some(ReflectPaths::resolve()?.store_dir()),
    };
    let engine = Engine::open(config, data_dir.as_deref(), facts, ollama, classifier)?;

    match cli.command {
        Commands::Models { action } => match action {
            ModelAction::List {
                subtype,
                model_type,
                tags,
                tags_match,
            } => {
                let filter = ModelFilter {
                    subtype,
                    model_type,
                    tags,
                    tags_match,
                };
                let summaries: Vec<_> = engine
                    .list_models(&bank_id, &filter)?
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "id": m.id,
                            "name": m.name,
                            "type": m.model_type,
                            "subtype": m.subtype,
                            "description": m.description,
                            "observations": m.observations.len(),
                            "last_updated": m.last_updated,
                        })
                    })
                    .collect();
                print_json(&summaries)?;
            }
            ModelAction::Get { id } => print_json(&engine.get_model(&bank_id, &id)?)?,
            ModelAction::Create {
                name,
                description,
                tags,
            } => print_json(&engine.create_pinned(&bank_id, &name, &description, &tags)?)?,
            ModelAction::Delete { id } => {
                engine.delete_model(&bank_id, &id)?;
                print_json(&serde_json::json!({ "deleted": id }))?;
            }
        },

        Commands::Refresh { wait } => {
            let op_id = engine.submit_refresh(&profile)?;
            // The operation lives in this process, so always let it finish.
            let status = engine.wait_operation(&op_id)?;
            if wait {
                print_json(&serde_json::json!({ "operation_id": op_id, "status": status }))?;
            } else {
                let state = match &status {
                    OperationStatus::Completed { .. } => "completed",
                    OperationStatus::Cancelled { .. } => "cancelled",
                    OperationStatus::Failed { .. } => "failed",
                    OperationStatus::Pending | OperationStatus::Running => "running",
                };
                print_json(&serde_json::json!({ "operation_id": op_id, "state": state }))?;
            }
        }

        Commands::Generate { id } => {
            let op_id = engine.submit_generate(&bank_id, &id)?;
            let status = engine.wait_operation(&op_id)?;
            print_json(&serde_json::json!({ "operation_id": op_id, "status": status }))?;
        }

        Commands::Reflect {
            query,
            budget,
            max_tokens,
            tags,
            tags_match,
            disposition,
            trace,
            output,
        } => {
            if let Some(spec) = disposition {
                profile.disposition = parse_disposition(&spec)?;
            }
            let request = ReflectRequest {
                query,
                budget,
                max_tokens,
                tags,
                tags_match,
                include_trace: trace,
                output_mode: output,
            };
            print_json(&engine.reflect(&profile, &request)?)?;
        }

        Commands::Research { query, tags } => {
            print_json(&engine.research(&profile, &query, &tags)?)?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
