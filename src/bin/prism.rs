//! `prism` — the pipeline CLI.
//!
//! Exit codes: 0 success, 2 configuration error (missing env var, file not
//! found), 1 uncaught runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism_devrel::api::{create_router, AppState};
use prism_devrel::config::AppConfig;
use prism_devrel::court::orchestrator::CourtOrchestrator;
use prism_devrel::court::runner::{AgentRunner, HeuristicAgentRunner, LlmAgentRunner};
use prism_devrel::embeddings::embedder_from_config;
use prism_devrel::error::{PrismError, PrismResult};
use prism_devrel::github::{IngestOptions, Ingester, RawArchive};
use prism_devrel::insights::{build_insights, write_insights, ActivityWeights};
use prism_devrel::kb::builder::{build_documents, embed_pending, load_projected_views, upsert_documents};
use prism_devrel::kb::retrieval::{Retriever, SearchMode};
use prism_devrel::lessons::LessonService;
use prism_devrel::llm::{LlmClient, ModelSelector};
use prism_devrel::projector::export::export_views;
use prism_devrel::projector::{project_archive, ProjectorOptions};
use prism_devrel::prompts::PromptRegistry;
use prism_devrel::redaction::{load_redaction_policy, RedactionPolicy, Redactor};
use prism_devrel::storage::migrate::run_migrations;
use prism_devrel::storage::{CourtStore, PgCourtStore};

#[derive(Parser)]
#[command(name = "prism", about = "DevRel retrospective pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending SQL migrations.
    Migrate {
        #[arg(long, default_value = "migrations")]
        migrations_dir: PathBuf,
    },
    /// Discover and hydrate closed items into the raw archive.
    Ingest {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// closedAt window start, YYYY-MM-DD (UTC).
        #[arg(long)]
        start: String,
        /// closedAt window end, YYYY-MM-DD (UTC).
        #[arg(long)]
        end: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 100)]
        per_page: u32,
        /// If > 0, limit the number of items hydrated (smoke runs).
        #[arg(long, default_value_t = 0)]
        max_items: usize,
        /// Discovery only; skip hydration (no token required).
        #[arg(long)]
        no_hydrate: bool,
    },
    /// Project the raw archive into relational views and CSV exports.
    Project {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = "out_views")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 280)]
        max_body_chars: usize,
        #[arg(long, default_value_t = 800)]
        max_item_body_chars: usize,
        /// Also load the views into the repo_* tables.
        #[arg(long)]
        load_db: bool,
    },
    /// Build the contributor insight report from a raw archive.
    Insights {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long, default_value = "out_insights")]
        out_dir: PathBuf,
    },
    /// Build kb_document rows from the raw archive.
    BuildKb {
        #[arg(long)]
        archive: PathBuf,
    },
    /// Embed pending kb_document rows.
    EmbedKb {
        #[arg(long, default_value_t = 64)]
        batch_size: usize,
    },
    /// Query the knowledge base.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, value_parser = parse_mode, default_value = "hybrid")]
        mode: SearchMode,
    },
    /// Run one court pass over a case.
    CourtRun {
        #[arg(long)]
        case_id: uuid::Uuid,
        #[arg(long, default_value = "unspecified")]
        model: String,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: String,
    },
}

fn parse_mode(raw: &str) -> Result<SearchMode, String> {
    match raw {
        "keyword" => Ok(SearchMode::Keyword),
        "vector" => Ok(SearchMode::Vector),
        "hybrid" => Ok(SearchMode::Hybrid),
        other => Err(format!("unknown search mode: {other}")),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism_devrel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_redactor(config: &AppConfig) -> PrismResult<Arc<Redactor>> {
    let policy = if config.redaction_policy_path.is_file() {
        load_redaction_policy(&config.redaction_policy_path)?
    } else {
        RedactionPolicy::builtin()
    };
    Ok(Arc::new(Redactor::new(policy)?))
}

async fn connect(config: &AppConfig) -> PrismResult<sqlx::PgPool> {
    let url = config.require_database_url()?;
    Ok(sqlx::PgPool::connect(url).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(command: Command, config: AppConfig) -> PrismResult<()> {
    match command {
        Command::Migrate { migrations_dir } => {
            let pool = connect(&config).await?;
            let applied = run_migrations(&pool, &migrations_dir).await?;
            println!("Applied {applied} migration(s).");
        }

        Command::Ingest {
            owner,
            repo,
            start,
            end,
            out,
            per_page,
            max_items,
            no_hydrate,
        } => {
            let token = if no_hydrate {
                config.github_token.clone()
            } else {
                Some(config.require_github_token()?.to_string())
            };
            let ingester = Ingester::new(token)?;
            let archive = RawArchive::new(&out);
            let summary = ingester
                .run(
                    &IngestOptions {
                        owner,
                        repo,
                        start,
                        end,
                        per_page,
                        max_items,
                        hydrate: !no_hydrate,
                    },
                    &archive,
                )
                .await?;
            println!(
                "Discovered {} PR(s), {} issue(s); hydrated {} item(s).",
                summary.pr_count, summary.issue_count, summary.hydrated_item_count
            );
        }

        Command::Project {
            archive,
            out_dir,
            max_body_chars,
            max_item_body_chars,
            load_db,
        } => {
            let archive = RawArchive::new(&archive);
            let views = project_archive(
                &archive,
                &ProjectorOptions {
                    max_body_chars,
                    max_item_body_chars,
                },
            )?;
            export_views(&views, &out_dir)?;
            println!(
                "Projected {} work item(s), {} event(s), {} comment(s), {} review(s).",
                views.work_items.len(),
                views.events.len(),
                views.comments.len(),
                views.reviews.len()
            );
            if load_db {
                let pool = connect(&config).await?;
                load_projected_views(&pool, &views).await?;
                println!("Loaded views into the database.");
            }
        }

        Command::Insights { archive, out_dir } => {
            let archive = RawArchive::new(&archive);
            let views = project_archive(&archive, &ProjectorOptions::default())?;
            let report = build_insights(&views, &ActivityWeights::default());
            write_insights(&report, &out_dir)?;
            println!(
                "Wrote insights for {} contributor(s) to {}.",
                report.contributors.len(),
                out_dir.display()
            );
        }

        Command::BuildKb { archive } => {
            let pool = connect(&config).await?;
            let archive = RawArchive::new(&archive);
            let views = project_archive(&archive, &ProjectorOptions::default())?;
            load_projected_views(&pool, &views).await?;
            let documents = build_documents(&views);
            let count = upsert_documents(&pool, &documents).await?;
            println!("Upserted {count} kb_document row(s).");
        }

        Command::EmbedKb { batch_size } => {
            let pool = connect(&config).await?;
            let embedder = embedder_from_config(&config)?;
            let embedded = embed_pending(&pool, embedder.as_ref(), batch_size).await?;
            println!(
                "Embedded {embedded} document(s) for model={}.",
                embedder.model()
            );
        }

        Command::Search {
            query,
            limit,
            repo,
            mode,
        } => {
            let pool = connect(&config).await?;
            let embedder: Arc<dyn prism_devrel::embeddings::Embedder> =
                Arc::from(embedder_from_config(&config)?);
            let retriever = Retriever::new(pool, embedder);
            let results = retriever.search(mode, &query, limit, repo.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Command::CourtRun { case_id, model } => {
            let pool = connect(&config).await?;
            let redactor = build_redactor(&config)?;
            let embedder: Arc<dyn prism_devrel::embeddings::Embedder> =
                Arc::from(embedder_from_config(&config)?);
            let store: Arc<dyn CourtStore> =
                Arc::new(PgCourtStore::new(pool, redactor.clone()));
            let lessons = Arc::new(LessonService::new(
                store.clone(),
                embedder,
                redactor.clone(),
            ));
            let runner: Arc<dyn AgentRunner> = match &config.openai_api_key {
                Some(key) => Arc::new(LlmAgentRunner::new(
                    LlmClient::new(key.clone(), ModelSelector::from_env())?,
                    PromptRegistry::new(store.clone()),
                )),
                None => Arc::new(HeuristicAgentRunner),
            };
            let orchestrator = CourtOrchestrator::new(store, runner, redactor, lessons);
            let summary = orchestrator.run_case(case_id, &model).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Serve { bind } => {
            let pool = connect(&config).await?;
            run_migrations(&pool, std::path::Path::new("migrations")).await?;
            let state = AppState::from_config(config, pool).await?;
            let router = create_router(state);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            tracing::info!(%bind, "serving HTTP API");
            axum::serve(listener, router).await?;
        }
    }
    Ok(())
}
