use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fof_core::Profile;
use fof_extract::{ChatModelConfig, ExtractSource, Extractor, OpenAiChatModel};
use fof_match::MatchEngine;
use fof_storage::OpportunityStore;
use fof_sync::{build_fetcher, open_store, SyncConfig, SyncPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fof")]
#[command(about = "Funding Opportunity Finder command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl every enabled source in sources.yaml once.
    Sync,
    /// Upsert a curated YAML list.
    SyncCurated {
        path: PathBuf,
        /// Overrides the tier named in the list.
        #[arg(long)]
        tier: Option<String>,
    },
    /// Extract one opportunity from free text or a page.
    Extract(ExtractArgs),
    /// Rank stored opportunities for a student profile.
    Match(MatchArgs),
    /// Run the cron scheduler until interrupted.
    Schedule,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct ExtractArgs {
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    url: Option<String>,
    /// Read the text from a file.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MatchArgs {
    /// JSON profile; flags below override its fields.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long)]
    county: Option<String>,
    #[arg(long)]
    constituency: Option<String>,
    #[arg(long)]
    level: Option<String>,
    #[arg(long = "interest")]
    interests: Vec<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = SyncPipeline::from_config(config).await?.run_once().await?;
            let total = summary.total();
            println!(
                "sync complete: run_id={} sources={} finalized={} synced={} near_duplicates={} errors={} reports={}",
                summary.run_id,
                summary.enabled_sources,
                summary.finalized,
                total.inserted_or_updated_count,
                summary.near_duplicates,
                summary.errors.len() + total.errors.len(),
                summary.reports_dir
            );
        }
        Commands::SyncCurated { path, tier } => {
            let pipeline = SyncPipeline::from_config(config).await?;
            let outcome = pipeline.sync_curated(&path, tier.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Extract(args) => {
            let source = match (args.text, args.url, args.file) {
                (Some(text), _, _) => ExtractSource::Text(text),
                (_, Some(url), _) => ExtractSource::Url(url),
                (_, _, Some(file)) => ExtractSource::Text(
                    tokio::fs::read_to_string(&file)
                        .await
                        .with_context(|| format!("reading {}", file.display()))?,
                ),
                _ => bail!("one of --text, --url or --file is required"),
            };
            let report = build_extractor(&config)?.extract_and_validate(source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Match(args) => {
            let profile = load_profile(&args).await?;
            let store: Arc<dyn OpportunityStore> = open_store(&config).await?;
            let records: Vec<_> = store
                .list()
                .await?
                .into_iter()
                .map(|stored| stored.record)
                .collect();
            let mut ranked = MatchEngine::default().match_opportunities(&profile, &records);
            ranked.truncate(args.limit);
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        }
        Commands::Schedule => {
            let pipeline = Arc::new(SyncPipeline::from_config(config).await?);
            let Some(sched) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler disabled; set FOF_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(
                cron_1 = %pipeline.config().sync_cron_1,
                cron_2 = %pipeline.config().sync_cron_2,
                "scheduler running"
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
        }
    }

    Ok(())
}

fn build_extractor(config: &SyncConfig) -> Result<Extractor> {
    let fetcher = Arc::new(build_fetcher(config)?);
    let defaults = ChatModelConfig::default();
    let model = OpenAiChatModel::new(
        fetcher.client().clone(),
        ChatModelConfig {
            api_url: config.llm_api_url.clone().unwrap_or(defaults.api_url),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone().unwrap_or(defaults.model),
            timeout: defaults.timeout,
        },
    );
    Ok(Extractor::new(Arc::new(model), fetcher).with_fetch_timeout(config.http_timeout()))
}

async fn load_profile(args: &MatchArgs) -> Result<Profile> {
    let mut profile = match &args.profile {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Profile::default(),
    };
    if args.county.is_some() {
        profile.county = args.county.clone();
    }
    if args.constituency.is_some() {
        profile.constituency = args.constituency.clone();
    }
    if args.level.is_some() {
        profile.academic_level = args.level.clone();
    }
    if !args.interests.is_empty() {
        profile.interests = args.interests.clone();
    }
    Ok(profile)
}
