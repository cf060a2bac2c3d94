use clap::{Parser, Subcommand};
use feed_digest::types::FetchConfig;
use feed_digest::{config, ingest, llm, summarizer, Fetcher, Settings, Store};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-digest", about = "Fetch feeds and summarize new items")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch all configured sources and store new items
    Ingest,
    /// Summarize stored items that have not been processed yet
    Summarize,
    /// Ingest, then summarize
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let store = Store::open(&settings.db_path).await?;

    match cli.command {
        Command::Ingest => {
            run_ingest(&store, &settings).await?;
        }
        Command::Summarize => {
            run_summarize(&store, &settings).await?;
        }
        Command::Run => {
            run_ingest(&store, &settings).await?;
            run_summarize(&store, &settings).await?;
        }
    }

    Ok(())
}

async fn run_ingest(store: &Store, settings: &Settings) -> anyhow::Result<()> {
    let sources = config::load_sources(&settings.feeds_path)?;
    let fetcher = Fetcher::new(FetchConfig::default())?;
    ingest::run_ingest(store, &fetcher, &sources, settings).await?;
    Ok(())
}

async fn run_summarize(store: &Store, settings: &Settings) -> anyhow::Result<()> {
    let provider = llm::select_provider()?;
    summarizer::run_summarizer(store, provider.as_ref(), settings).await?;
    Ok(())
}
