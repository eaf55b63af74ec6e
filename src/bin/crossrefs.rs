use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commentary::bible::BibleStore;
use commentary::books;
use commentary::config::AppConfig;
use commentary::crossref::{CrossRefGenerator, CrossRefSettings};
use commentary::db::Database;
use commentary::models::RunSummary;
use commentary::producer::OpenAiClient;
use commentary::retry::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "crossrefs")]
#[command(about = "Generate explanations for diversified cross-references")]
struct Cli {
    /// Book name, abbreviation or id (1-66)
    #[arg(long, default_value = "John")]
    book: String,
    #[arg(long)]
    chapter: Option<u32>,
    /// Requires --chapter
    #[arg(long, requires = "chapter")]
    verse: Option<u32>,
    #[arg(long, conflicts_with = "chapter")]
    start_chapter: Option<u32>,
    #[arg(long, conflicts_with = "chapter")]
    end_chapter: Option<u32>,
    /// Select targets and log what would be written, without API calls
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let book_id = books::resolve_book(&cli.book)
        .ok_or_else(|| anyhow::anyhow!("unknown book: {}", cli.book))?;

    let bible = BibleStore::open(&config).await?;
    let settings = CrossRefSettings::from_config(&config);
    let generator = if cli.dry_run {
        CrossRefGenerator::dry_run(bible, settings)
    } else {
        let api_key = config.require_api_key()?;
        let producer = OpenAiClient::from_config(&config.producer, api_key)?;
        let sink = Database::new(&config).await?;
        CrossRefGenerator::new(bible, sink, Arc::new(producer), settings)
    };
    let mut generator = generator.with_shutdown(Shutdown::on_ctrl_c());

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    tracing::info!(%run_id, book = %cli.book, dry_run = cli.dry_run, "cross-reference run started");

    let stats = match (cli.chapter, cli.verse) {
        (Some(chapter), Some(verse)) => generator.process_verse(book_id, chapter, verse).await?,
        (Some(chapter), None) => generator.process_chapter(book_id, chapter).await?,
        _ => {
            generator
                .process_book(book_id, cli.start_chapter, cli.end_chapter)
                .await?
        }
    };

    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        stats,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
