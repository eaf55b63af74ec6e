use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commentary::bible::BibleStore;
use commentary::books;
use commentary::commentary::{CommentaryGenerator, CommentarySettings};
use commentary::config::AppConfig;
use commentary::db::Database;
use commentary::models::RunSummary;
use commentary::producer::OpenAiClient;
use commentary::retry::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "commentary")]
#[command(about = "Generate validated margin insights for Scripture verses")]
struct Cli {
    /// Book name, abbreviation or id (1-66)
    #[arg(long, default_value = "John")]
    book: String,
    #[arg(long)]
    chapter: Option<u32>,
    #[arg(long, requires = "chapter")]
    verse: Option<u32>,
    #[arg(long, conflicts_with = "chapter")]
    start_chapter: Option<u32>,
    #[arg(long, conflicts_with = "chapter")]
    end_chapter: Option<u32>,
    /// Call the producer and validate, but do not write to the database
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
    let api_key = config.require_api_key()?;

    let bible = BibleStore::open(&config).await?;
    let producer = OpenAiClient::from_config(&config.producer, api_key)?;
    let sink = if cli.dry_run {
        None
    } else {
        Some(Database::new(&config).await?)
    };

    let mut generator = CommentaryGenerator::new(
        bible,
        sink.clone(),
        Arc::new(producer),
        CommentarySettings::from_config(&config),
    )
    .with_shutdown(Shutdown::on_ctrl_c());

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    tracing::info!(%run_id, book = %cli.book, model = %config.producer.model, "commentary run started");

    let stats = match cli.chapter {
        Some(chapter) => {
            generator
                .process_chapter(book_id, chapter, cli.verse)
                .await?
        }
        None => {
            generator
                .process_book(book_id, cli.start_chapter, cli.end_chapter)
                .await?
        }
    };

    if let Some(sink) = &sink {
        tracing::info!(total = sink.count_insights().await?, "insights in database");
    }

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
