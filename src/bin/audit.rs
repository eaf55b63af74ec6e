use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use commentary::audit::Auditor;
use commentary::bible::BibleStore;
use commentary::books;
use commentary::config::AppConfig;
use commentary::db::Database;

#[derive(Parser, Debug)]
#[command(name = "audit")]
#[command(about = "Re-validate stored insights against the Bible database")]
struct Cli {
    /// Book name, abbreviation or id (1-66)
    #[arg(long, default_value = "John")]
    book: String,
    /// Comma separated chapters; defaults to every chapter with insights
    #[arg(long, value_delimiter = ',')]
    chapters: Option<Vec<u32>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let book_id = books::resolve_book(&cli.book)
        .ok_or_else(|| anyhow::anyhow!("unknown book: {}", cli.book))?;
    if !config.commentary_db_path.exists() {
        anyhow::bail!(
            "commentary database not found at {}; run the commentary generator first",
            config.commentary_db_path.display()
        );
    }

    let bible = BibleStore::open(&config).await?;
    let commentary = Database::new(&config).await?;
    let auditor = Auditor::new(bible, commentary);

    let report = auditor.audit_book(book_id, cli.chapters).await?;
    if report.checked == 0 {
        println!("No insights found to validate.");
        return Ok(());
    }

    println!("{}", report.summary());
    if !report.errors.is_empty() {
        anyhow::bail!("{} insights failed validation", report.errors.len());
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
