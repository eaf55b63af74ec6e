use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub commentary_prompt_version: String,
    pub crossref_prompt_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionConfig {
    pub min_count: usize,
    pub max_count: usize,
    pub max_per_target_book: usize,
    pub adjacency_threshold: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_count: 5,
            max_count: 7,
            max_per_target_book: 2,
            adjacency_threshold: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Pause after every producer call, successful or not.
    pub request_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            request_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub bible_db_path: PathBuf,
    pub commentary_db_path: PathBuf,
    pub translation_id: String,
    pub context_window: u32,
    pub producer: ProducerConfig,
    pub selection: SelectionConfig,
    pub retry: RetryConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("COMMENTARY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let selection_defaults = SelectionConfig::default();
        let retry_defaults = RetryConfig::default();

        Self {
            bible_db_path: env::var("BIBLE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("BibleData.sqlite")),
            commentary_db_path: env::var("COMMENTARY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("CommentaryData.sqlite")),
            data_dir,
            translation_id: env::var("TRANSLATION_ID").unwrap_or_else(|_| "kjv".to_string()),
            context_window: env_parse("CONTEXT_WINDOW").unwrap_or(2),
            producer: ProducerConfig {
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                model: env::var("GENERATION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                commentary_prompt_version: env::var("COMMENTARY_PROMPT_VERSION")
                    .unwrap_or_else(|_| "v1.0".to_string()),
                crossref_prompt_version: env::var("CROSSREF_PROMPT_VERSION")
                    .unwrap_or_else(|_| "v1.2".to_string()),
            },
            selection: SelectionConfig {
                min_count: env_parse("MIN_CROSSREFS").unwrap_or(selection_defaults.min_count),
                max_count: env_parse("MAX_CROSSREFS").unwrap_or(selection_defaults.max_count),
                max_per_target_book: env_parse("MAX_PER_BOOK")
                    .unwrap_or(selection_defaults.max_per_target_book),
                adjacency_threshold: env_parse("ADJACENCY_THRESHOLD")
                    .unwrap_or(selection_defaults.adjacency_threshold),
            },
            retry: RetryConfig {
                max_retries: env_parse("MAX_RETRIES").unwrap_or(retry_defaults.max_retries),
                base_delay: env_parse("RETRY_BASE_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.base_delay),
                request_interval: env_parse("REQUEST_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.request_interval),
            },
        }
    }

    /// Fails fast when generation is requested without credentials.
    pub fn require_api_key(&self) -> Result<&str> {
        self.producer
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))
    }

    pub fn require_bible_db(&self) -> Result<()> {
        if !self.bible_db_path.exists() {
            anyhow::bail!(
                "Bible database not found at {}",
                self.bible_db_path.display()
            );
        }
        Ok(())
    }

    pub fn bible_dsn(&self) -> String {
        format!("sqlite://{}", self.bible_db_path.display())
    }

    pub fn commentary_dsn(&self) -> String {
        format!("sqlite://{}", self.commentary_db_path.display())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
