pub mod audit;
pub mod bible;
pub mod books;
pub mod commentary;
pub mod config;
pub mod crossref;
pub mod db;
pub mod locator;
pub mod models;
pub mod producer;
pub mod prompts;
pub mod retry;
pub mod selector;
pub mod validation;

pub use config::AppConfig;
