use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::archive::DEFAULT_BUCKET;
use crate::semantic::DEFAULT_MODEL_ID;

pub const DEFAULT_PISOS_SEEDS: &[&str] = &["https://www.pisos.com/venta/pisos-torremolinos/"];
pub const DEFAULT_SOLVIA_SEEDS: &[&str] = &[
    "https://www.solvia.es/es/comprar/viviendas?texto=29620&palabraClave=true",
    "https://www.solvia.es/es/comprar/viviendas?texto=29006&palabraClave=true",
];

#[derive(Parser, Debug)]
#[command(
    name = "realestate-ingest",
    version,
    about = "Scrape property listings, embed them and reconcile them into a local store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Scrape(ScrapeArgs),
    Load(LoadArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    #[arg(long = "pisos-url", env = "REALESTATE_PISOS_URLS", value_delimiter = ',')]
    pub pisos_urls: Vec<String>,

    #[arg(long = "solvia-url", env = "REALESTATE_SOLVIA_URLS", value_delimiter = ',')]
    pub solvia_urls: Vec<String>,

    #[arg(long, env = "REALESTATE_PAGE_TIMEOUT_SECS", default_value_t = 60)]
    pub page_timeout_secs: u64,

    #[arg(long, env = "REALESTATE_SEED_TIMEOUT_SECS", default_value_t = 600)]
    pub seed_timeout_secs: u64,

    #[arg(long, env = "REALESTATE_MAX_PAGES", default_value_t = 50)]
    pub max_pages: usize,
}

impl SourceArgs {
    pub fn pisos_seeds(&self) -> Vec<String> {
        seeds_or_default(&self.pisos_urls, DEFAULT_PISOS_SEEDS)
    }

    pub fn solvia_seeds(&self) -> Vec<String> {
        seeds_or_default(&self.solvia_urls, DEFAULT_SOLVIA_SEEDS)
    }
}

fn seeds_or_default(given: &[String], defaults: &[&str]) -> Vec<String> {
    if given.is_empty() {
        defaults.iter().map(|seed| seed.to_string()).collect()
    } else {
        given.to_vec()
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    #[arg(long, env = "REALESTATE_DB_PATH", default_value = ".cache/realestate/listings.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, env = "REALESTATE_ARCHIVE_ROOT", default_value = ".cache/realestate/archive")]
    pub archive_root: PathBuf,

    #[arg(long, env = "REALESTATE_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    #[arg(long, env = "REALESTATE_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, env = "REALESTATE_BATCH_SIZE", default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, env = "REALESTATE_RETRIES", default_value_t = 1)]
    pub retries: u32,

    #[arg(long, env = "REALESTATE_RETRY_DELAY_SECS", default_value_t = 5)]
    pub retry_delay_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ScrapeArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, env = "REALESTATE_DB_PATH", default_value = ".cache/realestate/listings.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, env = "REALESTATE_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, env = "REALESTATE_BATCH_SIZE", default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, env = "REALESTATE_DB_PATH", default_value = ".cache/realestate/listings.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, env = "REALESTATE_ARCHIVE_ROOT", default_value = ".cache/realestate/archive")]
    pub archive_root: PathBuf,

    #[arg(long, env = "REALESTATE_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    #[arg(long)]
    pub url: Option<String>,
}
