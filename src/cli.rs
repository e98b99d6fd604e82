use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::semantic::DEFAULT_MODEL_ID;

pub const INDEX_DB_FILE_NAME: &str = "gridcite_index.sqlite";

#[derive(Parser, Debug)]
#[command(
    name = "gridcite",
    version,
    about = "Cited answers to Chinese energy-regulation questions from trusted government sources"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Query(QueryArgs),
    Index(IndexArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, default_value = ".cache/gridcite")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub question: String,

    /// Province code (`gd`), Chinese name (`广东`), or `national`.
    #[arg(long)]
    pub jurisdiction: Option<String>,

    #[arg(long = "asset")]
    pub asset_category: Option<String>,

    #[arg(long = "category")]
    pub document_category: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long)]
    pub target_budget_ms: Option<u64>,

    #[arg(long)]
    pub hard_budget_ms: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IndexRefreshMode {
    Full,
    MissingOrStale,
}

impl IndexRefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MissingOrStale => "missing-or-stale",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/gridcite")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// JSON-lines file of extracted chunk records.
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    #[arg(long, value_enum, default_value_t = IndexRefreshMode::MissingOrStale)]
    pub refresh_mode: IndexRefreshMode,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/gridcite")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,
}

pub fn resolve_db_path(cache_root: &Path, db_path: Option<&Path>) -> PathBuf {
    db_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cache_root.join(INDEX_DB_FILE_NAME))
}
