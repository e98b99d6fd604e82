use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub(super) const INDEX_DB_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Deserialize)]
pub(super) struct ChunkRecord {
    pub(super) text: String,
    #[serde(alias = "url")]
    pub(super) source_url: String,
    #[serde(default, alias = "title")]
    pub(super) source_title: String,
    #[serde(default)]
    pub(super) effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub(super) jurisdiction: Option<String>,
    #[serde(default)]
    pub(super) asset_category: Option<String>,
    #[serde(default)]
    pub(super) document_category: Option<String>,
    #[serde(default)]
    pub(super) checksum: Option<String>,
}

#[derive(Debug, Clone)]
pub(super) struct IndexedChunk {
    pub(super) text: String,
    pub(super) source_url: String,
    pub(super) source_title: String,
    pub(super) effective_date: Option<NaiveDate>,
    pub(super) jurisdiction: String,
    pub(super) asset_category: String,
    pub(super) document_category: String,
    pub(super) checksum: String,
}

#[derive(Debug, Clone)]
pub(super) struct PendingChunk {
    pub(super) chunk: IndexedChunk,
    pub(super) embedding_blob: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(super) struct ExistingEmbeddingRow {
    pub(super) text_hash: String,
    pub(super) embedding_dim: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct IndexRunManifest {
    pub(super) manifest_version: u32,
    pub(super) run_id: String,
    pub(super) generated_at: String,
    pub(super) input_path: String,
    pub(super) input_sha256: String,
    pub(super) model_id: String,
    pub(super) model_name: String,
    pub(super) embedding_dim: usize,
    pub(super) normalization: String,
    pub(super) backend: String,
    pub(super) db_schema_version: String,
    pub(super) refresh_mode: String,
    pub(super) records_read: usize,
    pub(super) indexed_chunks: usize,
    pub(super) embedded_chunks: usize,
    pub(super) duplicate_records: usize,
    pub(super) skipped_invalid_records: usize,
    pub(super) dated_from_text: usize,
    pub(super) batch_size: usize,
    pub(super) duration_ms: u128,
    pub(super) status: String,
    pub(super) warnings: Vec<String>,
}
