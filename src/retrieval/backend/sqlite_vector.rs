use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;

use crate::error::BackendError;
use crate::model::{BackendName, RetrievedChunk};
use crate::semantic::{SemanticModelConfig, cosine_similarity, decode_embedding_blob};

use super::{SearchFilters, VectorSearch};

pub fn open_index_connection(db_path: &Path, writable: bool) -> Result<Connection> {
    let flags = if writable {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };

    let connection = Connection::open_with_flags(db_path, flags)
        .with_context(|| format!("failed to open vector index {}", db_path.display()))?;

    if writable {
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for vector index")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL for vector index")?;
    }

    Ok(connection)
}

pub fn ensure_index_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS embedding_models (
              model_id TEXT PRIMARY KEY,
              backend TEXT NOT NULL,
              model_name TEXT NOT NULL,
              dimensions INTEGER NOT NULL,
              normalize INTEGER NOT NULL,
              created_at TEXT NOT NULL,
              config_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
              chunk_id TEXT PRIMARY KEY,
              source_url TEXT NOT NULL,
              source_title TEXT NOT NULL DEFAULT '',
              effective_date TEXT,
              jurisdiction TEXT NOT NULL DEFAULT '',
              asset_category TEXT NOT NULL DEFAULT '',
              document_category TEXT NOT NULL DEFAULT '',
              text TEXT NOT NULL,
              checksum TEXT NOT NULL,
              indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunk_embeddings (
              chunk_id TEXT NOT NULL REFERENCES chunks(chunk_id) ON DELETE CASCADE,
              model_id TEXT NOT NULL REFERENCES embedding_models(model_id),
              embedding BLOB NOT NULL,
              embedding_dim INTEGER NOT NULL,
              text_hash TEXT NOT NULL,
              generated_at TEXT NOT NULL,
              PRIMARY KEY(chunk_id, model_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_scope
              ON chunks(jurisdiction, asset_category, document_category);
            CREATE INDEX IF NOT EXISTS idx_chunk_embeddings_model
              ON chunk_embeddings(model_id);
            ",
        )
        .context("failed to create vector index schema")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatus {
    pub available: bool,
    pub reason: Option<String>,
    pub chunk_count: i64,
    pub embedding_count: i64,
}

pub fn index_status(connection: &Connection, model_id: &str) -> Result<IndexStatus> {
    let embeddings_table_exists = connection
        .query_row(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'table' AND name = 'chunk_embeddings'
            LIMIT 1
            ",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .is_some();

    if !embeddings_table_exists {
        return Ok(IndexStatus {
            available: false,
            reason: Some("chunk_embeddings table is missing; run the index command".to_string()),
            chunk_count: 0,
            embedding_count: 0,
        });
    }

    let chunk_count: i64 =
        connection.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

    let model_exists = connection
        .query_row(
            "SELECT 1 FROM embedding_models WHERE model_id = ?1 LIMIT 1",
            [model_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !model_exists {
        return Ok(IndexStatus {
            available: false,
            reason: Some(format!("embedding model '{model_id}' is not registered")),
            chunk_count,
            embedding_count: 0,
        });
    }

    let embedding_count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM chunk_embeddings WHERE model_id = ?1",
        [model_id],
        |row| row.get(0),
    )?;

    if embedding_count <= 0 {
        return Ok(IndexStatus {
            available: false,
            reason: Some(format!("vector index is empty for model '{model_id}'")),
            chunk_count,
            embedding_count,
        });
    }

    Ok(IndexStatus {
        available: true,
        reason: None,
        chunk_count,
        embedding_count,
    })
}

/// Cosine search over the local SQLite index. Chunks tagged `national`, or
/// left untagged, match every jurisdiction filter.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    db_path: PathBuf,
    model: SemanticModelConfig,
    min_score: f64,
}

impl SqliteVectorIndex {
    pub fn new(db_path: PathBuf, model: SemanticModelConfig, min_score: f64) -> Self {
        Self {
            db_path,
            model,
            min_score,
        }
    }
}

#[async_trait]
impl VectorSearch for SqliteVectorIndex {
    async fn search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        let db_path = self.db_path.clone();
        let model = self.model.clone();
        let min_score = self.min_score;
        let query_vector = query_vector.to_vec();
        let filters = filters.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let connection = open_index_connection(&db_path, false)?;
            collect_vector_candidates(
                &connection,
                &query_vector,
                &filters,
                &model,
                min_score,
                top_k,
            )
        })
        .await;

        match joined {
            Ok(Ok(chunks)) => Ok(chunks),
            Ok(Err(error)) => Err(BackendError::Index {
                backend: BackendName::VectorSearch,
                message: format!("{error:#}"),
            }),
            Err(error) => Err(BackendError::Index {
                backend: BackendName::VectorSearch,
                message: format!("vector scan task failed: {error}"),
            }),
        }
    }
}

fn collect_vector_candidates(
    connection: &Connection,
    query_vector: &[f32],
    filters: &SearchFilters,
    model: &SemanticModelConfig,
    min_score: f64,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>> {
    if top_k == 0 || query_vector.len() != model.dimensions {
        return Ok(Vec::new());
    }

    let mut statement = connection.prepare(
        "
        SELECT
          c.text,
          c.source_url,
          c.source_title,
          c.effective_date,
          c.jurisdiction,
          c.asset_category,
          c.checksum,
          ce.embedding,
          ce.embedding_dim
        FROM chunk_embeddings ce
        JOIN chunks c ON c.chunk_id = ce.chunk_id
        WHERE
          ce.model_id = ?1
          AND (?2 IS NULL OR c.jurisdiction IN (?2, 'national', ''))
          AND (?3 IS NULL OR c.asset_category IN (?3, ''))
          AND (?4 IS NULL OR c.document_category = ?4)
        ",
    )?;

    let mut rows = statement.query(params![
        model.model_id,
        filters.jurisdiction.map(|value| value.code()),
        filters.asset_category.map(|value| value.as_str()),
        filters.document_category.filter_value(),
    ])?;

    let mut scored = Vec::<(f64, RetrievedChunk)>::new();
    let mut scanned_rows = 0usize;
    while let Some(row) = rows.next()? {
        scanned_rows += 1;
        let row_dim = row.get::<_, i64>(8)? as usize;
        if row_dim != model.dimensions {
            continue;
        }

        let embedding_blob = row.get::<_, Vec<u8>>(7)?;
        let Some(candidate_embedding) = decode_embedding_blob(&embedding_blob, model.dimensions)
        else {
            continue;
        };

        let score = cosine_similarity(query_vector, &candidate_embedding);
        if score < min_score {
            continue;
        }

        let effective_date = row
            .get::<_, Option<String>>(3)?
            .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok());

        scored.push((
            score,
            RetrievedChunk {
                text: row.get(0)?,
                source_url: row.get(1)?,
                source_title: row.get(2)?,
                effective_date,
                jurisdiction: row.get(4)?,
                asset_category: row.get(5)?,
                checksum: row.get(6)?,
            },
        ));
    }

    scored.sort_by(|left, right| {
        right
            .0
            .total_cmp(&left.0)
            .then_with(|| left.1.checksum.cmp(&right.1.checksum))
    });
    scored.truncate(top_k);

    debug!(
        scanned_rows,
        returned = scored.len(),
        model_id = %model.model_id,
        "vector scan finished"
    );

    Ok(scored.into_iter().map(|(_, chunk)| chunk).collect())
}
