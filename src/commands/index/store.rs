use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::semantic::SemanticModelConfig;
use crate::util::now_utc_string;

use super::types::{ExistingEmbeddingRow, IndexedChunk, PendingChunk};

pub(super) fn ensure_model_entry(
    connection: &Connection,
    model: &SemanticModelConfig,
) -> Result<()> {
    let created_at = now_utc_string();
    let config_json = serde_json::json!({
        "model_id": model.model_id,
        "model_name": model.model_name,
        "dimensions": model.dimensions,
        "normalization": model.normalization,
        "backend": model.backend,
    })
    .to_string();

    connection.execute(
        "
        INSERT INTO embedding_models(model_id, backend, model_name, dimensions, normalize, created_at, config_json)
        VALUES(?1, ?2, ?3, ?4, 1, ?5, ?6)
        ON CONFLICT(model_id) DO UPDATE SET
          backend=excluded.backend,
          model_name=excluded.model_name,
          dimensions=excluded.dimensions,
          normalize=excluded.normalize,
          config_json=excluded.config_json
        ",
        params![
            model.model_id,
            model.backend,
            model.model_name,
            model.dimensions as i64,
            created_at,
            config_json,
        ],
    )?;

    Ok(())
}

pub(super) fn load_existing_embedding(
    connection: &Connection,
    chunk_id: &str,
    model_id: &str,
) -> Result<Option<ExistingEmbeddingRow>> {
    let row = connection
        .query_row(
            "
            SELECT text_hash, embedding_dim
            FROM chunk_embeddings
            WHERE chunk_id = ?1 AND model_id = ?2
            LIMIT 1
            ",
            params![chunk_id, model_id],
            |row| {
                Ok(ExistingEmbeddingRow {
                    text_hash: row.get(0)?,
                    embedding_dim: row.get::<_, i64>(1)? as usize,
                })
            },
        )
        .optional()?;

    Ok(row)
}

fn upsert_chunk(connection: &Connection, chunk: &IndexedChunk, indexed_at: &str) -> Result<()> {
    connection.execute(
        "
        INSERT INTO chunks(chunk_id, source_url, source_title, effective_date, jurisdiction, asset_category, document_category, text, checksum, indexed_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(chunk_id) DO UPDATE SET
          source_url=excluded.source_url,
          source_title=excluded.source_title,
          effective_date=excluded.effective_date,
          jurisdiction=excluded.jurisdiction,
          asset_category=excluded.asset_category,
          document_category=excluded.document_category,
          text=excluded.text,
          indexed_at=excluded.indexed_at
        ",
        params![
            chunk.checksum,
            chunk.source_url,
            chunk.source_title,
            chunk
                .effective_date
                .map(|value| value.format("%Y-%m-%d").to_string()),
            chunk.jurisdiction,
            chunk.asset_category,
            chunk.document_category,
            chunk.text,
            chunk.checksum,
            indexed_at,
        ],
    )?;

    Ok(())
}

fn upsert_chunk_embedding(
    connection: &Connection,
    chunk_id: &str,
    model_id: &str,
    embedding_blob: &[u8],
    embedding_dim: usize,
    text_hash: &str,
) -> Result<()> {
    connection.execute(
        "
        INSERT INTO chunk_embeddings(chunk_id, model_id, embedding, embedding_dim, text_hash, generated_at)
        VALUES(?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(chunk_id, model_id) DO UPDATE SET
          embedding=excluded.embedding,
          embedding_dim=excluded.embedding_dim,
          text_hash=excluded.text_hash,
          generated_at=excluded.generated_at
        ",
        params![
            chunk_id,
            model_id,
            embedding_blob,
            embedding_dim as i64,
            text_hash,
            now_utc_string(),
        ],
    )?;

    Ok(())
}

pub(super) fn flush_index_batch(
    connection: &mut Connection,
    model: &SemanticModelConfig,
    pending: &mut Vec<PendingChunk>,
) -> Result<usize> {
    if pending.is_empty() {
        return Ok(0);
    }

    let indexed_at = now_utc_string();
    let tx = connection.transaction()?;
    let mut embedded = 0usize;
    for entry in pending.drain(..) {
        upsert_chunk(&tx, &entry.chunk, &indexed_at)?;
        if let Some(embedding_blob) = &entry.embedding_blob {
            upsert_chunk_embedding(
                &tx,
                &entry.chunk.checksum,
                &model.model_id,
                embedding_blob,
                model.dimensions,
                &entry.chunk.checksum,
            )?;
            embedded += 1;
        }
    }
    tx.commit()?;

    Ok(embedded)
}
