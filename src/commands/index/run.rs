use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{IndexArgs, IndexRefreshMode, resolve_db_path};
use crate::model::{AssetCategory, DocumentCategory, Jurisdiction};
use crate::retrieval::backend::{ensure_index_schema, open_index_connection};
use crate::retrieval::normalize::extract_effective_date;
use crate::retrieval::trust::is_well_formed_source;
use crate::semantic::{embed_text_local, encode_embedding_blob, resolve_model_config};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, sha256_text, utc_compact_string,
    write_json_pretty,
};

use super::store::{ensure_model_entry, flush_index_batch, load_existing_embedding};
use super::types::{
    ChunkRecord, INDEX_DB_SCHEMA_VERSION, IndexRunManifest, IndexedChunk, PendingChunk,
};

pub fn run(args: IndexArgs) -> Result<()> {
    let manifest = execute(&args)?;
    info!(
        run_id = %manifest.run_id,
        model_id = %manifest.model_id,
        records_read = manifest.records_read,
        indexed_chunks = manifest.indexed_chunks,
        embedded_chunks = manifest.embedded_chunks,
        skipped_invalid_records = manifest.skipped_invalid_records,
        "index refresh completed"
    );
    Ok(())
}

fn execute(args: &IndexArgs) -> Result<IndexRunManifest> {
    let batch_size = args.batch_size.max(1);
    let model = resolve_model_config(&args.model_id);
    if !args.input.is_file() {
        bail!("chunk input {} does not exist", args.input.display());
    }

    ensure_directory(&args.cache_root)?;
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_deref());
    let manifest_dir = args.cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let mut connection = open_index_connection(&db_path, true)?;
    ensure_index_schema(&connection)?;
    ensure_model_entry(&connection, &model)?;

    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("index-{}", utc_compact_string(Utc::now()));
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open chunk input {}", args.input.display()))?;

    let mut records_read = 0usize;
    let mut indexed_chunks = 0usize;
    let mut embedded_chunks = 0usize;
    let mut duplicate_records = 0usize;
    let mut skipped_invalid_records = 0usize;
    let mut dated_from_text = 0usize;
    let mut warnings = Vec::<String>::new();
    let mut seen = HashSet::<String>::new();
    let mut pending = Vec::<PendingChunk>::new();

    for (line_index, line) in BufReader::new(input).lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.with_context(|| {
            format!("failed to read line {line_number} of {}", args.input.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }
        records_read += 1;

        let (chunk, date_from_text) = match serde_json::from_str::<ChunkRecord>(&line)
            .map_err(anyhow::Error::from)
            .and_then(prepare_chunk)
        {
            Ok(prepared) => prepared,
            Err(error) => {
                skipped_invalid_records += 1;
                warn!(line = line_number, error = %error, "skipping invalid chunk record");
                warnings.push(format!("line {line_number}: {error}"));
                continue;
            }
        };
        if !seen.insert(chunk.checksum.clone()) {
            duplicate_records += 1;
            continue;
        }
        if date_from_text {
            dated_from_text += 1;
        }
        indexed_chunks += 1;

        let existing = load_existing_embedding(&connection, &chunk.checksum, &model.model_id)?;
        let stale = existing
            .as_ref()
            .map(|value| {
                value.text_hash != chunk.checksum || value.embedding_dim != model.dimensions
            })
            .unwrap_or(true);
        let should_embed = match args.refresh_mode {
            IndexRefreshMode::Full => true,
            IndexRefreshMode::MissingOrStale => stale,
        };
        let embedding_blob = should_embed
            .then(|| encode_embedding_blob(&embed_text_local(&chunk.text, model.dimensions)));
        pending.push(PendingChunk {
            chunk,
            embedding_blob,
        });

        if pending.len() >= batch_size {
            embedded_chunks += flush_index_batch(&mut connection, &model, &mut pending)?;
            info!(
                model_id = %model.model_id,
                indexed_chunks,
                embedded_chunks,
                "index batch committed"
            );
        }
    }
    embedded_chunks += flush_index_batch(&mut connection, &model, &mut pending)?;

    if indexed_chunks == 0 {
        warnings.push("no valid chunk records in input".to_string());
    }

    let manifest = IndexRunManifest {
        manifest_version: 1,
        run_id,
        generated_at: started_at,
        input_path: args.input.display().to_string(),
        input_sha256: sha256_file(&args.input)?,
        model_id: model.model_id.clone(),
        model_name: model.model_name.clone(),
        embedding_dim: model.dimensions,
        normalization: model.normalization.clone(),
        backend: model.backend.clone(),
        db_schema_version: INDEX_DB_SCHEMA_VERSION.to_string(),
        refresh_mode: args.refresh_mode.as_str().to_string(),
        records_read,
        indexed_chunks,
        embedded_chunks,
        duplicate_records,
        skipped_invalid_records,
        dated_from_text,
        batch_size,
        duration_ms: started.elapsed().as_millis(),
        status: "completed".to_string(),
        warnings,
    };

    let manifest_path = manifest_dir.join(format!(
        "index_run_{}.json",
        utc_compact_string(Utc::now())
    ));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "index manifest written");

    Ok(manifest)
}

fn prepare_chunk(record: ChunkRecord) -> Result<(IndexedChunk, bool)> {
    let source_url = record.source_url.trim().to_string();
    if !is_well_formed_source(&source_url) {
        bail!("source_url '{source_url}' is not an http(s) url");
    }
    if record.text.trim().is_empty() {
        bail!("chunk text is empty");
    }

    let jurisdiction = match non_empty(record.jurisdiction.as_deref()) {
        Some(value) => value.parse::<Jurisdiction>()?.code().to_string(),
        None => String::new(),
    };
    let asset_category = match non_empty(record.asset_category.as_deref()) {
        Some(value) => value.parse::<AssetCategory>()?.as_str().to_string(),
        None => String::new(),
    };
    let document_category = match non_empty(record.document_category.as_deref()) {
        Some(value) => value
            .parse::<DocumentCategory>()?
            .filter_value()
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };

    let source_title = record.source_title.trim().to_string();
    let date_from_text = record.effective_date.is_none();
    let effective_date = record
        .effective_date
        .or_else(|| extract_effective_date(&source_title))
        .or_else(|| extract_effective_date(&record.text));
    let checksum = record
        .checksum
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| sha256_text(&record.text));

    let date_from_text = date_from_text && effective_date.is_some();
    Ok((
        IndexedChunk {
            text: record.text,
            source_url,
            source_title,
            effective_date,
            jurisdiction,
            asset_category,
            document_category,
            checksum,
        },
        date_from_text,
    ))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::retrieval::backend::{SearchFilters, SqliteVectorIndex, VectorSearch, index_status};
    use crate::semantic::{DEFAULT_MODEL_ID, Embedder, LocalHashEmbedder};

    const RECORDS: &str = r#"{"text": "第八条 项目并网验收时，项目单位应当提交并网验收申请表和竣工验收资料。本办法自2024年6月1日起施行。", "url": "https://drc.gd.gov.cn/a.html", "title": "广东省分布式光伏并网管理办法", "jurisdiction": "gd", "asset_category": "pv", "document_category": "grid-connection"}
{"text": "第八条 项目并网验收时，项目单位应当提交并网验收申请表和竣工验收资料。本办法自2024年6月1日起施行。", "url": "https://drc.gd.gov.cn/a.html", "title": "广东省分布式光伏并网管理办法", "jurisdiction": "gd", "asset_category": "pv"}

{"text": "海上风电项目用海审批按照有关规定执行。", "source_url": "https://www.nea.gov.cn/b.html", "jurisdiction": "national", "effective_date": "2023-01-01"}
{"text": "无效记录", "url": "ftp://files.example.com/c"}
{"text": "未知省份", "url": "https://example.gov.cn/d", "jurisdiction": "atlantis"}
not json
"#;

    fn index_args(root: &Path, refresh_mode: IndexRefreshMode) -> IndexArgs {
        let input = root.join("chunks.jsonl");
        fs::write(&input, RECORDS).expect("write input");
        IndexArgs {
            cache_root: root.join("cache"),
            db_path: None,
            input,
            model_id: DEFAULT_MODEL_ID.to_string(),
            refresh_mode,
            batch_size: 2,
        }
    }

    #[test]
    fn index_counts_valid_duplicate_and_invalid_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = execute(&index_args(dir.path(), IndexRefreshMode::MissingOrStale))
            .expect("index run");

        assert_eq!(manifest.records_read, 6);
        assert_eq!(manifest.indexed_chunks, 2);
        assert_eq!(manifest.embedded_chunks, 2);
        assert_eq!(manifest.duplicate_records, 1);
        assert_eq!(manifest.skipped_invalid_records, 3);
        assert_eq!(manifest.dated_from_text, 1);
        assert_eq!(manifest.warnings.len(), 3);

        let manifests = fs::read_dir(dir.path().join("cache/manifests"))
            .expect("manifest dir")
            .count();
        assert_eq!(manifests, 1);
    }

    #[test]
    fn missing_or_stale_refresh_skips_current_embeddings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = index_args(dir.path(), IndexRefreshMode::MissingOrStale);
        execute(&args).expect("first run");
        let second = execute(&args).expect("second run");
        assert_eq!(second.indexed_chunks, 2);
        assert_eq!(second.embedded_chunks, 0);

        let full = execute(&index_args(dir.path(), IndexRefreshMode::Full)).expect("full run");
        assert_eq!(full.embedded_chunks, 2);
    }

    #[test]
    fn record_scope_tags_are_canonicalized() {
        let record = serde_json::from_str::<ChunkRecord>(
            r#"{"text": "内容", "url": "https://fgw.gd.gov.cn/x", "jurisdiction": "广东", "asset_category": "光伏", "document_category": "all"}"#,
        )
        .expect("record");
        let (chunk, date_from_text) = prepare_chunk(record).expect("valid record");
        assert!(!date_from_text);
        assert_eq!(chunk.jurisdiction, Jurisdiction::Gd.code());
        assert_eq!(chunk.asset_category, "solar");
        assert_eq!(chunk.document_category, "");
        assert_eq!(chunk.checksum, sha256_text("内容"));
    }

    #[tokio::test]
    async fn indexed_chunks_are_searchable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = index_args(dir.path(), IndexRefreshMode::MissingOrStale);
        execute(&args).expect("index run");

        let db_path = resolve_db_path(&args.cache_root, None);
        let connection = open_index_connection(&db_path, false).expect("open index");
        let status = index_status(&connection, DEFAULT_MODEL_ID).expect("status");
        assert!(status.available);
        assert_eq!(status.chunk_count, 2);

        let embedder = LocalHashEmbedder::default();
        let index = SqliteVectorIndex::new(db_path, embedder.model().clone(), 0.05);
        let filters = SearchFilters {
            jurisdiction: Some(Jurisdiction::Gd),
            ..SearchFilters::default()
        };
        let chunks = index
            .search(&embedder.embed("并网验收需要哪些资料"), &filters, 4)
            .await
            .expect("search");

        assert_eq!(chunks[0].source_url, "https://drc.gd.gov.cn/a.html");
        assert_eq!(
            chunks[0].effective_date,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        );
    }
}
