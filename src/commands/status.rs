use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli::{StatusArgs, resolve_db_path};
use crate::config::AppConfig;
use crate::retrieval::backend::{index_status, open_index_connection};

#[derive(Debug, Deserialize)]
struct LastIndexRun {
    run_id: String,
    generated_at: String,
    indexed_chunks: usize,
    embedded_chunks: usize,
    skipped_invalid_records: usize,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let db_path = match (&args.db_path, &config.backends.vector_db_path) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => path.clone(),
        (None, None) => resolve_db_path(&args.cache_root, None),
    };

    info!(
        cache_root = %args.cache_root.display(),
        allowlist_entries = config.allowlist.len(),
        discovery = config.backends.discovery_url.is_some(),
        web_qa = config.backends.web_qa_url.is_some(),
        "status requested"
    );

    match latest_index_run(&args.cache_root.join("manifests"))? {
        Some(last) => info!(
            run_id = %last.run_id,
            generated_at = %last.generated_at,
            indexed_chunks = last.indexed_chunks,
            embedded_chunks = last.embedded_chunks,
            skipped_invalid_records = last.skipped_invalid_records,
            "loaded last index manifest"
        ),
        None => warn!(cache_root = %args.cache_root.display(), "no index manifest found"),
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "vector index missing");
        return Ok(());
    }

    let connection = open_index_connection(&db_path, false)?;
    let status = index_status(&connection, &args.model_id)?;
    if status.available {
        info!(
            path = %db_path.display(),
            model_id = %args.model_id,
            chunks = status.chunk_count,
            embeddings = status.embedding_count,
            "vector index ready"
        );
        for (jurisdiction, asset_category, count) in scope_counts(&connection)? {
            info!(
                jurisdiction = %display_tag(&jurisdiction),
                asset_category = %display_tag(&asset_category),
                chunks = count,
                "indexed scope"
            );
        }
    } else {
        warn!(
            path = %db_path.display(),
            model_id = %args.model_id,
            chunks = status.chunk_count,
            reason = %status.reason.unwrap_or_default(),
            "vector index unavailable"
        );
    }

    Ok(())
}

fn latest_index_run(manifest_dir: &Path) -> Result<Option<LastIndexRun>> {
    if !manifest_dir.is_dir() {
        return Ok(None);
    }

    // File names embed a sortable UTC timestamp.
    let mut candidates = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
        .filter_map(|entry| entry.ok().map(|value| value.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("index_run_") && name.ends_with(".json"))
        })
        .collect::<Vec<_>>();
    candidates.sort();

    let Some(path) = candidates.pop() else {
        return Ok(None);
    };
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest = serde_json::from_slice::<LastIndexRun>(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(manifest))
}

fn scope_counts(connection: &Connection) -> Result<Vec<(String, String, i64)>> {
    let mut statement = connection.prepare(
        "
        SELECT jurisdiction, asset_category, COUNT(*)
        FROM chunks
        GROUP BY jurisdiction, asset_category
        ORDER BY jurisdiction, asset_category
        ",
    )?;
    let rows = statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn display_tag(value: &str) -> &str {
    if value.is_empty() { "untagged" } else { value }
}
