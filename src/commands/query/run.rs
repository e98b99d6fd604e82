use anyhow::Result;
use tracing::info;

use crate::cli::{QueryArgs, resolve_db_path};
use crate::config::AppConfig;
use crate::retrieval::pipeline::{QueryPipeline, QueryRequest};

use super::output::{write_json_response, write_text_response};

pub async fn run(args: QueryArgs) -> Result<i32> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    let pipeline = QueryPipeline::from_config(config, &args.model_id)?;
    let request = QueryRequest {
        question: args.question.clone(),
        jurisdiction: args.jurisdiction.clone(),
        asset_category: args.asset_category.clone(),
        document_category: args.document_category.clone(),
        language: args.language.clone(),
    };

    let response = pipeline.answer(&request).await;
    if args.json {
        write_json_response(&response)?;
    } else {
        write_text_response(&response)?;
    }

    info!(trace_id = %response.trace_id(), error = response.is_error(), "query command completed");
    Ok(if response.is_error() { 1 } else { 0 })
}

fn apply_overrides(config: &mut AppConfig, args: &QueryArgs) -> Result<()> {
    if args.db_path.is_some() || config.backends.vector_db_path.is_none() {
        config.backends.vector_db_path =
            Some(resolve_db_path(&args.cache_root, args.db_path.as_deref()));
    }
    if let Some(target_budget_ms) = args.target_budget_ms {
        config.retrieval.target_budget_ms = target_budget_ms;
    }
    if let Some(hard_budget_ms) = args.hard_budget_ms {
        config.retrieval.hard_budget_ms = hard_budget_ms;
        config.retrieval.target_budget_ms = config.retrieval.target_budget_ms.min(hard_budget_ms);
    }
    config.validate()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> QueryArgs {
        QueryArgs {
            cache_root: PathBuf::from("/tmp/gridcite-cache"),
            config: None,
            db_path: None,
            question: "并网验收需要哪些资料".to_string(),
            jurisdiction: None,
            asset_category: None,
            document_category: None,
            language: None,
            model_id: "local-hash-bigram-v1".to_string(),
            target_budget_ms: None,
            hard_budget_ms: None,
            json: false,
        }
    }

    #[test]
    fn default_index_lives_under_cache_root() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args()).expect("overrides");
        assert_eq!(
            config.backends.vector_db_path,
            Some(PathBuf::from("/tmp/gridcite-cache/gridcite_index.sqlite"))
        );
    }

    #[test]
    fn configured_index_path_is_kept_unless_flag_given() {
        let mut config = AppConfig::default();
        config.backends.vector_db_path = Some(PathBuf::from("/srv/index.sqlite"));
        apply_overrides(&mut config, &args()).expect("overrides");
        assert_eq!(
            config.backends.vector_db_path,
            Some(PathBuf::from("/srv/index.sqlite"))
        );

        let mut flagged = args();
        flagged.db_path = Some(PathBuf::from("/data/other.sqlite"));
        apply_overrides(&mut config, &flagged).expect("overrides");
        assert_eq!(
            config.backends.vector_db_path,
            Some(PathBuf::from("/data/other.sqlite"))
        );
    }

    #[test]
    fn hard_budget_flag_clamps_target_budget() {
        let mut config = AppConfig::default();
        let mut flagged = args();
        flagged.hard_budget_ms = Some(500);
        apply_overrides(&mut config, &flagged).expect("overrides");
        assert_eq!(config.retrieval.hard_budget_ms, 500);
        assert_eq!(config.retrieval.target_budget_ms, 500);

        let mut zero = args();
        zero.hard_budget_ms = Some(0);
        assert!(apply_overrides(&mut AppConfig::default(), &zero).is_err());
    }
}
