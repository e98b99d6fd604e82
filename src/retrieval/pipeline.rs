use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::ValidationError;
use crate::model::{
    AnswerMode, AttemptStatus, BackendName, Citation, ComposedAnswer, Query, RetrievalAttempt,
};
use crate::semantic::{Embedder, LocalHashEmbedder, resolve_model_config};
use crate::util::new_trace_id;

use super::backend::{Backends, HttpDiscoveryBackend, HttpWebQaBackend, SqliteVectorIndex};
use super::citation::CitationComposer;
use super::normalize::normalize;
use super::orchestrator::{OrchestratorState, Orchestrator, Resolution};
use super::trust::Allowlist;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub asset_category: Option<String>,
    #[serde(default)]
    pub document_category: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl QueryRequest {
    pub fn validate(&self) -> Result<Query, ValidationError> {
        let question = normalize(&self.question);
        if question.is_empty() {
            return Err(ValidationError::EmptyQuestion);
        }

        Ok(Query::new(
            question,
            parse_optional(self.jurisdiction.as_deref())?,
            parse_optional(self.asset_category.as_deref())?,
            parse_optional(self.document_category.as_deref())?.unwrap_or_default(),
            parse_optional(self.language.as_deref())?.unwrap_or_default(),
        ))
    }
}

fn parse_optional<T>(value: Option<&str>) -> Result<Option<T>, ValidationError>
where
    T: FromStr<Err = ValidationError>,
{
    match value.map(normalize) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value.parse::<T>().map(Some),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub backend: BackendName,
    pub status: AttemptStatus,
    pub elapsed_ms: u64,
    pub chunk_count: usize,
    pub retries: u32,
    pub dropped_untrusted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RetrievalAttempt> for AttemptSummary {
    fn from(attempt: &RetrievalAttempt) -> Self {
        Self {
            backend: attempt.backend,
            status: attempt.status,
            elapsed_ms: attempt.elapsed_ms,
            chunk_count: attempt.chunks.len(),
            retries: attempt.retries,
            dropped_untrusted: attempt.dropped_untrusted,
            error: attempt.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Answer {
        mode: AnswerMode,
        body: String,
        citations: Vec<Citation>,
        trace_id: String,
        elapsed_ms: u64,
        states: Vec<OrchestratorState>,
        attempts: Vec<AttemptSummary>,
    },
    Refusal {
        mode: AnswerMode,
        refusal_message: String,
        guidance_tips: Vec<String>,
        trace_id: String,
        elapsed_ms: u64,
        states: Vec<OrchestratorState>,
        attempts: Vec<AttemptSummary>,
    },
    Error {
        error: bool,
        message: String,
        trace_id: String,
    },
}

impl QueryResponse {
    pub fn trace_id(&self) -> &str {
        match self {
            Self::Answer { trace_id, .. }
            | Self::Refusal { trace_id, .. }
            | Self::Error { trace_id, .. } => trace_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub answer: ComposedAnswer,
    pub states: Vec<OrchestratorState>,
    pub attempts: Vec<RetrievalAttempt>,
    pub elapsed_ms: u64,
}

impl PipelineRun {
    pub fn into_response(self) -> QueryResponse {
        let attempts = self.attempts.iter().map(AttemptSummary::from).collect();
        let answer = self.answer;
        if answer.is_refusal() {
            let refusal_message = answer.body.lines().next().unwrap_or_default().to_string();
            return QueryResponse::Refusal {
                mode: AnswerMode::Refusal,
                refusal_message,
                guidance_tips: answer.guidance_tips,
                trace_id: answer.trace_id,
                elapsed_ms: self.elapsed_ms,
                states: self.states,
                attempts,
            };
        }

        QueryResponse::Answer {
            mode: answer.mode,
            body: answer.body,
            citations: answer.citations,
            trace_id: answer.trace_id,
            elapsed_ms: self.elapsed_ms,
            states: self.states,
            attempts,
        }
    }
}

pub struct QueryPipeline {
    config: AppConfig,
    allowlist: Allowlist,
    backends: Backends,
    embedder: Arc<dyn Embedder>,
}

impl QueryPipeline {
    pub fn new(config: AppConfig, backends: Backends, embedder: Arc<dyn Embedder>) -> Self {
        let allowlist = Allowlist::new(&config.allowlist);
        Self {
            config,
            allowlist,
            backends,
            embedder,
        }
    }

    pub fn from_config(config: AppConfig, model_id: &str) -> Result<Self> {
        let model = resolve_model_config(model_id);
        let api_key = config.api_key();
        let mut backends = Backends::default();

        if let Some(db_path) = &config.backends.vector_db_path {
            if db_path.exists() {
                backends.vector = Some(Arc::new(SqliteVectorIndex::new(
                    db_path.clone(),
                    model.clone(),
                    config.retrieval.vector_min_score,
                )));
            } else {
                warn!(path = %db_path.display(), "vector index missing; vector search disabled");
            }
        }
        if let Some(url) = &config.backends.discovery_url {
            backends.discovery = Some(Arc::new(HttpDiscoveryBackend::new(
                url,
                api_key.clone(),
                config.retrieval.discovery_timeout(),
            )?));
        }
        if let Some(url) = &config.backends.web_qa_url {
            backends.web_qa = Some(Arc::new(HttpWebQaBackend::new(
                url,
                api_key,
                config.retrieval.web_qa_timeout(),
            )?));
        }

        info!(
            backends = %backends.configured_names().join(","),
            allowlist_entries = config.allowlist.len(),
            model_id = %model.model_id,
            "query pipeline configured"
        );

        Ok(Self::new(config, backends, Arc::new(LocalHashEmbedder::new(model))))
    }

    pub async fn answer(&self, request: &QueryRequest) -> QueryResponse {
        let trace_id = new_trace_id();
        let query = match request.validate() {
            Ok(query) => query,
            Err(error) => {
                warn!(trace_id = %trace_id, error = %error, "query rejected");
                return QueryResponse::Error {
                    error: true,
                    message: error.to_string(),
                    trace_id,
                };
            }
        };

        self.execute(&query, &trace_id).await.into_response()
    }

    pub async fn execute(&self, query: &Query, trace_id: &str) -> PipelineRun {
        let started = Instant::now();
        info!(
            trace_id,
            jurisdiction = query.jurisdiction().map(|value| value.code()).unwrap_or(""),
            asset_category = query.asset_category().map(|value| value.as_str()).unwrap_or(""),
            document_category = query.document_category().as_str(),
            "query started"
        );

        let orchestrator = Orchestrator::new(
            &self.backends,
            self.embedder.as_ref(),
            &self.allowlist,
            &self.config.retrieval,
        );
        let orchestration = orchestrator.run(query, trace_id).await;

        let composer = CitationComposer::new(&self.allowlist, &self.config.composer);
        let mut states = orchestration.states;
        let answer = match orchestration.resolution {
            Resolution::Compose { mode, chunks } => {
                let answer = composer.compose(&chunks, query, query.language(), mode, trace_id);
                states.push(OrchestratorState::Done);
                answer
            }
            Resolution::Refused(reason) => {
                composer.refusal(query, query.language(), reason, trace_id)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            trace_id,
            mode = answer.mode.as_str(),
            citations = answer.citations.len(),
            attempts = orchestration.attempts.len(),
            elapsed_ms,
            "query finished"
        );

        PipelineRun {
            answer,
            states,
            attempts: orchestration.attempts,
            elapsed_ms,
        }
    }
}
