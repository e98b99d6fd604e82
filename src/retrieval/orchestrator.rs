use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::BackendError;
use crate::model::{
    AnswerMode, AttemptStatus, BackendName, Language, Query, RetrievalAttempt, RetrievedChunk,
};
use crate::semantic::Embedder;
use crate::util::sha256_text;

use super::backend::{Backends, SearchFilters, WebQaAnswer};
use super::citation::RefusalReason;
use super::trust::{Allowlist, is_trusted, is_well_formed_source};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Init,
    TryVector,
    TryDiscovery,
    TryWebQa,
    Compose,
    Done,
    Refused,
}

const FALLBACK_ORDER: [(OrchestratorState, BackendName); 3] = [
    (OrchestratorState::TryVector, BackendName::VectorSearch),
    (OrchestratorState::TryDiscovery, BackendName::DocumentDiscovery),
    (OrchestratorState::TryWebQa, BackendName::WebQa),
];

#[derive(Debug, Clone)]
pub enum BackendResult {
    Success(Vec<RetrievedChunk>),
    Empty,
    Error(BackendError),
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Compose {
        mode: AnswerMode,
        chunks: Vec<RetrievedChunk>,
    },
    Refused(RefusalReason),
}

#[derive(Debug, Clone)]
pub struct Orchestration {
    pub states: Vec<OrchestratorState>,
    pub attempts: Vec<RetrievalAttempt>,
    pub resolution: Resolution,
}

struct CallOutcome {
    result: BackendResult,
    retries: u32,
    dropped_untrusted: usize,
}

pub struct Orchestrator<'a> {
    backends: &'a Backends,
    embedder: &'a dyn Embedder,
    allowlist: &'a Allowlist,
    config: &'a RetrievalConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        backends: &'a Backends,
        embedder: &'a dyn Embedder,
        allowlist: &'a Allowlist,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self {
            backends,
            embedder,
            allowlist,
            config,
        }
    }

    pub async fn run(&self, query: &Query, trace_id: &str) -> Orchestration {
        let started = Instant::now();
        let mut states = vec![OrchestratorState::Init];
        let mut attempts = Vec::<RetrievalAttempt>::new();
        let mut hard_errors = 0usize;
        let mut resolution = None;

        for (state, backend) in FALLBACK_ORDER {
            states.push(state);

            if let Some(reason) = self.stop_reason(started, hard_errors) {
                warn!(
                    trace_id,
                    backend = %backend,
                    reason = reason.as_str(),
                    elapsed_ms = elapsed_ms(started),
                    hard_errors,
                    "skipping remaining backends"
                );
                resolution = Some(Resolution::Refused(reason));
                break;
            }

            let attempt_started = Instant::now();
            let Some(outcome) = self.call_backend(backend, query, trace_id, started).await else {
                debug!(trace_id, backend = %backend, "backend not configured");
                continue;
            };

            let attempt = record_attempt(backend, outcome, attempt_started);
            info!(
                trace_id,
                backend = %backend,
                status = attempt.status.as_str(),
                elapsed_ms = attempt.elapsed_ms,
                chunk_count = attempt.chunks.len(),
                retries = attempt.retries,
                dropped_untrusted = attempt.dropped_untrusted,
                error = attempt.error.as_deref().unwrap_or(""),
                "retrieval attempt finished"
            );
            if elapsed_ms(started) > self.config.target_budget_ms {
                debug!(
                    trace_id,
                    elapsed_ms = elapsed_ms(started),
                    target_budget_ms = self.config.target_budget_ms,
                    "retrieval over target budget"
                );
            }

            let status = attempt.status;
            let chunks = attempt.chunks.clone();
            attempts.push(attempt);

            match (status, backend) {
                (AttemptStatus::Success, _) => {
                    resolution = Some(Resolution::Compose {
                        mode: backend.answer_mode(),
                        chunks,
                    });
                    break;
                }
                (AttemptStatus::Error, BackendName::WebQa) => {
                    resolution = Some(Resolution::Refused(RefusalReason::BackendsUnavailable));
                    break;
                }
                (AttemptStatus::Empty, BackendName::WebQa) => {
                    resolution = Some(Resolution::Compose {
                        mode: AnswerMode::WebQa,
                        chunks,
                    });
                    break;
                }
                (AttemptStatus::Error, _) => hard_errors += 1,
                (AttemptStatus::Empty, _) => {}
            }
        }

        let resolution = resolution.unwrap_or_else(|| self.exhausted(&attempts));
        states.push(match resolution {
            Resolution::Compose { .. } => OrchestratorState::Compose,
            Resolution::Refused(_) => OrchestratorState::Refused,
        });

        Orchestration {
            states,
            attempts,
            resolution,
        }
    }

    fn stop_reason(&self, started: Instant, hard_errors: usize) -> Option<RefusalReason> {
        if started.elapsed() >= self.config.hard_budget() {
            return Some(RefusalReason::BudgetExhausted);
        }
        if hard_errors >= self.config.max_hard_errors {
            return Some(RefusalReason::BackendsUnavailable);
        }
        None
    }

    // No web-QA backend to fall back on: only a run where every backend
    // failed counts as unavailable.
    fn exhausted(&self, attempts: &[RetrievalAttempt]) -> Resolution {
        let all_failed = !attempts.is_empty()
            && attempts
                .iter()
                .all(|attempt| attempt.status == AttemptStatus::Error);
        if all_failed {
            Resolution::Refused(RefusalReason::BackendsUnavailable)
        } else {
            Resolution::Compose {
                mode: AnswerMode::Refusal,
                chunks: Vec::new(),
            }
        }
    }

    async fn call_backend(
        &self,
        backend: BackendName,
        query: &Query,
        trace_id: &str,
        started: Instant,
    ) -> Option<CallOutcome> {
        match backend {
            BackendName::VectorSearch => {
                let vector_search = self.backends.vector.as_ref()?;
                let query_vector = self.embedder.embed(query.question());
                let filters = SearchFilters::from_query(query);
                let top_k = self.config.vector_top_k;
                let timeout = self.config.vector_timeout();
                let (result, retries) = self
                    .call_with_retry(backend, timeout, started, trace_id, || {
                        vector_search.search(&query_vector, &filters, top_k)
                    })
                    .await;
                Some(self.chunk_outcome(backend, result, retries, trace_id))
            }
            BackendName::DocumentDiscovery => {
                let discovery = self.backends.discovery.as_ref()?;
                let jurisdiction = query.jurisdiction();
                let asset_category = query.asset_category();
                let timeout = self.config.discovery_timeout();
                let (result, retries) = self
                    .call_with_retry(backend, timeout, started, trace_id, || {
                        discovery.discover(query.question(), jurisdiction, asset_category)
                    })
                    .await;
                Some(self.chunk_outcome(backend, result, retries, trace_id))
            }
            BackendName::WebQa => {
                let web_qa = self.backends.web_qa.as_ref()?;
                let enhanced = enhanced_query_text(query);
                let hint = self.allowlist.hint_for(query.jurisdiction());
                let timeout = self.config.web_qa_timeout();
                let (result, retries) = self
                    .call_with_retry(backend, timeout, started, trace_id, || {
                        web_qa.ask(&enhanced, &hint)
                    })
                    .await;
                Some(match result {
                    Ok(answer) if answer.is_empty() => CallOutcome {
                        result: BackendResult::Empty,
                        retries,
                        dropped_untrusted: 0,
                    },
                    Ok(answer) => {
                        let (candidates, uncited_untrusted) =
                            web_qa_chunks(answer, query, self.allowlist);
                        let (chunks, dropped_untrusted) =
                            usable_chunks(backend, candidates, self.allowlist, trace_id);
                        let dropped_untrusted = dropped_untrusted + uncited_untrusted;
                        CallOutcome {
                            result: if chunks.is_empty() {
                                BackendResult::Empty
                            } else {
                                BackendResult::Success(chunks)
                            },
                            retries,
                            dropped_untrusted,
                        }
                    }
                    Err(error) => CallOutcome {
                        result: BackendResult::Error(error),
                        retries,
                        dropped_untrusted: 0,
                    },
                })
            }
        }
    }

    fn chunk_outcome(
        &self,
        backend: BackendName,
        result: Result<Vec<RetrievedChunk>, BackendError>,
        retries: u32,
        trace_id: &str,
    ) -> CallOutcome {
        match result {
            Ok(chunks) => {
                let (chunks, dropped_untrusted) =
                    usable_chunks(backend, chunks, self.allowlist, trace_id);
                CallOutcome {
                    result: if chunks.is_empty() {
                        BackendResult::Empty
                    } else {
                        BackendResult::Success(chunks)
                    },
                    retries,
                    dropped_untrusted,
                }
            }
            Err(error) => CallOutcome {
                result: BackendResult::Error(error),
                retries,
                dropped_untrusted: 0,
            },
        }
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        backend: BackendName,
        timeout: Duration,
        started: Instant,
        trace_id: &str,
        mut call: F,
    ) -> (Result<T, BackendError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let hard_budget = self.config.hard_budget();
        let mut retries = 0u32;
        loop {
            let remaining = hard_budget.saturating_sub(started.elapsed());
            let effective_timeout = timeout.min(remaining);
            let result = match tokio::time::timeout(effective_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    backend,
                    timeout_ms: effective_timeout.as_millis() as u64,
                }),
            };

            let error = match result {
                Err(error) if error.is_transient() && retries < self.config.max_retries => error,
                other => return (other, retries),
            };

            let backoff = Duration::from_millis(
                self.config
                    .retry_backoff_ms
                    .saturating_mul(1u64 << retries.min(16)),
            );
            if started.elapsed() + backoff >= hard_budget {
                return (Err(error), retries);
            }

            warn!(
                trace_id,
                backend = %backend,
                error = %error,
                retry = retries + 1,
                backoff_ms = backoff.as_millis() as u64,
                "transient backend failure; retrying"
            );
            tokio::time::sleep(backoff).await;
            retries += 1;
        }
    }
}

fn record_attempt(
    backend: BackendName,
    outcome: CallOutcome,
    attempt_started: Instant,
) -> RetrievalAttempt {
    let (status, chunks, error) = match outcome.result {
        BackendResult::Success(chunks) => (AttemptStatus::Success, chunks, None),
        BackendResult::Empty => (AttemptStatus::Empty, Vec::new(), None),
        BackendResult::Error(error) => (AttemptStatus::Error, Vec::new(), Some(error.to_string())),
    };
    RetrievalAttempt {
        backend,
        status,
        chunks,
        elapsed_ms: elapsed_ms(attempt_started),
        retries: outcome.retries,
        dropped_untrusted: outcome.dropped_untrusted,
        error,
    }
}

pub fn usable_chunks(
    backend: BackendName,
    chunks: Vec<RetrievedChunk>,
    allowlist: &Allowlist,
    trace_id: &str,
) -> (Vec<RetrievedChunk>, usize) {
    let mut seen = HashSet::<String>::new();
    let mut kept = Vec::<RetrievedChunk>::with_capacity(chunks.len());
    let mut dropped_untrusted = 0usize;

    for mut chunk in chunks {
        if !is_well_formed_source(&chunk.source_url) || chunk.text.trim().is_empty() {
            debug!(
                trace_id,
                backend = %backend,
                url = %chunk.source_url,
                "discarding malformed chunk"
            );
            continue;
        }
        if !is_trusted(&chunk.source_url, allowlist) {
            dropped_untrusted += 1;
            debug!(
                trace_id,
                backend = %backend,
                url = %chunk.source_url,
                "dropping untrusted chunk"
            );
            continue;
        }
        if chunk.checksum.trim().is_empty() {
            chunk.checksum = sha256_text(&chunk.text);
        }
        if seen.insert(chunk.checksum.clone()) {
            kept.push(chunk);
        }
    }

    (kept, dropped_untrusted)
}

fn web_qa_chunks(
    answer: WebQaAnswer,
    query: &Query,
    allowlist: &Allowlist,
) -> (Vec<RetrievedChunk>, usize) {
    let mut chunks = Vec::<RetrievedChunk>::new();
    let mut uncited_untrusted = 0usize;
    for candidate in answer.candidates {
        let source_url = candidate.url.trim().to_string();
        let excerpt = candidate
            .excerpt
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        if excerpt.is_empty() {
            if is_well_formed_source(&source_url) && !is_trusted(&source_url, allowlist) {
                uncited_untrusted += 1;
            }
            continue;
        }
        chunks.push(RetrievedChunk {
            checksum: sha256_text(&excerpt),
            text: excerpt,
            source_url,
            source_title: candidate.title.unwrap_or_default().trim().to_string(),
            effective_date: candidate.effective_date,
            jurisdiction: query
                .jurisdiction()
                .map(|value| value.code().to_string())
                .unwrap_or_default(),
            asset_category: query
                .asset_category()
                .map(|value| value.as_str().to_string())
                .unwrap_or_default(),
        });
    }
    (chunks, uncited_untrusted)
}

pub fn enhanced_query_text(query: &Query) -> String {
    let language = query.language();
    let mut parts = vec![query.question().to_string()];
    if let Some(jurisdiction) = query.jurisdiction() {
        parts.push(jurisdiction.display_name(language).to_string());
    }
    if let Some(asset_category) = query.asset_category() {
        parts.push(asset_category.display_name(language).to_string());
    }
    parts.push(match language {
        Language::Zh => "政策文件 原文条款".to_string(),
        Language::En => "official policy document provisions".to_string(),
    });
    parts.join(" ")
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
