use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::model::{AssetCategory, BackendName, Jurisdiction, RetrievedChunk};
use crate::util::sha256_text;

use super::{DocumentDiscovery, SearchFilters, VectorSearch, WebQa, WebQaAnswer, WebQaCandidate};

pub(crate) fn chunk(url: &str, title: &str, text: &str) -> RetrievedChunk {
    RetrievedChunk {
        text: text.to_string(),
        source_url: url.to_string(),
        source_title: title.to_string(),
        effective_date: None,
        jurisdiction: String::new(),
        asset_category: String::new(),
        checksum: sha256_text(&format!("{url}|{text}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Received {
    Search {
        query_vector: Vec<f32>,
        filters: SearchFilters,
        top_k: usize,
    },
    Discover {
        query_text: String,
        jurisdiction: Option<Jurisdiction>,
        asset_category: Option<AssetCategory>,
    },
    Ask {
        enhanced_query_text: String,
        allowlist_hint: Vec<String>,
    },
}

pub(crate) struct Scripted<T> {
    replies: Mutex<VecDeque<Result<T, BackendError>>>,
    last: Mutex<Option<Result<T, BackendError>>>,
    received: Mutex<Option<Received>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl<T: Clone> Scripted<T> {
    pub(crate) fn new(replies: Vec<Result<T, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            received: Mutex::new(None),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn always(reply: Result<T, BackendError>) -> Self {
        Self::new(vec![reply])
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn last_received(&self) -> Option<Received> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn reply(&self, received: Received) -> Result<T, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(received);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .replies
            .lock()
            .map(|mut replies| replies.pop_front())
            .unwrap_or(None);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or_else(|| {
                Err(BackendError::malformed(BackendName::VectorSearch, "empty script"))
            }),
        }
    }
}

#[async_trait]
impl VectorSearch for Scripted<Vec<RetrievedChunk>> {
    async fn search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        self.reply(Received::Search {
            query_vector: query_vector.to_vec(),
            filters: filters.clone(),
            top_k,
        })
        .await
    }
}

#[async_trait]
impl DocumentDiscovery for Scripted<Vec<RetrievedChunk>> {
    async fn discover(
        &self,
        query_text: &str,
        jurisdiction: Option<Jurisdiction>,
        asset_category: Option<AssetCategory>,
    ) -> Result<Vec<RetrievedChunk>, BackendError> {
        self.reply(Received::Discover {
            query_text: query_text.to_string(),
            jurisdiction,
            asset_category,
        })
        .await
    }
}

#[async_trait]
impl WebQa for Scripted<WebQaAnswer> {
    async fn ask(
        &self,
        enhanced_query_text: &str,
        allowlist_hint: &[String],
    ) -> Result<WebQaAnswer, BackendError> {
        self.reply(Received::Ask {
            enhanced_query_text: enhanced_query_text.to_string(),
            allowlist_hint: allowlist_hint.to_vec(),
        })
        .await
    }
}

pub(crate) fn web_answer(
    answer_text: &str,
    candidates: &[(&str, &str, Option<&str>)],
) -> WebQaAnswer {
    WebQaAnswer {
        answer_text: answer_text.to_string(),
        candidates: candidates
            .iter()
            .map(|(url, title, excerpt)| WebQaCandidate {
                url: url.to_string(),
                title: Some(title.to_string()),
                excerpt: excerpt.map(str::to_string),
                effective_date: None,
            })
            .collect(),
    }
}
