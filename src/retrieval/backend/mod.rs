mod http;
mod sqlite_vector;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::BackendError;
use crate::model::{
    AssetCategory, BackendName, DocumentCategory, Jurisdiction, Query, RetrievedChunk,
};

pub use http::{HttpDiscoveryBackend, HttpWebQaBackend};
pub use sqlite_vector::{
    SqliteVectorIndex, ensure_index_schema, index_status, open_index_connection,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub jurisdiction: Option<Jurisdiction>,
    pub asset_category: Option<AssetCategory>,
    pub document_category: DocumentCategory,
}

impl SearchFilters {
    pub fn from_query(query: &Query) -> Self {
        Self {
            jurisdiction: query.jurisdiction(),
            asset_category: query.asset_category(),
            document_category: query.document_category(),
        }
    }
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        query_vector: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, BackendError>;
}

#[async_trait]
pub trait DocumentDiscovery: Send + Sync {
    async fn discover(
        &self,
        query_text: &str,
        jurisdiction: Option<Jurisdiction>,
        asset_category: Option<AssetCategory>,
    ) -> Result<Vec<RetrievedChunk>, BackendError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "CandidateEntry")]
pub struct WebQaCandidate {
    pub url: String,
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub effective_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateEntry {
    Url(String),
    Detailed {
        #[serde(alias = "source_url")]
        url: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        excerpt: Option<String>,
        #[serde(default)]
        effective_date: Option<NaiveDate>,
    },
}

impl From<CandidateEntry> for WebQaCandidate {
    fn from(entry: CandidateEntry) -> Self {
        match entry {
            CandidateEntry::Url(url) => Self {
                url,
                ..Self::default()
            },
            CandidateEntry::Detailed {
                url,
                title,
                excerpt,
                effective_date,
            } => Self {
                url,
                title,
                excerpt,
                effective_date,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WebQaAnswer {
    #[serde(default)]
    pub answer_text: String,
    #[serde(default, alias = "candidate_urls")]
    pub candidates: Vec<WebQaCandidate>,
}

impl WebQaAnswer {
    pub fn is_empty(&self) -> bool {
        self.answer_text.trim().is_empty() && self.candidates.is_empty()
    }
}

#[async_trait]
pub trait WebQa: Send + Sync {
    async fn ask(
        &self,
        enhanced_query_text: &str,
        allowlist_hint: &[String],
    ) -> Result<WebQaAnswer, BackendError>;
}

#[derive(Clone, Default)]
pub struct Backends {
    pub vector: Option<Arc<dyn VectorSearch>>,
    pub discovery: Option<Arc<dyn DocumentDiscovery>>,
    pub web_qa: Option<Arc<dyn WebQa>>,
}

impl Backends {
    pub fn configured_names(&self) -> Vec<&'static str> {
        let mut names = Vec::<&'static str>::new();
        if self.vector.is_some() {
            names.push(BackendName::VectorSearch.as_str());
        }
        if self.discovery.is_some() {
            names.push(BackendName::DocumentDiscovery.as_str());
        }
        if self.web_qa.is_some() {
            names.push(BackendName::WebQa.as_str());
        }
        names
    }
}
