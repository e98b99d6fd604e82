use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::ComposerConfig;
use crate::model::{
    AnswerMode, Citation, ComposedAnswer, DocumentCategory, Language, Query, RetrievedChunk,
};

use super::normalize::extract_keywords;
use super::quote::extract_quotes;
use super::trust::{Allowlist, is_trusted, matches_jurisdiction};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RefusalReason {
    NoGroundedSources,
    BackendsUnavailable,
    BudgetExhausted,
}

impl RefusalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoGroundedSources => "no_grounded_sources",
            Self::BackendsUnavailable => "backends_unavailable",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

struct SourceGroup<'c> {
    url: String,
    chunks: Vec<&'c RetrievedChunk>,
}

struct GroundedSource {
    citation: Citation,
    quotes: Vec<String>,
}

pub struct CitationComposer<'a> {
    allowlist: &'a Allowlist,
    config: &'a ComposerConfig,
}

impl<'a> CitationComposer<'a> {
    pub fn new(allowlist: &'a Allowlist, config: &'a ComposerConfig) -> Self {
        Self { allowlist, config }
    }

    pub fn compose(
        &self,
        chunks: &[RetrievedChunk],
        query: &Query,
        language: Language,
        mode: AnswerMode,
        trace_id: &str,
    ) -> ComposedAnswer {
        if mode == AnswerMode::Refusal {
            return self.refusal(query, language, RefusalReason::NoGroundedSources, trace_id);
        }

        let keywords = extract_keywords(query.question());
        let mut groups = group_by_source(chunks);
        if let Some(jurisdiction) = query.jurisdiction() {
            groups.sort_by_key(|group| !matches_jurisdiction(&group.url, jurisdiction));
        }

        let mut grounded = Vec::<GroundedSource>::new();
        for group in groups {
            if grounded.len() >= self.config.max_citations {
                break;
            }
            if !is_trusted(&group.url, self.allowlist) {
                debug!(trace_id, url = %group.url, "skipping untrusted source at composition");
                continue;
            }
            match self.ground_group(&group, &keywords) {
                Some(source) => grounded.push(source),
                None => debug!(trace_id, url = %group.url, "no supporting quote in source"),
            }
        }

        if grounded.is_empty() {
            return self.refusal(query, language, RefusalReason::NoGroundedSources, trace_id);
        }

        let body = render_body(query, language, &grounded);
        ComposedAnswer {
            mode,
            body,
            citations: grounded.into_iter().map(|source| source.citation).collect(),
            guidance_tips: Vec::new(),
            trace_id: trace_id.to_string(),
        }
    }

    pub fn refusal(
        &self,
        query: &Query,
        language: Language,
        reason: RefusalReason,
        trace_id: &str,
    ) -> ComposedAnswer {
        let message = refusal_message(reason, language);
        let guidance_tips = guidance_tips(query, language, reason);

        let mut body = String::from(message);
        for tip in &guidance_tips {
            body.push_str("\n- ");
            body.push_str(tip);
        }

        ComposedAnswer {
            mode: AnswerMode::Refusal,
            body,
            citations: Vec::new(),
            guidance_tips,
            trace_id: trace_id.to_string(),
        }
    }

    fn ground_group(&self, group: &SourceGroup<'_>, keywords: &[String]) -> Option<GroundedSource> {
        let max_quotes = self.config.max_quotes_per_source;
        let mut quotes = Vec::<String>::new();
        for chunk in &group.chunks {
            for quote in extract_quotes(&chunk.text, keywords, max_quotes) {
                if quotes.len() >= max_quotes {
                    break;
                }
                if !quotes.contains(&quote) {
                    quotes.push(quote);
                }
            }
        }
        let first_quote = quotes.first()?.clone();

        let title = group
            .chunks
            .iter()
            .map(|chunk| chunk.source_title.trim())
            .find(|title| !title.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| group.url.clone());
        let effective_date = group.chunks.iter().find_map(|chunk| chunk.effective_date);

        Some(GroundedSource {
            citation: Citation {
                title,
                url: group.url.clone(),
                effective_date,
                quote: Some(first_quote),
            },
            quotes,
        })
    }
}

fn group_by_source(chunks: &[RetrievedChunk]) -> Vec<SourceGroup<'_>> {
    let mut groups = Vec::<SourceGroup<'_>>::new();
    let mut index_by_url = HashMap::<String, usize>::new();
    for chunk in chunks {
        let url = chunk.source_url.trim().to_string();
        match index_by_url.get(&url) {
            Some(index) => groups[*index].chunks.push(chunk),
            None => {
                index_by_url.insert(url.clone(), groups.len());
                groups.push(SourceGroup {
                    url,
                    chunks: vec![chunk],
                });
            }
        }
    }
    groups
}

fn render_body(query: &Query, language: Language, grounded: &[GroundedSource]) -> String {
    let mut body = match language {
        Language::Zh => format!(
            "针对“{}”，以下条文摘自{}份已核验的政府来源：",
            query.question(),
            grounded.len()
        ),
        Language::En => format!(
            "The following provisions relevant to \"{}\" are quoted from {} verified government source(s):",
            query.question(),
            grounded.len()
        ),
    };

    let mut point = 0usize;
    for (source_index, source) in grounded.iter().enumerate() {
        let marker = citation_marker(source_index + 1, &source.citation, language);
        for quote in &source.quotes {
            point += 1;
            let _ = write!(body, "\n{point}. {quote} {marker}");
        }
    }
    body
}

pub fn citation_marker(number: usize, citation: &Citation, language: Language) -> String {
    match (language, citation.effective_date) {
        (Language::Zh, Some(date)) => {
            format!("[{number}]《{}》（{}施行）", citation.title, format_date(date))
        }
        (Language::Zh, None) => format!("[{number}]《{}》", citation.title),
        (Language::En, Some(date)) => format!(
            "[{number}] \"{}\" (effective {})",
            citation.title,
            format_date(date)
        ),
        (Language::En, None) => format!("[{number}] \"{}\"", citation.title),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn refusal_message(reason: RefusalReason, language: Language) -> &'static str {
    match (reason, language) {
        (RefusalReason::NoGroundedSources, Language::Zh) => {
            "未能在已核验的政府来源中找到可直接引用的条文，暂不作答。"
        }
        (RefusalReason::BackendsUnavailable, Language::Zh) => {
            "检索服务暂时不可用，未能获取可核验的政府来源，暂不作答。"
        }
        (RefusalReason::BudgetExhausted, Language::Zh) => {
            "检索超出时间预算，未能在时限内获取可核验的政府来源，暂不作答。"
        }
        (RefusalReason::NoGroundedSources, Language::En) => {
            "No directly quotable provision was found in verified government sources, so no answer is given."
        }
        (RefusalReason::BackendsUnavailable, Language::En) => {
            "Retrieval services are currently unavailable and no verified government source could be reached, so no answer is given."
        }
        (RefusalReason::BudgetExhausted, Language::En) => {
            "Retrieval ran out of its time budget before a verified government source was found, so no answer is given."
        }
    }
}

fn guidance_tips(query: &Query, language: Language, reason: RefusalReason) -> Vec<String> {
    let mut tips = Vec::<String>::new();
    let zh = language == Language::Zh;

    match query.jurisdiction() {
        None => tips.push(if zh {
            "请指定项目所在省份（如 gd 广东、js 江苏），以便检索地方政策文件。".to_string()
        } else {
            "Specify the project's province (for example gd for Guangdong) to search local policy documents.".to_string()
        }),
        Some(jurisdiction) => tips.push(if zh {
            format!(
                "可直接查阅{}政府门户网站 {} 的政策文件栏目。",
                jurisdiction.display_name(language),
                jurisdiction.gov_host()
            )
        } else {
            format!(
                "Check the policy section of the {} government portal at {}.",
                jurisdiction.display_name(language),
                jurisdiction.gov_host()
            )
        }),
    }

    if query.asset_category().is_none() {
        tips.push(if zh {
            "请指定资产类型（如 solar 光伏、wind 风电、storage 储能）。".to_string()
        } else {
            "Specify the asset category (solar, wind, storage, hydro, thermal or grid).".to_string()
        });
    }

    if query.document_category() == DocumentCategory::All {
        tips.push(if zh {
            "可限定文件类别（如 grid_connection 并网、permitting 审批）以缩小检索范围。".to_string()
        } else {
            "Narrow the document category (for example grid_connection or permitting).".to_string()
        });
    }

    tips.push(if zh {
        "尝试使用文件名称、文号或关键术语（如“并网验收”）重新提问。".to_string()
    } else {
        "Rephrase using the document title, its reference number, or key regulatory terms.".to_string()
    });

    if matches!(
        reason,
        RefusalReason::BackendsUnavailable | RefusalReason::BudgetExhausted
    ) {
        tips.push(if zh {
            "检索服务恢复后请稍后重试。".to_string()
        } else {
            "Retry later once the retrieval services recover.".to_string()
        });
    }

    tips
}
