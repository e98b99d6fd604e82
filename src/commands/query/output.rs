use std::io::{self, Write};

use anyhow::{Context, Result};

use crate::retrieval::pipeline::{AttemptSummary, QueryResponse};

pub(super) fn write_json_response(response: &QueryResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(super) fn write_text_response(response: &QueryResponse) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    render_text(response, &mut output)?;
    output.flush()?;
    Ok(())
}

fn render_text(response: &QueryResponse, output: &mut impl Write) -> Result<()> {
    match response {
        QueryResponse::Answer {
            mode,
            body,
            citations,
            trace_id,
            elapsed_ms,
            attempts,
            ..
        } => {
            writeln!(output, "{body}")?;
            writeln!(output)?;
            writeln!(output, "Sources:")?;
            for (index, citation) in citations.iter().enumerate() {
                writeln!(output, "[{}]\t{}", index + 1, citation.title)?;
                writeln!(output, "\turl: {}", citation.url)?;
                if let Some(effective_date) = citation.effective_date {
                    writeln!(output, "\teffective: {}", effective_date.format("%Y-%m-%d"))?;
                }
            }
            writeln!(
                output,
                "mode={} trace_id={} elapsed_ms={}",
                mode.as_str(),
                trace_id,
                elapsed_ms
            )?;
            write_attempts(output, attempts)?;
        }
        QueryResponse::Refusal {
            refusal_message,
            guidance_tips,
            trace_id,
            elapsed_ms,
            attempts,
            ..
        } => {
            writeln!(output, "{refusal_message}")?;
            for tip in guidance_tips {
                writeln!(output, "- {tip}")?;
            }
            writeln!(output)?;
            writeln!(output, "mode=refusal trace_id={trace_id} elapsed_ms={elapsed_ms}")?;
            write_attempts(output, attempts)?;
        }
        QueryResponse::Error {
            message, trace_id, ..
        } => {
            writeln!(output, "error: {message} (trace_id={trace_id})")?;
        }
    }
    Ok(())
}

fn write_attempts(output: &mut impl Write, attempts: &[AttemptSummary]) -> Result<()> {
    for attempt in attempts {
        write!(
            output,
            "\t{}: {} elapsed_ms={} chunks={} retries={} dropped_untrusted={}",
            attempt.backend,
            attempt.status.as_str(),
            attempt.elapsed_ms,
            attempt.chunk_count,
            attempt.retries,
            attempt.dropped_untrusted
        )?;
        if let Some(error) = &attempt.error {
            write!(output, " error={error}")?;
        }
        writeln!(output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::model::{AnswerMode, AttemptStatus, BackendName, Citation};

    fn render(response: &QueryResponse) -> String {
        let mut buffer = Vec::<u8>::new();
        render_text(response, &mut buffer).expect("render");
        String::from_utf8(buffer).expect("utf8")
    }

    #[test]
    fn answer_text_lists_sources_and_attempts() {
        let response = QueryResponse::Answer {
            mode: AnswerMode::VectorRag,
            body: "1. 项目并网验收时应当提交资料。 [1]《办法》（2024-06-01施行）".to_string(),
            citations: vec![Citation {
                title: "办法".to_string(),
                url: "https://drc.gd.gov.cn/a".to_string(),
                effective_date: NaiveDate::from_ymd_opt(2024, 6, 1),
                quote: Some("项目并网验收时应当提交资料。".to_string()),
            }],
            trace_id: "q-1".to_string(),
            elapsed_ms: 12,
            states: Vec::new(),
            attempts: vec![AttemptSummary {
                backend: BackendName::VectorSearch,
                status: AttemptStatus::Success,
                elapsed_ms: 10,
                chunk_count: 1,
                retries: 0,
                dropped_untrusted: 0,
                error: None,
            }],
        };

        let text = render(&response);
        assert!(text.contains("[1]\t办法"));
        assert!(text.contains("\turl: https://drc.gd.gov.cn/a"));
        assert!(text.contains("\teffective: 2024-06-01"));
        assert!(text.contains("mode=vector_rag trace_id=q-1"));
        assert!(text.contains("vector_search: success"));
    }

    #[test]
    fn refusal_and_error_text() {
        let refusal = QueryResponse::Refusal {
            mode: AnswerMode::Refusal,
            refusal_message: "暂不作答。".to_string(),
            guidance_tips: vec!["请指定省份。".to_string()],
            trace_id: "q-2".to_string(),
            elapsed_ms: 3,
            states: Vec::new(),
            attempts: vec![AttemptSummary {
                backend: BackendName::WebQa,
                status: AttemptStatus::Error,
                elapsed_ms: 2,
                chunk_count: 0,
                retries: 1,
                dropped_untrusted: 0,
                error: Some("web_qa server error (HTTP 502)".to_string()),
            }],
        };
        let text = render(&refusal);
        assert!(text.starts_with("暂不作答。\n- 请指定省份。"));
        assert!(text.contains("error=web_qa server error (HTTP 502)"));

        let error = QueryResponse::Error {
            error: true,
            message: "question must not be empty".to_string(),
            trace_id: "q-3".to_string(),
        };
        assert_eq!(
            render(&error),
            "error: question must not be empty (trace_id=q-3)\n"
        );
    }
}
