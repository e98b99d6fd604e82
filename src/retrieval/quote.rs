use super::normalize::normalize;

pub const MIN_QUOTE_OVERLAP: f64 = 0.30;

const MIN_SPAN_CHARS: usize = 6;
const LONG_SPAN_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSpan {
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

pub fn extract_quotes(
    source_text: &str,
    query_keywords: &[String],
    max_quotes: usize,
) -> Vec<String> {
    extract_quote_spans(source_text, query_keywords, max_quotes)
        .into_iter()
        .filter_map(|span| source_text.get(span.start..span.end))
        .map(str::to_string)
        .collect()
}

pub fn extract_quote_spans(
    source_text: &str,
    query_keywords: &[String],
    max_quotes: usize,
) -> Vec<QuoteSpan> {
    if max_quotes == 0 || query_keywords.is_empty() {
        return Vec::new();
    }

    let mut scored = sentence_spans(source_text)
        .into_iter()
        .filter_map(|(start, end)| {
            let span = source_text.get(start..end)?;
            let score = span_score(span, query_keywords);
            (score >= MIN_QUOTE_OVERLAP).then_some(QuoteSpan { start, end, score })
        })
        .collect::<Vec<QuoteSpan>>();

    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.start.cmp(&right.start))
    });
    scored.truncate(max_quotes);
    scored.sort_by_key(|span| span.start);
    scored
}

fn span_score(span: &str, query_keywords: &[String]) -> f64 {
    let haystack = normalize(span).to_lowercase();
    let hits = query_keywords
        .iter()
        .filter(|keyword| haystack.contains(keyword.as_str()))
        .count();
    if hits == 0 {
        return 0.0;
    }

    let mut score = hits as f64 / query_keywords.len() as f64;
    if span.chars().count() > LONG_SPAN_CHARS {
        score -= 0.02;
    }
    score
}

fn is_terminal(character: char, next: Option<char>) -> bool {
    match character {
        '。' | '！' | '？' | '；' | '!' | '?' | ';' | '\n' | '\r' => true,
        // "1.5 MW" and "www.gov.cn" stay inside one span.
        '.' => next.is_none_or(char::is_whitespace),
        _ => false,
    }
}

fn is_closing_mark(character: char) -> bool {
    matches!(character, '”' | '’' | '"' | '\'' | '）' | ')' | '」' | '』' | '】')
}

fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::<(usize, usize)>::new();
    let mut start = 0usize;
    let mut characters = text.char_indices().peekable();

    while let Some((index, character)) = characters.next() {
        let next = characters.peek().map(|(_, value)| *value);
        if !is_terminal(character, next) {
            continue;
        }

        let mut end = index + character.len_utf8();
        while let Some((closing_index, closing)) = characters.peek().copied() {
            if !is_closing_mark(closing) || matches!(character, '\n' | '\r') {
                break;
            }
            end = closing_index + closing.len_utf8();
            characters.next();
        }

        push_trimmed_span(text, start, end, &mut spans);
        start = end;
    }
    push_trimmed_span(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed_span(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let Some(raw) = text.get(start..end) else {
        return;
    };
    let leading = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_SPAN_CHARS {
        return;
    }
    let span_start = start + leading;
    spans.push((span_start, span_start + trimmed.len()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::normalize::extract_keywords;

    const NOTICE: &str = "第一条 为规范分布式光伏发电项目管理，制定本办法。\n\
        第二条 项目并网验收时，项目单位应当提交并网验收申请表、竣工验收资料和调试报告。\
        第三条 电网企业应当在10个工作日内完成并网验收。\
        第四条 本办法自2024年6月1日起施行。";

    #[test]
    fn quotes_are_verbatim_substrings_in_source_order() {
        let keywords = extract_keywords("并网验收需要哪些资料？");
        let quotes = extract_quotes(NOTICE, &keywords, 2);

        assert_eq!(quotes.len(), 2);
        for quote in &quotes {
            assert!(NOTICE.contains(quote.as_str()), "not verbatim: {quote}");
        }
        assert!(quotes[0].starts_with("第二条"));
        assert!(quotes[1].starts_with("第三条"));
        let first = NOTICE.find(quotes[0].as_str()).unwrap_or(usize::MAX);
        let second = NOTICE.find(quotes[1].as_str()).unwrap_or(0);
        assert!(first < second);
    }

    #[test]
    fn highest_scoring_span_wins_when_limited_to_one() {
        let keywords = extract_keywords("并网验收资料");
        let quotes = extract_quotes(NOTICE, &keywords, 1);
        assert_eq!(quotes.len(), 1);
        assert!(quotes[0].contains("竣工验收资料"));
    }

    #[test]
    fn equal_scores_fall_back_to_position() {
        let text = "储能电站应当配置消防设施。储能电站应当配置监控系统。";
        let keywords = vec!["储能".to_string()];
        let spans = extract_quote_spans(text, &keywords, 1);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
    }

    #[test]
    fn no_quotes_when_overlap_is_below_threshold() {
        let keywords = extract_keywords("海上风电用海审批");
        assert!(extract_quotes(NOTICE, &keywords, 3).is_empty());
        assert!(extract_quotes(NOTICE, &[], 3).is_empty());
        assert!(extract_quotes(NOTICE, &keywords, 0).is_empty());
    }

    #[test]
    fn decimal_points_and_hosts_do_not_split_spans() {
        let text = "Projects above 1.5 MW must file at www.nea.gov.cn before connection. Other text here.";
        let keywords = vec!["1.5".to_string(), "file".to_string()];
        let quotes = extract_quotes(text, &keywords, 1);
        assert_eq!(
            quotes,
            vec!["Projects above 1.5 MW must file at www.nea.gov.cn before connection."]
        );
    }

    #[test]
    fn closing_quotes_stay_attached_and_whitespace_is_trimmed() {
        let text = "  通知要求：“项目应当完成并网验收。”  其他内容不相关。";
        let keywords = vec!["并网".to_string(), "验收".to_string()];
        let quotes = extract_quotes(text, &keywords, 1);
        assert_eq!(quotes, vec!["通知要求：“项目应当完成并网验收。”"]);
    }

    #[test]
    fn full_width_text_still_matches_normalized_keywords() {
        let text = "ＰＶ项目须在并网前备案。";
        let keywords = vec!["pv".to_string()];
        assert_eq!(extract_quotes(text, &keywords, 1), vec![text.to_string()]);
    }
}
