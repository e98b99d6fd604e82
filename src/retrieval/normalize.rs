use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

// Ordered: an explicit "takes effect" phrase beats any earlier publication date.
static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"([0-9]{4})\s*年\s*([0-9]{1,2})\s*月\s*([0-9]{1,2})\s*日\s*起?\s*(?:施行|实施|生效|执行)",
        r"([0-9]{4})\s*年\s*([0-9]{1,2})\s*月\s*([0-9]{1,2})\s*日",
        r"([0-9]{4})-([0-9]{1,2})-([0-9]{1,2})",
        r"([0-9]{4})/([0-9]{1,2})/([0-9]{1,2})",
        r"([0-9]{4})\.([0-9]{1,2})\.([0-9]{1,2})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid effective date pattern"))
    .collect()
});

// Longer phrases first so "是否" is removed before any shorter overlap.
const CJK_STOP_PHRASES: &[&str] = &[
    "有没有", "请问", "需要", "哪些", "什么", "怎么", "如何", "是否", "可以", "应该", "一下",
    "相关", "有关", "关于", "以及", "的", "了", "吗", "呢", "和", "与", "或",
];

const LATIN_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "do", "does", "for", "from", "how", "in", "into",
    "is", "of", "on", "or", "the", "to", "what", "which", "with",
];

pub fn normalize(text: &str) -> String {
    let cleaned = text
        .chars()
        .filter(|character| !is_stripped_char(*character))
        .map(to_half_width)
        .collect::<String>();

    cleaned.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn extract_effective_date(text: &str) -> Option<NaiveDate> {
    let normalized = normalize(text);
    for pattern in DATE_PATTERNS.iter() {
        for captures in pattern.captures_iter(&normalized) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            if !digit_bounded(&normalized, whole.start(), whole.end()) {
                continue;
            }
            let year = captures.get(1).and_then(|value| value.as_str().parse::<i32>().ok());
            let month = captures.get(2).and_then(|value| value.as_str().parse::<u32>().ok());
            let day = captures.get(3).and_then(|value| value.as_str().parse::<u32>().ok());
            let (Some(year), Some(month), Some(day)) = (year, month, day) else {
                continue;
            };
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }
    None
}

// Matches embedded in a longer digit run are serial numbers, not dates.
fn digit_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|value| value.is_ascii_digit())
        && !after.is_some_and(|value| value.is_ascii_digit())
}

pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut cleaned = normalize(text).to_lowercase();
    for stop in CJK_STOP_PHRASES {
        cleaned = cleaned.replace(stop, " ");
    }

    let mut tokens = Vec::<String>::new();
    let mut cjk_run = Vec::<char>::new();
    let mut latin_run = String::new();

    for character in cleaned.chars() {
        if is_cjk(character) {
            flush_latin_run(&mut latin_run, &mut tokens);
            cjk_run.push(character);
        } else if character.is_alphanumeric() {
            flush_cjk_run(&mut cjk_run, &mut tokens);
            latin_run.push(character);
        } else {
            flush_latin_run(&mut latin_run, &mut tokens);
            flush_cjk_run(&mut cjk_run, &mut tokens);
        }
    }
    flush_latin_run(&mut latin_run, &mut tokens);
    flush_cjk_run(&mut cjk_run, &mut tokens);

    tokens.sort();
    tokens.dedup();
    tokens
}

pub fn is_cjk(character: char) -> bool {
    matches!(
        character,
        '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}'
    )
}

fn flush_cjk_run(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    if run.len() >= 2 {
        tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
    }
    run.clear();
}

fn flush_latin_run(run: &mut String, tokens: &mut Vec<String>) {
    let keep = (run.chars().count() >= 2 || run.chars().all(|character| character.is_ascii_digit()))
        && !run.is_empty()
        && LATIN_STOPWORDS.iter().all(|stopword| stopword != run);
    if keep {
        tokens.push(run.clone());
    }
    run.clear();
}

fn is_stripped_char(character: char) -> bool {
    if character.is_control() && !character.is_whitespace() {
        return true;
    }
    matches!(
        character,
        '\u{00AD}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

fn to_half_width(character: char) -> char {
    match character {
        '\u{3000}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(character as u32 - 0xFEE0).unwrap_or(character),
        _ => character,
    }
}
