use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::quiz::{Letter, QuizItem};

pub const MIN_QUESTION_LEN: usize = 8;

static LETTER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z]\s*\)\s*").expect("letter marker pattern is valid"));

/// A quiz entry as the model sent it, coerced to strings but not yet checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateItem {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanation: Option<String>,
}

/// Lenient pass: every element of the array becomes a candidate, whatever it holds.
pub fn normalize(parsed: &[Value]) -> Vec<CandidateItem> {
    parsed.iter().map(normalize_one).collect()
}

fn normalize_one(value: &Value) -> CandidateItem {
    let options = match value.get("options") {
        Some(Value::Array(options)) => options.iter().map(coerce_string).collect(),
        _ => Vec::new(),
    };
    let explanation = value
        .get("explanation")
        .filter(|explanation| !is_falsy(explanation))
        .map(coerce_string)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    CandidateItem {
        question: value
            .get("question")
            .map(coerce_string)
            .unwrap_or_default()
            .trim()
            .to_string(),
        options,
        answer: value
            .get("answer")
            .map(coerce_string)
            .unwrap_or_default()
            .trim()
            .to_uppercase(),
        explanation,
    }
}

/// `false`, `0`, `""` and `null` mean "no value" when the model writes them.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Strict pass: keeps candidates that satisfy the item schema, in order,
/// until `expected_count` are collected. `None` when nothing survives.
pub fn validate(items: Vec<CandidateItem>, expected_count: usize) -> Option<Vec<QuizItem>> {
    let valid: Vec<QuizItem> = items
        .into_iter()
        .filter_map(check)
        .take(expected_count)
        .collect();

    if valid.is_empty() {
        None
    } else {
        Some(valid)
    }
}

fn check(item: CandidateItem) -> Option<QuizItem> {
    if item.question.trim().chars().count() < MIN_QUESTION_LEN {
        return None;
    }
    let answer = Letter::parse(&item.answer)?;
    let options: [String; 4] = item.options.try_into().ok()?;
    let options = Letter::ALL.map(|letter| with_marker(letter, &options[letter.index()]));

    Some(QuizItem::new(
        item.question.trim().to_string(),
        options,
        answer,
        item.explanation,
    ))
}

/// Makes sure `option` starts with `"{letter}) "`, replacing any other
/// single-letter marker it carries.
pub fn with_marker(letter: Letter, option: &str) -> String {
    let marker = letter.marker();
    if option.starts_with(&marker) {
        return option.to_string();
    }
    let body = LETTER_MARKER.replace(option, "");
    format!("{}{}", marker, body.trim_start())
}
