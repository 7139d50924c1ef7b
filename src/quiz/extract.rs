//! Pulls the JSON array out of whatever prose the model wrapped around it.

use serde_json::Value;

/// Returns the first balanced `[...]` slice of `text` that parses as a JSON
/// array of objects. Brackets inside string literals are ignored while
/// balancing, and brackets nested in a region that was already tried are
/// never tried on their own: a broken quiz array must not yield one of its
/// `options` arrays.
///
/// When no balanced slice parses, the span from the first `[` to the last
/// `]` is tried as a last resort.
pub fn extract(text: &str) -> Option<&str> {
    let mut scanned_until = 0;
    for (start, _) in text.match_indices('[') {
        if start < scanned_until {
            continue;
        }
        let Some(end) = balanced_end(&text[start..]) else {
            continue;
        };
        let candidate = &text[start..=start + end];
        if parses_as_array(candidate) {
            return Some(candidate);
        }
        scanned_until = start + end + 1;
    }

    outermost_span(text).filter(|candidate| parses_as_array(candidate))
}

/// First `[` through last `]`, inclusive. Mis-slices text with several
/// bracketed regions or brackets inside strings; `extract` only uses it
/// after the balanced scan found nothing.
pub fn outermost_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Byte offset of the `]` closing the `[` at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parses_as_array(candidate: &str) -> bool {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Array(items)) => items.iter().all(Value::is_object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIZ: &str = r#"[{"question":"What is 2+2?","options":["A) 3","B) 4","C) 5","D) 6"],"answer":"B"}]"#;

    #[test]
    fn recovers_array_from_surrounding_prose() {
        let text = format!("Sure! Here is your quiz:\n{}\nHope this helps.", QUIZ);
        assert_eq!(extract(&text), Some(QUIZ));
    }

    #[test]
    fn fails_without_closing_bracket() {
        assert_eq!(extract("[{\"question\": \"unfinished\""), None);
        assert_eq!(extract("no brackets here"), None);
    }

    #[test]
    fn fails_when_close_precedes_open() {
        assert_eq!(extract("] then ["), None);
        assert_eq!(outermost_span("] then ["), None);
    }

    #[test]
    fn skips_bracketed_prose_before_the_array() {
        let text = format!("[note] the model says: {} [end]", QUIZ);
        assert_eq!(extract(&text), Some(QUIZ));
        // The naive span would have swallowed everything.
        assert_eq!(outermost_span(&text), Some(text.as_str()));
    }

    #[test]
    fn ignores_brackets_inside_strings() {
        let text = r#"Output: [{"question":"Which is a slice: [T] or T?","options":[],"answer":"A"}] done"#;
        let extracted = extract(text).unwrap();
        assert!(extracted.starts_with("[{\"question\""));
        assert!(extracted.ends_with("\"answer\":\"A\"}]"));
    }

    #[test]
    fn handles_escaped_quotes() {
        let text = r#"[{"question":"Say \"hi]\" twice","answer":"A"}]"#;
        assert_eq!(extract(text), Some(text));
    }

    #[test]
    fn broken_quiz_array_does_not_yield_its_options() {
        let text = r#"[{"question":"Which pigment captures light?","options":["A) Chlorophyll","B) Keratin","C) Melanin","D) Lignin"],"answer":"A",}]"#;
        assert_eq!(extract(text), None);
    }

    #[test]
    fn unclosed_quiz_array_does_not_yield_its_options() {
        let text = r#"[{"question":"Which pigment captures light?","options":["A) Chlorophyll","B) Keratin"]"#;
        assert_eq!(extract(text), None);
    }

    #[test]
    fn rejects_non_json_brackets() {
        assert_eq!(extract("[not json] and [also not]"), None);
    }
}
