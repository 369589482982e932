//! Output sanitizers.
//!
//! LLM responses arrive as loosely formatted text; each field kind has
//! a parser that strips markdown noise and produces the stored value.
//! Parsers are lenient about formatting but fail (permanently, no
//! retry) when nothing usable remains.

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

use super::fields::ParseKind;

lazy_static! {
    static ref BULLET_PREFIX: Regex = Regex::new(r"^\s*[-*•]\s+").unwrap();
    static ref NUMBER_PREFIX: Regex = Regex::new(r"^\s*\d+\s*[.)]\s+").unwrap();
    static ref QUESTION_PREFIX: Regex = Regex::new(r"(?i)^\s*(?:q\d*|question\s*\d*)\s*[:.]\s*").unwrap();
    static ref ANSWER_PREFIX: Regex = Regex::new(r"(?i)^\s*(?:a\d*|answer\s*\d*)\s*[:.]\s*").unwrap();
    static ref PROS_HEADER: Regex = Regex::new(r"(?i)^\s*(?:\*\*)?pros(?:\*\*)?\s*:?\s*$").unwrap();
    static ref CONS_HEADER: Regex = Regex::new(r"(?i)^\s*(?:\*\*)?cons(?:\*\*)?\s*:?\s*$").unwrap();
}

/// Parse a raw completion into the value stored on the job.
pub fn parse_output(kind: ParseKind, raw: &str) -> Result<Value> {
    let cleaned = strip_code_fences(raw);

    match kind {
        ParseKind::PlainText => parse_plain(&cleaned),
        ParseKind::CommaList => parse_comma_list(&cleaned),
        ParseKind::BulletedList => parse_bulleted(&cleaned),
        ParseKind::NumberedList => parse_numbered(&cleaned),
        ParseKind::FaqPairs => parse_faq(&cleaned),
        ParseKind::ProsCons => parse_pros_cons(&cleaned),
    }
}

/// Extract the string items from a parsed list value.
pub fn value_as_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix("```") {
        // Drop the info string on the opening fence and the closing fence.
        let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        return inner.trim_end_matches('`').trim().to_string();
    }
    trimmed.to_string()
}

fn strip_markers(line: &str) -> String {
    let line = BULLET_PREFIX.replace(line, "");
    let line = NUMBER_PREFIX.replace(&line, "");
    line.trim().trim_matches('*').trim().to_string()
}

fn parse_plain(cleaned: &str) -> Result<Value> {
    let text = cleaned
        .trim()
        .trim_matches('"')
        .trim_matches('\u{201c}')
        .trim_matches('\u{201d}')
        .trim();

    if text.is_empty() {
        bail!("empty text output");
    }

    Ok(Value::String(text.to_string()))
}

fn parse_comma_list(cleaned: &str) -> Result<Value> {
    let items: Vec<String> = cleaned
        .split(|c| c == ',' || c == '\n')
        .map(strip_markers)
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        bail!("empty list output");
    }

    Ok(json!(items))
}

fn parse_bulleted(cleaned: &str) -> Result<Value> {
    let items: Vec<String> = cleaned
        .lines()
        .map(strip_markers)
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        bail!("empty list output");
    }

    Ok(json!(items))
}

fn parse_numbered(cleaned: &str) -> Result<Value> {
    // Prefer explicitly numbered lines; fall back to all non-empty
    // lines when the model skipped the numbering.
    let numbered: Vec<String> = cleaned
        .lines()
        .filter(|l| NUMBER_PREFIX.is_match(l))
        .map(strip_markers)
        .filter(|s| !s.is_empty())
        .collect();

    if !numbered.is_empty() {
        return Ok(json!(numbered));
    }

    parse_bulleted(cleaned)
}

fn parse_faq(cleaned: &str) -> Result<Value> {
    let mut pairs: Vec<Value> = Vec::new();
    let mut question: Option<String> = None;
    let mut answer_lines: Vec<String> = Vec::new();

    let mut flush = |question: &mut Option<String>, answer_lines: &mut Vec<String>| {
        if let Some(q) = question.take() {
            let answer = answer_lines.join(" ").trim().to_string();
            if !answer.is_empty() {
                pairs.push(json!({ "question": q, "answer": answer }));
            }
        }
        answer_lines.clear();
    };

    for line in cleaned.lines() {
        let line = strip_markers(line);
        if line.is_empty() {
            continue;
        }

        let is_question = QUESTION_PREFIX.is_match(&line)
            || (line.ends_with('?') && !ANSWER_PREFIX.is_match(&line));

        if is_question {
            flush(&mut question, &mut answer_lines);
            question = Some(QUESTION_PREFIX.replace(&line, "").trim().to_string());
        } else if question.is_some() {
            answer_lines.push(ANSWER_PREFIX.replace(&line, "").trim().to_string());
        }
    }
    flush(&mut question, &mut answer_lines);

    if pairs.is_empty() {
        bail!("no question/answer pairs found");
    }

    Ok(Value::Array(pairs))
}

fn parse_pros_cons(cleaned: &str) -> Result<Value> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Pros,
        Cons,
    }

    let mut section = Section::None;
    let mut pros: Vec<String> = Vec::new();
    let mut cons: Vec<String> = Vec::new();

    for line in cleaned.lines() {
        if PROS_HEADER.is_match(line) {
            section = Section::Pros;
            continue;
        }
        if CONS_HEADER.is_match(line) {
            section = Section::Cons;
            continue;
        }

        let item = strip_markers(line);
        if item.is_empty() {
            continue;
        }

        match section {
            Section::Pros => pros.push(item),
            Section::Cons => cons.push(item),
            Section::None => {}
        }
    }

    if pros.is_empty() && cons.is_empty() {
        bail!("no pros/cons sections found");
    }

    Ok(json!({ "pros": pros, "cons": cons }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_strips_quotes_and_fences() {
        let value = parse_output(ParseKind::PlainText, "```\n\"Walnut Desk 120cm\"\n```").unwrap();
        assert_eq!(value, Value::String("Walnut Desk 120cm".to_string()));
    }

    #[test]
    fn plain_text_rejects_empty_output() {
        assert!(parse_output(ParseKind::PlainText, "  \"\"  ").is_err());
    }

    #[test]
    fn comma_list_splits_on_commas_and_newlines() {
        let value = parse_output(ParseKind::CommaList, "walnut desk, home office\nsolid wood").unwrap();
        assert_eq!(value, json!(["walnut desk", "home office", "solid wood"]));
    }

    #[test]
    fn bulleted_list_strips_markers() {
        let raw = "- Solid walnut top\n* Steel legs\n• Cable tray";
        let value = parse_output(ParseKind::BulletedList, raw).unwrap();
        assert_eq!(
            value,
            json!(["Solid walnut top", "Steel legs", "Cable tray"])
        );
    }

    #[test]
    fn numbered_list_prefers_numbered_lines() {
        let raw = "Here are the steps:\n1. Unbox the desk\n2) Attach the legs\n3. Mount the top";
        let value = parse_output(ParseKind::NumberedList, raw).unwrap();
        assert_eq!(
            value,
            json!(["Unbox the desk", "Attach the legs", "Mount the top"])
        );
    }

    #[test]
    fn faq_parses_q_a_prefixes() {
        let raw = "Q: Is the desk pre-assembled?\nA: No, assembly takes 20 minutes.\n\
                   Q: What is the weight limit?\nA: 80kg distributed across the top.";
        let value = parse_output(ParseKind::FaqPairs, raw).unwrap();
        let pairs = value.as_array().unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0]["question"], "Is the desk pre-assembled?");
        assert_eq!(pairs[1]["answer"], "80kg distributed across the top.");
    }

    #[test]
    fn faq_accepts_bare_question_lines() {
        let raw = "How wide is the desk?\nIt is 120cm wide.\nDoes it wobble?\nNo, the frame is cross-braced.";
        let value = parse_output(ParseKind::FaqPairs, raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn pros_cons_splits_sections() {
        let raw = "**Pros**\n- Sturdy\n- Easy assembly\n\nCons:\n- Heavy\n- Pricey";
        let value = parse_output(ParseKind::ProsCons, raw).unwrap();
        assert_eq!(value["pros"], json!(["Sturdy", "Easy assembly"]));
        assert_eq!(value["cons"], json!(["Heavy", "Pricey"]));
    }

    #[test]
    fn pros_cons_without_headers_is_malformed() {
        assert!(parse_output(ParseKind::ProsCons, "just some text").is_err());
    }

    #[test]
    fn value_as_list_extracts_strings() {
        assert_eq!(
            value_as_list(&json!(["a", "b"])),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(value_as_list(&Value::String("x".into())).is_empty());
    }
}
