//! Interpreting agent output.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Stderr lines that are noise rather than answers.
const NOISE_MARKERS: &[&str] = &["Loaded cached credentials", "DeprecationWarning"];

/// Picks the reply text: stdout, or filtered stderr when stdout is empty.
pub fn clean_output(stdout: &str, stderr: &str) -> String {
    let out = stdout.trim();
    if !out.is_empty() {
        return out.to_string();
    }
    stderr
        .lines()
        .filter(|line| !NOISE_MARKERS.iter().any(|m| line.contains(m)))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether an error message says the agent rejected its session id.
pub fn is_session_invalid(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("session")
        && ["not found", "invalid", "expired"]
            .iter()
            .any(|kw| lower.contains(kw))
}

/// First capture group of the last match of `pattern` in `text`.
pub fn extract_session_id(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .last()
}

/// A file the agent asked to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteRequest {
    pub path: String,
    pub content: String,
}

fn write_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<WRITE_FILE path=['"](.*?)['"]>(.*?)</WRITE_FILE>"#)
            .expect("Invalid regex pattern")
    })
}

/// Splits `<WRITE_FILE>` blocks out of a reply.
///
/// Returns the display text (each block replaced by a placeholder line)
/// and the requests in order of appearance.
pub fn extract_file_writes(text: &str) -> (String, Vec<FileWriteRequest>) {
    let pattern = write_file_pattern();
    let requests = pattern
        .captures_iter(text)
        .map(|caps| FileWriteRequest {
            path: caps[1].to_string(),
            content: caps[2].to_string(),
        })
        .collect();
    let display = pattern
        .replace_all(text, |caps: &regex::Captures| {
            format!("[file write request: {}]", &caps[1])
        })
        .into_owned();
    (display, requests)
}
