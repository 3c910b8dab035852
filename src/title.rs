use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("インタビュー】(?P<subject>.*)さんインタビュー（インタビューアー：(?P<interviewers>.*)さん")
        .unwrap()
});
static SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("・|、").unwrap());

const HONORIFIC: &str = "さん";

/// Names extracted from one interview title. No identity; recomputed per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleInfo {
    pub subject: String,
    pub interviewers: Vec<String>,
}

/// Strip ordinary and full-width spaces. Also used as the directory key.
pub fn normalize_name(name: &str) -> String {
    name.chars().filter(|c| *c != ' ' && *c != '\u{3000}').collect()
}

/// Extract the interviewee and interviewer names embedded in an interview
/// title. Titles outside the fixed pattern are an error; callers treat that
/// as record-scoped and keep going.
pub fn extract(title: &str) -> Result<TitleInfo> {
    let caps = TITLE_RE
        .captures(title)
        .with_context(|| format!("Title does not match the interview pattern: {title}"))?;

    let interviewers = SPLIT_RE
        .split(&caps["interviewers"])
        .map(|name| normalize_name(name.strip_suffix(HONORIFIC).unwrap_or(name)))
        .collect();

    Ok(TitleInfo {
        subject: normalize_name(&caps["subject"]),
        interviewers,
    })
}

// ── Tests ──
