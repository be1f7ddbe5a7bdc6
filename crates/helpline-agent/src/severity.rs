//! Severity classification.

use helpline_core::types::Severity;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
}

fn mentions(text: &str, keywords: &[&str]) -> bool {
    words(text).any(|w| keywords.contains(&w.as_str()))
}

/// Read a severity level out of free text ("HIGH", "urgent - high", "Low.").
pub fn parse_severity(text: &str) -> Option<Severity> {
    if mentions(text, &["high"]) {
        Some(Severity::High)
    } else if mentions(text, &["low"]) {
        Some(Severity::Low)
    } else if mentions(text, &["medium"]) {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// Keyword classification used when the model is not consulted.
pub fn keyword_severity(speech: &str) -> Severity {
    if mentions(speech, &["high", "urgent", "critical", "emergency"]) {
        Severity::High
    } else if mentions(speech, &["low", "minor"]) {
        Severity::Low
    } else {
        Severity::Medium
    }
}

pub fn severity_prompt(speech: &str) -> String {
    format!(
        "\"{speech}\"\n\nClassify the severity of the issue above as either \"High\", \"Medium\", \
         or \"Low\". Return only the severity level as a single word."
    )
}

/// Model reply to a severity prompt; anything unclear is Medium.
pub fn severity_from_reply(reply: &str) -> Severity {
    parse_severity(reply).unwrap_or_default()
}
