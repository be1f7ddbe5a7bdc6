//! Slot extraction from spoken intake answers.
//!
//! The model is asked for a JSON object with the requested fields. When the
//! reply cannot be parsed (or the request degrades) a pattern pass over the
//! raw utterance recovers what it can. Role keywords are matched locally
//! before any model call.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use helpline_core::ledger::CostLedger;
use helpline_core::store::{CostKind, CostLedgerEntry, ErrorLogEntry};
use helpline_core::types::{NOT_PROVIDED, Slot, is_sentinel, join_slots};
use helpline_providers::gateway::{ModelGateway, RequestTimeout};

use crate::severity::parse_severity;

/// How a result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Model,
    Pattern,
}

/// Fields recovered from one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotExtractionResult {
    /// Only real values; sentinels are left out.
    pub values: BTreeMap<Slot, String>,
    /// Requested slots this utterance did not supply.
    pub missing_fields: Vec<Slot>,
    pub source: ExtractionSource,
}

impl SlotExtractionResult {
    fn new(values: BTreeMap<Slot, String>, requested: &[Slot], source: ExtractionSource) -> Self {
        let missing_fields = requested
            .iter()
            .copied()
            .filter(|s| !values.contains_key(s))
            .collect();
        Self {
            values,
            missing_fields,
            source,
        }
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.values.get(&slot).map(String::as_str)
    }
}

static ROLE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(doctor|physician|md|surgeon|cardiologist)\b", "Doctor"),
        (r"(?i)\b(nurse|rn|lpn)\b", "Nurse"),
        (r"(?i)\b(admin|administrator|staff)\b", "Administrator"),
        (r"(?i)\b(technician|tech|laboratory)\b", "Technician"),
        (r"(?i)\b(patient|client)\b", "Patient"),
    ]
    .into_iter()
    .map(|(p, role)| (Regex::new(p).expect("role pattern"), role))
    .collect()
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:name is|i am|i'm)\s+([A-Za-z]+)").expect("name pattern")
});

static DEPARTMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:department|dept|from)\s+(?:is\s+|of\s+|the\s+)?([A-Za-z]+)")
        .expect("department pattern")
});

/// Words that follow "I am" / "I'm" without being a name.
const NOT_A_NAME: &[&str] = &[
    "a", "an", "the", "from", "in", "with", "calling", "having", "not", "just", "still", "trying",
    "working", "on", "at", "here", "so", "very", "really", "unable",
];

/// Role named anywhere in the utterance, from a fixed keyword table.
pub fn role_from_text(text: &str) -> Option<&'static str> {
    ROLE_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, role)| *role)
}

/// Pattern-only extraction of name, department and role.
pub fn pattern_extract(speech: &str) -> BTreeMap<Slot, String> {
    let mut values = BTreeMap::new();

    let name = NAME_RE
        .captures_iter(speech)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|w| !NOT_A_NAME.contains(&w.to_ascii_lowercase().as_str()));
    if let Some(name) = name {
        values.insert(Slot::Name, name.to_string());
    }
    if let Some(dept) = DEPARTMENT_RE.captures(speech).and_then(|c| c.get(1)) {
        values.insert(Slot::Department, dept.as_str().to_string());
    }
    if let Some(role) = role_from_text(speech) {
        values.insert(Slot::Role, role.to_string());
    }
    values
}

/// Prompt asking for `requested` as a JSON object.
pub fn extraction_prompt(speech: &str, requested: &[Slot]) -> String {
    let mut prompt = format!(
        "\"{speech}\"\n\nExtract from the text above: {}. Format as JSON with these fields. \
         If any field is missing, set it to \"{NOT_PROVIDED}\".",
        join_slots(requested)
    );
    if requested.contains(&Slot::Severity) {
        prompt.push_str(" Severity must be one of High, Medium or Low.");
    }
    prompt
}

/// Parse the first `{ ... }` object in a model reply into slot values.
///
/// Returns `None` when no JSON object can be read at all.
pub fn parse_model_json(reply: &str, requested: &[Slot]) -> Option<BTreeMap<Slot, String>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&reply[start..=end]).ok()?;

    let mut values = BTreeMap::new();
    for (key, value) in object {
        let Some(slot) = Slot::from_key(&key) else {
            continue;
        };
        if !requested.contains(&slot) {
            continue;
        }
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => continue,
            other => other.to_string(),
        };
        if is_sentinel(&text) {
            continue;
        }
        let text = if slot == Slot::Severity {
            match parse_severity(&text) {
                Some(sev) => sev.as_str().to_string(),
                None => continue,
            }
        } else {
            text.trim().to_string()
        };
        values.insert(slot, text);
    }
    Some(values)
}

pub struct SlotExtractor {
    gateway: Arc<ModelGateway>,
    ledger: CostLedger,
    model: String,
    timeout: RequestTimeout,
}

impl SlotExtractor {
    pub fn new(
        gateway: Arc<ModelGateway>,
        ledger: CostLedger,
        model: impl Into<String>,
        timeout: RequestTimeout,
    ) -> Self {
        Self {
            gateway,
            ledger,
            model: model.into(),
            timeout,
        }
    }

    pub async fn extract(
        &self,
        call_id: &str,
        speech: &str,
        requested: &[Slot],
    ) -> SlotExtractionResult {
        let quick_role = requested
            .contains(&Slot::Role)
            .then(|| role_from_text(speech))
            .flatten();

        let prompt = extraction_prompt(speech, requested);
        let parsed = match self.gateway.request(&prompt, &self.model, self.timeout).await {
            Ok(response) => {
                if !response.cached {
                    self.ledger.append(CostLedgerEntry::model(
                        call_id,
                        CostKind::PromptExtraction,
                        &response.model,
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                        response.cost,
                        response.degraded,
                    ));
                }
                if response.degraded {
                    None
                } else {
                    let parsed = parse_model_json(&response.text, requested);
                    if parsed.is_none() {
                        debug!(call_id, reply = %response.text, "Extraction reply was not JSON");
                    }
                    parsed
                }
            }
            Err(e) => {
                warn!(call_id, error = %e, "Extraction request refused");
                self.ledger
                    .log_error(ErrorLogEntry::new(call_id, "extraction", e.to_string()));
                None
            }
        };

        let (mut values, source) = match parsed {
            Some(values) => (values, ExtractionSource::Model),
            None => {
                let mut values = pattern_extract(speech);
                values.retain(|slot, _| requested.contains(slot));
                (values, ExtractionSource::Pattern)
            }
        };
        if let Some(role) = quick_role {
            values.entry(Slot::Role).or_insert_with(|| role.to_string());
        }

        let result = SlotExtractionResult::new(values, requested, source);
        debug!(
            call_id,
            source = ?result.source,
            missing = %join_slots(&result.missing_fields),
            "Slots extracted"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTAKE: [Slot; 4] = [Slot::Name, Slot::Role, Slot::Department, Slot::Issue];

    #[test]
    fn test_role_table() {
        assert_eq!(role_from_text("I'm a staff nurse on ward 3"), Some("Nurse"));
        assert_eq!(role_from_text("this is Dr Patel, a cardiologist"), Some("Doctor"));
        assert_eq!(role_from_text("lab tech here"), Some("Technician"));
        assert_eq!(role_from_text("I'd like to return a call"), None);
    }

    #[test]
    fn test_pattern_name_and_department() {
        let values = pattern_extract("My name is Alice, I'm from Cardiology");
        assert_eq!(values.get(&Slot::Name).map(String::as_str), Some("Alice"));
        assert_eq!(
            values.get(&Slot::Department).map(String::as_str),
            Some("Cardiology")
        );
    }

    #[test]
    fn test_pattern_skips_filler_after_i_am() {
        let values = pattern_extract("I'm calling from the radiology department, I am Bob");
        assert_eq!(values.get(&Slot::Name).map(String::as_str), Some("Bob"));
        assert_eq!(
            values.get(&Slot::Department).map(String::as_str),
            Some("radiology")
        );
    }

    #[test]
    fn test_pattern_nothing() {
        assert!(pattern_extract("hello there").is_empty());
    }

    #[test]
    fn test_parse_json_with_surrounding_text() {
        let reply = "Sure! Here it is:\n{\"name\": \"Alice\", \"role\": \"Not provided\", \
                     \"department\": \"Cardiology\", \"issue\": \"Epic is frozen\"}\nThanks";
        let values = parse_model_json(reply, &INTAKE).unwrap();
        assert_eq!(values.get(&Slot::Name).map(String::as_str), Some("Alice"));
        assert!(!values.contains_key(&Slot::Role));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_parse_json_ignores_unrequested_and_normalizes_severity() {
        let reply = r#"{"name": "Alice", "severity": "urgent - HIGH", "caller_department": "ICU"}"#;
        let values = parse_model_json(reply, &[Slot::Severity, Slot::Department]).unwrap();
        assert_eq!(values.get(&Slot::Severity).map(String::as_str), Some("High"));
        assert_eq!(values.get(&Slot::Department).map(String::as_str), Some("ICU"));
        assert!(!values.contains_key(&Slot::Name));
    }

    #[test]
    fn test_parse_json_failure() {
        assert!(parse_model_json("name: Alice", &INTAKE).is_none());
        assert!(parse_model_json("} oops {", &INTAKE).is_none());
        assert!(parse_model_json("{not json}", &INTAKE).is_none());
    }

    #[test]
    fn test_prompt_leads_with_speech() {
        let prompt = extraction_prompt("I'm Bob", &[Slot::Name, Slot::Severity]);
        assert!(prompt.starts_with("\"I'm Bob\""));
        assert!(prompt.contains("name, severity"));
        assert!(prompt.contains("High, Medium or Low"));
    }

    #[test]
    fn test_missing_fields() {
        let mut values = BTreeMap::new();
        values.insert(Slot::Name, "Alice".to_string());
        let result = SlotExtractionResult::new(values, &INTAKE, ExtractionSource::Pattern);
        assert_eq!(
            result.missing_fields,
            vec![Slot::Role, Slot::Department, Slot::Issue]
        );
        assert_eq!(result.get(Slot::Name), Some("Alice"));
    }
}
