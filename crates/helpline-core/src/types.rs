use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default value of every slot until the caller supplies it.
pub const NOT_PROVIDED: &str = "Not provided";

/// Value written when the retry budget runs out on an extraction failure.
pub const UNKNOWN: &str = "Unknown";

/// Whether a slot value still carries one of the placeholder sentinels.
pub fn is_sentinel(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case(NOT_PROVIDED) || v.eq_ignore_ascii_case(UNKNOWN)
}

/// A single structured intake field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Name,
    Role,
    Department,
    Issue,
    Severity,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::Name,
        Slot::Role,
        Slot::Department,
        Slot::Issue,
        Slot::Severity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Name => "name",
            Slot::Role => "role",
            Slot::Department => "department",
            Slot::Issue => "issue",
            Slot::Severity => "severity",
        }
    }

    /// Parse a JSON key or field name as spoken back by the model.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "name" | "caller_name" => Some(Slot::Name),
            "role" | "caller_role" => Some(Slot::Role),
            "department" | "dept" | "caller_department" => Some(Slot::Department),
            "issue" | "caller_issue" | "problem" => Some(Slot::Issue),
            "severity" => Some(Slot::Severity),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable list of slots, e.g. "name, department".
pub fn join_slots(slots: &[Slot]) -> String {
    slots
        .iter()
        .map(Slot::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Slot name → value mapping. Every slot is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValues(BTreeMap<Slot, String>);

impl Default for SlotValues {
    fn default() -> Self {
        Self(
            Slot::ALL
                .iter()
                .map(|s| (*s, NOT_PROVIDED.to_string()))
                .collect(),
        )
    }
}

impl SlotValues {
    pub fn get(&self, slot: Slot) -> &str {
        self.0.get(&slot).map(String::as_str).unwrap_or(NOT_PROVIDED)
    }

    pub fn is_filled(&self, slot: Slot) -> bool {
        !is_sentinel(self.get(slot))
    }

    /// Set a slot only while it still holds a sentinel. Returns whether it changed.
    pub fn merge(&mut self, slot: Slot, value: &str) -> bool {
        if self.is_filled(slot) || is_sentinel(value) {
            return false;
        }
        self.0.insert(slot, value.trim().to_string());
        true
    }

    /// Overwrite a slot unconditionally.
    pub fn force(&mut self, slot: Slot, value: &str) {
        self.0.insert(slot, value.to_string());
    }

    /// The subset of `required` that is still unfilled, in the given order.
    pub fn missing(&self, required: &[Slot]) -> Vec<Slot> {
        required
            .iter()
            .copied()
            .filter(|s| !self.is_filled(*s))
            .collect()
    }

    /// The value of a slot if it has been filled.
    pub fn filled(&self, slot: Slot) -> Option<&str> {
        self.is_filled(slot).then(|| self.get(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialogue stage of a call. A call is in exactly one stage at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Greeting,
    CollectingIdentity,
    CollectingIssue,
    CollectingSeverity,
    CollectingAllDetails,
    CollectingMissingFields,
    Streaming,
    Ended,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::CollectingIdentity => "collecting_identity",
            Stage::CollectingIssue => "collecting_issue",
            Stage::CollectingSeverity => "collecting_severity",
            Stage::CollectingAllDetails => "collecting_all_details",
            Stage::CollectingMissingFields => "collecting_missing_fields",
            Stage::Streaming => "streaming",
            Stage::Ended => "ended",
        }
    }

    /// Whether the stage gathers intake slots from spoken answers.
    pub fn is_intake(&self) -> bool {
        matches!(
            self,
            Stage::CollectingIdentity
                | Stage::CollectingIssue
                | Stage::CollectingSeverity
                | Stage::CollectingAllDetails
                | Stage::CollectingMissingFields
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incremental transcription result for a live call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Elapsed audio covered by this result, used for speech billing.
    pub duration_seconds: f64,
    /// Arrival order within the call.
    pub sequence: u64,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>, sequence: u64) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            duration_seconds: 0.0,
            sequence,
        }
    }

    pub fn final_result(text: impl Into<String>, duration_seconds: f64, sequence: u64) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            duration_seconds,
            sequence,
        }
    }
}

/// A knowledge-base document returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: String,
}
