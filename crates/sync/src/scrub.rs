//! Sensitive-field scrubbing for log and report surfaces.
//!
//! Payloads may carry protected personal data (clinical scores, free-text
//! notes). Nothing derived from a payload may reach a log line, an error
//! surface or a statistics snapshot. Engine code already excludes payloads
//! from those surfaces structurally; this scrubber is the enforcement layer
//! for the few places where a payload-shaped value must be rendered at all
//! (for example a conflict audit summary of field names).

use serde_json::Value;

/// Replacement token written over redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Key-driven scrubber for JSON values.
///
/// A key matches when any configured marker is a case-insensitive substring
/// of the key name. Matching values are replaced wholesale, including
/// nested objects and arrays beneath them.
#[derive(Debug, Clone)]
pub struct Scrubber {
    markers: Vec<String>,
}

impl Scrubber {
    /// Create a scrubber for an explicit marker list.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { markers: markers.into_iter().map(|m| m.into().to_lowercase()).collect() }
    }

    /// Create a scrubber with the standard clinical marker set.
    pub fn with_defaults() -> Self {
        Self::new([
            "score",
            "notes",
            "note",
            "answers",
            "responses",
            "assessment",
            "diagnosis",
            "medication",
            "mood",
            "journal",
            "safety_plan",
        ])
    }

    /// Check whether a key name is sensitive.
    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.markers.iter().any(|m| key.contains(m))
    }

    /// Return a scrubbed copy of `value`; the input is never mutated.
    pub fn scrub(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut scrubbed = serde_json::Map::with_capacity(map.len());
                for (key, inner) in map {
                    if self.is_sensitive(key) {
                        scrubbed.insert(key.clone(), Value::String(REDACTED.to_string()));
                    } else {
                        scrubbed.insert(key.clone(), self.scrub(inner));
                    }
                }
                Value::Object(scrubbed)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.scrub(v)).collect()),
            other => other.clone(),
        }
    }
}

impl Default for Scrubber {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for sensitive-field scrubbing.
    use serde_json::json;

    use super::*;

    /// Validates `Scrubber::with_defaults` behavior for the top-level key
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the scrubbed score equals the redaction token.
    /// - Confirms non-sensitive fields are preserved.
    #[test]
    fn test_scrub_top_level_key() {
        let scrubber = Scrubber::with_defaults();
        let value = json!({"assessment_score": 21, "entity_id": "session-1"});

        let scrubbed = scrubber.scrub(&value);

        assert_eq!(scrubbed["assessment_score"], REDACTED);
        assert_eq!(scrubbed["entity_id"], "session-1");
    }

    /// Validates `Scrubber::with_defaults` behavior for the nested object
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms nested sensitive keys are redacted.
    #[test]
    fn test_scrub_nested_objects_and_arrays() {
        let scrubber = Scrubber::with_defaults();
        let value = json!({
            "sessions": [
                {"id": "a", "session_notes": "private text"},
                {"id": "b", "phq9_score": 12}
            ]
        });

        let scrubbed = scrubber.scrub(&value);

        assert_eq!(scrubbed["sessions"][0]["session_notes"], REDACTED);
        assert_eq!(scrubbed["sessions"][1]["phq9_score"], REDACTED);
        assert_eq!(scrubbed["sessions"][0]["id"], "a");
    }

    /// Tests that scrubbing never mutates its input.
    #[test]
    fn test_scrub_does_not_mutate_input() {
        let scrubber = Scrubber::with_defaults();
        let value = json!({"notes": "keep me intact"});

        let _ = scrubber.scrub(&value);

        assert_eq!(value["notes"], "keep me intact");
    }

    /// Validates serialized output carries no sensitive content.
    ///
    /// Assertions:
    /// - Ensures the serialized scrubbed form does not contain the secret.
    #[test]
    fn test_serialized_output_has_no_leakage() {
        let scrubber = Scrubber::with_defaults();
        let value = json!({"mood_journal": "I feel overwhelmed", "version": 3});

        let rendered = serde_json::to_string(&scrubber.scrub(&value)).unwrap();

        assert!(!rendered.contains("overwhelmed"));
        assert!(rendered.contains("version"));
    }

    /// Tests custom marker lists.
    #[test]
    fn test_custom_markers() {
        let scrubber = Scrubber::new(["ssn"]);
        let value = json!({"ssn": "000-00-0000", "notes": "visible"});

        let scrubbed = scrubber.scrub(&value);

        assert_eq!(scrubbed["ssn"], REDACTED);
        assert_eq!(scrubbed["notes"], "visible");
    }
}
