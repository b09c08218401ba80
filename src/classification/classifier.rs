//! # Report Classifier
//!
//! Deterministic rule cascade mapping a raw event to a tier and priority.
//! First match wins:
//!
//! 1. explicit safety flag on the event ⇒ Emergency
//! 2. violence/threat keyword match ⇒ Emergency
//! 3. location inside a high-priority zone ⇒ Emergency
//! 4. general safety-keyword match ⇒ Standard, tagged for enrichment
//! 5. default ⇒ Standard
//!
//! Keyword lists and zones come from [`ClassifierConfig`]; this is a
//! pluggable heuristic, not a detection system. Malformed or missing
//! fields never fail classification; they fall through to the safe
//! default with a `malformed-input` reason so callers can flag the report
//! for manual review.

use crate::config::{ClassifierConfig, TierSettings};
use crate::constants::Tier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reason tag attached when a rule-4 match wants background enrichment.
pub const REASON_NEEDS_ENRICHMENT: &str = "needs-enrichment";

/// Reason tag attached when expected fields were missing or mistyped.
pub const REASON_MALFORMED_INPUT: &str = "malformed-input";

/// Outcome of classifying one event. Produced once, immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub tier: Tier,
    pub priority: i32,
    pub reasons: Vec<String>,
}

impl ClassificationResult {
    pub fn needs_enrichment(&self) -> bool {
        self.reasons.iter().any(|r| r == REASON_NEEDS_ENRICHMENT)
    }

    pub fn is_malformed(&self) -> bool {
        self.reasons.iter().any(|r| r == REASON_MALFORMED_INPUT)
    }
}

/// Rule-cascade classifier over raw JSON events.
#[derive(Debug, Clone)]
pub struct ReportClassifier {
    config: ClassifierConfig,
    emergency_priority: i32,
    standard_priority: i32,
}

impl ReportClassifier {
    pub fn new(config: ClassifierConfig, tiers: &TierSettings) -> Self {
        Self {
            config,
            emergency_priority: tiers.emergency.priority,
            standard_priority: tiers.standard.priority,
        }
    }

    /// Classify a raw event. Deterministic for identical input and
    /// configuration; never panics, never mutates anything.
    pub fn classify(&self, event: &Value) -> ClassificationResult {
        let mut malformed = false;

        let fields = match event.as_object() {
            Some(fields) => fields,
            None => {
                return ClassificationResult {
                    tier: Tier::Standard,
                    priority: self.standard_priority,
                    reasons: vec![
                        REASON_MALFORMED_INPUT.to_string(),
                        "default".to_string(),
                    ],
                }
            }
        };

        // Rule 1: explicit safety flag
        for flag in ["gender_sensitive", "genderSensitive", "safety_flag", "safetyFlag"] {
            match fields.get(flag) {
                Some(Value::Bool(true)) => {
                    return self.emergency(format!("safety-flag:{flag}"));
                }
                Some(Value::Bool(false)) | None => {}
                Some(_) => malformed = true,
            }
        }

        let text = Self::content_text(fields, &mut malformed);

        // Rule 2: violence/threat keywords
        if let Some(keyword) = Self::first_match(&text, &self.config.violence_keywords) {
            return self.emergency(format!("violence-keyword:{keyword}"));
        }

        // Rule 3: high-priority geographic zone
        if let Some(zone) = self.matching_zone(fields, &mut malformed) {
            return self.emergency(format!("high-priority-zone:{zone}"));
        }

        // Rule 4: general safety keywords, tagged for enrichment
        if let Some(keyword) = Self::first_match(&text, &self.config.safety_keywords) {
            let mut reasons = vec![
                format!("safety-keyword:{keyword}"),
                REASON_NEEDS_ENRICHMENT.to_string(),
            ];
            if malformed {
                reasons.push(REASON_MALFORMED_INPUT.to_string());
            }
            return ClassificationResult {
                tier: Tier::Standard,
                priority: self.standard_priority,
                reasons,
            };
        }

        // Rule 5: safe default
        let mut reasons = vec!["default".to_string()];
        if malformed {
            reasons.push(REASON_MALFORMED_INPUT.to_string());
        }
        ClassificationResult {
            tier: Tier::Standard,
            priority: self.standard_priority,
            reasons,
        }
    }

    fn emergency(&self, reason: String) -> ClassificationResult {
        ClassificationResult {
            tier: Tier::Emergency,
            priority: self.emergency_priority,
            reasons: vec![reason],
        }
    }

    /// Lowercased description plus title, tolerating missing or mistyped
    /// fields.
    fn content_text(
        fields: &serde_json::Map<String, Value>,
        malformed: &mut bool,
    ) -> String {
        let mut text = String::new();
        for key in ["description", "title"] {
            match fields.get(key) {
                Some(Value::String(s)) => {
                    text.push_str(&s.to_lowercase());
                    text.push(' ');
                }
                Some(Value::Null) | None => {}
                Some(_) => *malformed = true,
            }
        }
        text
    }

    fn first_match<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
        if text.is_empty() {
            return None;
        }
        keywords
            .iter()
            .find(|kw| !kw.is_empty() && text.contains(&kw.to_lowercase()))
            .map(String::as_str)
    }

    fn matching_zone(
        &self,
        fields: &serde_json::Map<String, Value>,
        malformed: &mut bool,
    ) -> Option<String> {
        let location = match fields.get("location") {
            Some(Value::Object(location)) => location,
            Some(Value::Null) | None => return None,
            Some(_) => {
                *malformed = true;
                return None;
            }
        };

        let lat = Self::coordinate(location, &["lat", "latitude"]);
        let lng = Self::coordinate(location, &["lng", "lon", "longitude"]);
        let (lat, lng) = match (lat, lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => {
                *malformed = true;
                return None;
            }
        };

        self.config
            .high_priority_zones
            .iter()
            .find(|zone| zone.contains(lat, lng))
            .map(|zone| zone.name.clone())
    }

    fn coordinate(location: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| location.get(*key)?.as_f64())
    }
}
