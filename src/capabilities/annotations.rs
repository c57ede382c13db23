use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PRIORITY: f64 = 0.5;

/// Client hints attached to tools and resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Annotations {
    pub fn with_audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience = audience.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(clamp_priority(priority));
        self
    }

    pub fn with_last_modified(mut self, timestamp: DateTime<Utc>) -> Self {
        self.last_modified = Some(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
        self
    }

    /// Clamps the priority and drops a `lastModified` that is not an ISO-8601 timestamp.
    pub fn normalized(mut self) -> Self {
        self.priority = self.priority.map(clamp_priority);
        self.last_modified = self.last_modified.and_then(|timestamp| {
            DateTime::parse_from_rfc3339(&timestamp)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true))
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.audience.is_empty() && self.priority.is_none() && self.last_modified.is_none()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn clamp_priority(priority: f64) -> f64 {
    if priority.is_nan() {
        return DEFAULT_PRIORITY;
    }
    priority.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn priority_is_clamped_into_unit_range() {
        assert_eq!(Annotations::default().with_priority(3.0).priority, Some(1.0));
        assert_eq!(Annotations::default().with_priority(-1.0).priority, Some(0.0));
        assert_eq!(clamp_priority(f64::NAN), DEFAULT_PRIORITY);
    }

    #[test]
    fn serializes_with_camel_case_and_skips_empty_fields() {
        let timestamp = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().expect("timestamp");
        let annotations = Annotations::default()
            .with_audience(["user", "assistant"])
            .with_last_modified(timestamp);

        assert_eq!(
            annotations.to_value(),
            json!({
                "audience": ["user", "assistant"],
                "lastModified": "2025-01-02T03:04:05Z"
            })
        );
    }

    #[test]
    fn normalization_drops_invalid_timestamps() {
        let annotations: Annotations = serde_json::from_value(json!({
            "priority": 7,
            "lastModified": "yesterday"
        }))
        .expect("annotations");

        let normalized = annotations.normalized();
        assert_eq!(normalized.priority, Some(1.0));
        assert!(normalized.last_modified.is_none());
    }
}
