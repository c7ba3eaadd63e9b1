//! Health reported by a secret watcher component.

use serde::Serialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Coarse health of the component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthType {
    /// No outcome has been recorded yet.
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthType::Unknown => "unknown",
            HealthType::Healthy => "healthy",
            HealthType::Unhealthy => "unhealthy",
        }
    }
}

/// Summary of the most recent fetch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub health: HealthType,
    pub message: String,
    pub update_time: OffsetDateTime,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            health: HealthType::Unknown,
            message: String::new(),
            update_time: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl Health {
    /// Records a new state, stamped strictly after `self`.
    pub(crate) fn transition(&self, health: HealthType, message: impl Into<String>) -> Health {
        Health {
            health,
            message: message.into(),
            update_time: next_update_time(self.update_time, OffsetDateTime::now_utc()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == HealthType::Healthy
    }

    /// Renders the health as a JSON document suitable for status endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        let update_time = self
            .update_time
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.update_time.unix_timestamp().to_string());
        json!({
            "health": self.health,
            "message": self.message,
            "updateTime": update_time,
        })
    }
}

/// Clock readings can repeat or step back; timestamps handed out here cannot.
fn next_update_time(previous: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
    if now > previous {
        now
    } else {
        previous + Duration::nanoseconds(1)
    }
}
