//! [`Event`]: ex-post classification tags applied in bulk to historical
//! [`crate::MetricRecord`] documents (spec §3, §4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficEndpointType {
    Host,
    Az,
    Dc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficEndpoint {
    #[serde(rename = "type")]
    pub kind: TrafficEndpointType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Created,
    Updating,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_from: Option<TrafficEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_to: Option<TrafficEndpoint>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Event {
    /// `started_at`/`finished_at` bound the time-range predicate; the two
    /// `traffic_*` endpoints contribute optional term matches (spec §4.7's
    /// dispatch predicate).
    pub fn matches_time_range(&self, timestamp: &str) -> bool {
        if timestamp < self.started_at.as_str() {
            return false;
        }
        match &self.finished_at {
            Some(end) => timestamp <= end.as_str(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_time_range_respects_open_ended_events() {
        let event = Event {
            name: "maintenance".to_string(),
            started_at: "2021-01-01T00:00:00.000Z".to_string(),
            finished_at: None,
            traffic_from: None,
            traffic_to: Some(TrafficEndpoint {
                kind: TrafficEndpointType::Az,
                value: "a".to_string(),
            }),
            status: EventStatus::Created,
            task_id: None,
        };
        assert!(event.matches_time_range("2021-06-01T00:00:00.000Z"));
        assert!(!event.matches_time_range("2020-01-01T00:00:00.000Z"));
    }

    #[test]
    fn matches_time_range_excludes_after_finished_at() {
        let event = Event {
            name: "maintenance".to_string(),
            started_at: "2021-01-01T00:00:00.000Z".to_string(),
            finished_at: Some("2021-01-02T00:00:00.000Z".to_string()),
            traffic_from: None,
            traffic_to: None,
            status: EventStatus::Created,
            task_id: None,
        };
        assert!(!event.matches_time_range("2021-01-03T00:00:00.000Z"));
    }
}
