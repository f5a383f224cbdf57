//! CameraStateStore data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Class-name fragments that mark an emergency vehicle (matched case-insensitively)
pub const EMERGENCY_CLASSES: [&str; 4] = ["ambulance", "emergency", "fire", "police"];

/// Feed identifier (the road id on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub u32);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FeedId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// One classified bounding box from a detection round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Source image size, so consumers can rescale the box
    pub original_width: u32,
    pub original_height: u32,
}

impl Detection {
    /// Whether this detection's class names an emergency vehicle
    pub fn is_emergency(&self) -> bool {
        let class = self.class_name.to_lowercase();
        EMERGENCY_CLASSES.iter().any(|e| class.contains(e))
    }
}

/// True if any detection in the round is an emergency vehicle
pub fn contains_emergency(detections: &[Detection]) -> bool {
    detections.iter().any(Detection::is_emergency)
}

/// Per-feed state (SSoT lives in CameraStateStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraState {
    pub id: FeedId,
    pub name: String,
    pub is_active: bool,
    /// Most recent round only
    pub detections: Vec<Detection>,
    /// Running total of detections seen while active
    pub traffic_count: u64,
    pub has_emergency_vehicle: bool,
}

impl CameraState {
    /// Create an inactive feed
    pub fn new(id: FeedId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: false,
            detections: Vec::new(),
            traffic_count: 0,
            has_emergency_vehicle: false,
        }
    }

    /// Compute the state that results from applying `transition`.
    ///
    /// Never mutates `self`; the store swaps the returned value in.
    pub fn apply(&self, transition: &StateTransition) -> CameraState {
        let mut next = self.clone();
        match transition {
            StateTransition::DetectionUpdate(detections) => {
                // Only active feeds accumulate
                if !self.is_active {
                    return next;
                }
                next.has_emergency_vehicle = contains_emergency(detections);
                next.traffic_count = self.traffic_count.saturating_add(detections.len() as u64);
                next.detections = detections.clone();
            }
            StateTransition::StatusChange(true) => {
                next.is_active = true;
            }
            StateTransition::StatusChange(false) => {
                next.is_active = false;
                next.detections.clear();
                next.has_emergency_vehicle = false;
            }
            StateTransition::Stop => {
                next.is_active = false;
                next.detections.clear();
                next.has_emergency_vehicle = false;
                next.traffic_count = 0;
            }
        }
        next
    }
}

/// Transition request submitted to the store
#[derive(Debug, Clone, PartialEq)]
pub enum StateTransition {
    /// New detection round for the feed
    DetectionUpdate(Vec<Detection>),
    /// Activate / deactivate without resetting the count
    StatusChange(bool),
    /// Deliberate stop: deactivate and reset everything
    Stop,
}

/// Immutable view of every feed, ordered by feed id
pub type Snapshot = BTreeMap<FeedId, CameraState>;

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: &str) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence: 0.9,
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            original_width: 640,
            original_height: 480,
        }
    }

    fn active(id: u32) -> CameraState {
        CameraState::new(FeedId(id), format!("Road {}", id)).apply(&StateTransition::StatusChange(true))
    }

    #[test]
    fn test_emergency_match_is_case_insensitive_substring() {
        assert!(det("Ambulance").is_emergency());
        assert!(det("fire truck").is_emergency());
        assert!(det("POLICE-car").is_emergency());
        assert!(det("emergency-vehicle").is_emergency());
        assert!(!det("car").is_emergency());
        assert!(!det("truck").is_emergency());
    }

    #[test]
    fn test_detection_update_counts_and_flags() {
        let state = active(1).apply(&StateTransition::DetectionUpdate(vec![det("car"), det("ambulance")]));
        assert_eq!(state.traffic_count, 2);
        assert!(state.has_emergency_vehicle);
        assert_eq!(state.detections.len(), 2);
    }

    #[test]
    fn test_emergency_flag_recomputed_each_round() {
        let state = active(1)
            .apply(&StateTransition::DetectionUpdate(vec![det("ambulance")]))
            .apply(&StateTransition::DetectionUpdate(vec![det("car")]));
        assert!(!state.has_emergency_vehicle);
        assert_eq!(state.traffic_count, 2);
    }

    #[test]
    fn test_inactive_feed_never_changes_count() {
        let state = active(1)
            .apply(&StateTransition::DetectionUpdate(vec![det("car"), det("car")]))
            .apply(&StateTransition::StatusChange(false));
        assert_eq!(state.traffic_count, 2);

        let after = state.apply(&StateTransition::DetectionUpdate(vec![det("car"), det("ambulance")]));
        assert_eq!(after.traffic_count, 2);
        assert!(after.detections.is_empty());
        assert!(!after.has_emergency_vehicle);
    }

    #[test]
    fn test_status_change_false_keeps_count() {
        let state = active(1)
            .apply(&StateTransition::DetectionUpdate(vec![det("police")]))
            .apply(&StateTransition::StatusChange(false));
        assert!(!state.is_active);
        assert!(state.detections.is_empty());
        assert!(!state.has_emergency_vehicle);
        assert_eq!(state.traffic_count, 1);
    }

    #[test]
    fn test_stop_resets_count() {
        let state = active(1)
            .apply(&StateTransition::DetectionUpdate(vec![det("car"), det("bus")]))
            .apply(&StateTransition::Stop);
        assert!(!state.is_active);
        assert_eq!(state.traffic_count, 0);
        assert!(state.detections.is_empty());
    }

    #[test]
    fn test_camel_case_serialization() {
        let json = serde_json::to_value(active(3)).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["isActive"], true);
        assert_eq!(json["trafficCount"], 0);
        assert_eq!(json["hasEmergencyVehicle"], false);

        let d = serde_json::to_value(det("car")).unwrap();
        assert_eq!(d["class"], "car");
        assert_eq!(d["originalWidth"], 640);
    }
}
