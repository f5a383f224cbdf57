//! SignalArbiter - Right-of-way decision
//!
//! Pure function over a store snapshot:
//!
//! 1. Inactive feeds are red
//! 2. Any active feed with an emergency vehicle: all such feeds green, rest red
//! 3. Otherwise the active feed with the highest traffic count is green
//!    (lowest feed id wins ties)
//! 4. No active feed: all red

use crate::camera_state_store::{FeedId, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal for one feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Green,
    Red,
}

/// Decision for every feed in a snapshot
pub type SignalDecision = BTreeMap<FeedId, SignalState>;

/// Why the current decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoActiveFeeds,
    EmergencyOverride,
    HighestTraffic,
}

/// Compute green/red for every feed in the snapshot
pub fn decide(snapshot: &Snapshot) -> SignalDecision {
    decide_with_reason(snapshot).0
}

/// Same as [`decide`], also reporting which rule fired
pub fn decide_with_reason(snapshot: &Snapshot) -> (SignalDecision, DecisionReason) {
    let mut decision: SignalDecision = snapshot
        .keys()
        .map(|id| (*id, SignalState::Red))
        .collect();

    let active: Vec<_> = snapshot.values().filter(|s| s.is_active).collect();
    if active.is_empty() {
        return (decision, DecisionReason::NoActiveFeeds);
    }

    if active.iter().any(|s| s.has_emergency_vehicle) {
        for state in active.iter().filter(|s| s.has_emergency_vehicle) {
            decision.insert(state.id, SignalState::Green);
        }
        return (decision, DecisionReason::EmergencyOverride);
    }

    // BTreeMap iteration is ascending by id, so the first strict maximum wins ties
    let mut winner = active[0];
    for state in &active[1..] {
        if state.traffic_count > winner.traffic_count {
            winner = *state;
        }
    }
    decision.insert(winner.id, SignalState::Green);

    (decision, DecisionReason::HighestTraffic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_state_store::{CameraState, Detection};

    fn det(class: &str) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence: 0.7,
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            original_width: 640,
            original_height: 480,
        }
    }

    fn feed(id: u32, active: bool, count: u64, emergency: bool) -> CameraState {
        CameraState {
            id: FeedId(id),
            name: format!("Road {}", id),
            is_active: active,
            detections: Vec::new(),
            traffic_count: count,
            has_emergency_vehicle: emergency,
        }
    }

    fn snapshot(feeds: Vec<CameraState>) -> Snapshot {
        feeds.into_iter().map(|s| (s.id, s)).collect()
    }

    fn greens(decision: &SignalDecision) -> Vec<u32> {
        decision
            .iter()
            .filter(|(_, s)| **s == SignalState::Green)
            .map(|(id, _)| id.0)
            .collect()
    }

    #[test]
    fn test_all_inactive_is_all_red() {
        let snap = snapshot((1..=4).map(|i| feed(i, false, 10 * i as u64, false)).collect());
        let (decision, reason) = decide_with_reason(&snap);
        assert_eq!(decision.len(), 4);
        assert!(greens(&decision).is_empty());
        assert_eq!(reason, DecisionReason::NoActiveFeeds);
    }

    #[test]
    fn test_emergency_scenario_from_two_feeds() {
        let mut feed1 = feed(1, true, 3, false);
        feed1.detections = vec![det("car"), det("car"), det("truck")];
        let mut feed2 = feed(2, true, 1, true);
        feed2.detections = vec![det("ambulance")];

        let decision = decide(&snapshot(vec![feed1, feed2]));
        assert_eq!(decision[&FeedId(1)], SignalState::Red);
        assert_eq!(decision[&FeedId(2)], SignalState::Green);
    }

    #[test]
    fn test_multiple_emergencies_all_green() {
        let snap = snapshot(vec![
            feed(1, true, 50, false),
            feed(2, true, 1, true),
            feed(3, true, 2, true),
            feed(4, false, 0, false),
        ]);
        let (decision, reason) = decide_with_reason(&snap);
        assert_eq!(greens(&decision), vec![2, 3]);
        assert_eq!(reason, DecisionReason::EmergencyOverride);
    }

    #[test]
    fn test_inactive_emergency_is_ignored() {
        let snap = snapshot(vec![feed(1, true, 5, false), feed(2, false, 9, true)]);
        assert_eq!(greens(&decide(&snap)), vec![1]);
    }

    #[test]
    fn test_highest_traffic_wins() {
        let snap = snapshot(vec![
            feed(1, true, 4, false),
            feed(2, true, 12, false),
            feed(3, true, 7, false),
            feed(4, false, 99, false),
        ]);
        let (decision, reason) = decide_with_reason(&snap);
        assert_eq!(greens(&decision), vec![2]);
        assert_eq!(reason, DecisionReason::HighestTraffic);
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let snap = snapshot(vec![
            feed(1, false, 20, false),
            feed(2, true, 8, false),
            feed(3, true, 8, false),
            feed(4, true, 3, false),
        ]);
        assert_eq!(greens(&decide(&snap)), vec![2]);
    }

    #[test]
    fn test_single_active_feed_with_zero_count_is_green() {
        let snap = snapshot(vec![feed(1, false, 0, false), feed(2, true, 0, false)]);
        assert_eq!(greens(&decide(&snap)), vec![2]);
    }

    #[test]
    fn test_exactly_one_green_without_emergency() {
        for counts in [[0u64, 0, 0, 0], [1, 2, 3, 4], [9, 9, 1, 9], [5, 0, 5, 2]] {
            let snap = snapshot(
                counts
                    .iter()
                    .enumerate()
                    .map(|(i, c)| feed(i as u32 + 1, true, *c, false))
                    .collect(),
            );
            let decision = decide(&snap);
            let green = greens(&decision);
            assert_eq!(green.len(), 1);

            let max = *counts.iter().max().unwrap();
            let expected = counts.iter().position(|c| *c == max).unwrap() as u32 + 1;
            assert_eq!(green[0], expected);
        }
    }

    #[test]
    fn test_signal_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SignalState::Green).unwrap(), "\"green\"");
        assert_eq!(serde_json::to_string(&SignalState::Red).unwrap(), "\"red\"");
    }
}
