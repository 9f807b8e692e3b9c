use chrono::Utc;
use log::{debug, warn};

use crate::data_structures::{StateChangeEvent, TrackedAircraft};

/// The authoritative in-memory list of tracked aircraft, fed by two channels:
/// periodic full snapshots and incremental state-change patches.
pub struct AircraftTracker {
    aircraft: Vec<TrackedAircraft>,
    last_sync_ts: Option<i64>,  // [ms] client clock
}

impl AircraftTracker {

    pub fn new() -> AircraftTracker {
        AircraftTracker {
            aircraft: Vec::new(),
            last_sync_ts: None,
        }
    }

    pub fn aircraft(&self) -> &[TrackedAircraft] {
        &self.aircraft
    }

    pub fn last_sync_ts(&self) -> Option<i64> {
        self.last_sync_ts
    }

    /// A full snapshot is the source of truth - it replaces the list entirely,
    /// never gets merged field-by-field with prior state.
    pub fn apply_full_sync(&mut self, records: Vec<TrackedAircraft>) {
        debug!("Full sync: {} aircraft.", records.len());
        self.aircraft = records;
        self.last_sync_ts = Some(Utc::now().timestamp_millis());
    }

    /// Optimistic patch: only `state` and `last_updated` change, all other fields
    /// are preserved until the next snapshot confirms or corrects them.
    /// An event for an aircraft no snapshot has delivered yet is dropped - there
    /// is not enough data to synthesize a whole record from it.
    pub fn apply_state_change(&mut self, event: &StateChangeEvent) {
        match self.aircraft.iter_mut().find(|a| a.id == event.aircraft_id) {
            Some(record) => {
                if let Some(previous_state) = event.previous_state {
                    if previous_state != record.state {
                        debug!("State change for '{}' expected previous state {previous_state}, record has {}.",
                            event.aircraft_id, record.state);
                    }
                }
                record.state = event.new_state;
                record.last_updated = Some(event.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()));
            },
            None => warn!("State change for unknown aircraft '{}' dropped.", event.aircraft_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::AircraftState;

    fn aircraft(id: &str, state: AircraftState) -> TrackedAircraft {
        TrackedAircraft {
            id: id.into(),
            state,
            call_sign: format!("CS-{id}"),
            origin: Some("PRG".into()),
            destination: Some("VIE".into()),
            aircraft_type: Some("A320".into()),
            distance: Some(12.5),
            heading: Some(180.0),
            speed: Some(450.0),
            estimated_entry_time: Some(1_000),
            estimated_exit_time: Some(Some(2_000)),
            estimated_time_to_intersection: None,
            last_updated: Some(500),
            first_seen: 0,
        }
    }

    fn state_change(id: &str, new_state: AircraftState, ts: i64) -> StateChangeEvent {
        StateChangeEvent {
            aircraft_id: id.into(),
            previous_state: None,
            new_state,
            call_sign: None,
            timestamp: Some(ts),
        }
    }

    #[test]
    fn full_sync_replaces_the_list_entirely() {
        let mut tracker = AircraftTracker::new();
        tracker.apply_full_sync(vec![aircraft("A1", AircraftState::Incoming), aircraft("A2", AircraftState::Visible)]);
        tracker.apply_full_sync(vec![aircraft("A3", AircraftState::Passed)]);

        let ids: Vec<&str> = tracker.aircraft().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["A3"]);
        assert!(tracker.last_sync_ts().is_some());
    }

    #[test]
    fn state_change_patches_only_state_and_last_updated() {
        let mut tracker = AircraftTracker::new();
        tracker.apply_full_sync(vec![aircraft("A1", AircraftState::Incoming)]);

        tracker.apply_state_change(&state_change("A1", AircraftState::Visible, 9_000));

        let mut expected = aircraft("A1", AircraftState::Incoming);
        expected.state = AircraftState::Visible;
        expected.last_updated = Some(9_000);
        assert_eq!(tracker.aircraft()[0], expected);
    }

    #[test]
    fn state_change_for_unknown_id_leaves_the_list_unchanged() {
        let mut tracker = AircraftTracker::new();
        tracker.apply_full_sync(vec![aircraft("A1", AircraftState::Incoming)]);
        let before = tracker.aircraft().to_vec();

        tracker.apply_state_change(&state_change("B7", AircraftState::Visible, 9_000));

        assert_eq!(tracker.aircraft(), before.as_slice());
    }

    #[test]
    fn optimistic_patch_survives_until_a_snapshot_omits_the_record() {
        let now = 1_700_000_000_000;
        let mut tracker = AircraftTracker::new();

        let mut a1 = aircraft("A1", AircraftState::Incoming);
        a1.estimated_entry_time = Some(now + 10_000);
        tracker.apply_full_sync(vec![a1]);

        // a second later the backend pushes the transition to Visible:
        tracker.apply_state_change(&state_change("A1", AircraftState::Visible, now + 1_000));
        let record = &tracker.aircraft()[0];
        assert_eq!(record.state, AircraftState::Visible);
        assert_eq!(record.estimated_entry_time, Some(now + 10_000));

        // the next snapshot no longer carries A1:
        tracker.apply_full_sync(vec![]);
        assert!(tracker.aircraft().is_empty());
    }
}
