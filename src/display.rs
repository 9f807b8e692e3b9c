use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::data_structures::{AircraftState, TrackedAircraft};
use crate::tracker::AircraftTracker;
use crate::transport::StatusHandle;

/// Absolute countdown deadline of a row [ms]. Passed rows and rows without
/// timing fields have none.
pub fn countdown_deadline(aircraft: &TrackedAircraft) -> Option<i64> {
    match aircraft.state {
        AircraftState::Incoming => match aircraft.estimated_entry_time {
            Some(entry_ts) => Some(entry_ts),
            // fallback: relative time to intersection, anchored at first observation
            None => aircraft.estimated_time_to_intersection
                .map(|tti| aircraft.first_seen + (tti * 1000.0) as i64),
        },
        AircraftState::Visible => aircraft.estimated_exit_time.flatten(),
        AircraftState::Passed => None,
    }
}

/// Remaining whole seconds until the row's deadline, floored at zero. Derived on
/// every tick, never stored.
pub fn countdown_seconds(aircraft: &TrackedAircraft, now_ts: i64) -> Option<i64> {
    countdown_deadline(aircraft).map(|deadline_ts| {
        if deadline_ts <= now_ts {
            0
        } else {
            (deadline_ts - now_ts) / 1000
        }
    })
}

pub fn format_countdown(seconds: i64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Stable sort by state rank; ties keep the list's existing relative order.
pub fn sorted_for_display(aircraft: &[TrackedAircraft]) -> Vec<&TrackedAircraft> {
    let mut rows: Vec<&TrackedAircraft> = aircraft.iter().collect();
    rows.sort_by_key(|a| a.state.rank());
    rows
}

const ROW_FORMAT_HEADER: &str = "CALLSIGN   STATE     TYPE         ROUTE                    DIST[km]   HDG SPD[kmh]  COUNTDOWN";

fn format_row(aircraft: &TrackedAircraft, now_ts: i64) -> String {
    let countdown = match countdown_seconds(aircraft, now_ts) {
        Some(seconds) => format_countdown(seconds),
        None => "-".to_string(),
    };
    let route = match (&aircraft.origin, &aircraft.destination) {
        (Some(origin), Some(destination)) => format!("{origin} -> {destination}"),
        (Some(origin), None) => format!("{origin} -> ?"),
        (None, Some(destination)) => format!("? -> {destination}"),
        (None, None) => "-".to_string(),
    };

    format!("{:<10} {:<9} {:<12} {:<24} {:>8} {:>5} {:>8}  {:>9}",
        aircraft.call_sign,
        aircraft.state.to_string(),
        aircraft.aircraft_type.as_deref().unwrap_or("-"),
        route,
        aircraft.distance.map(|d| format!("{d:.1}")).unwrap_or("-".into()),
        aircraft.heading.map(|h| format!("{h:.0}")).unwrap_or("-".into()),
        aircraft.speed.map(|s| format!("{s:.0}")).unwrap_or("-".into()),
        countdown,
    )
}

/// Renders the tracked list to the terminal. Reads the tracker, never writes it.
pub struct DisplayBoard {
    tracker: Arc<Mutex<AircraftTracker>>,
    status: StatusHandle,
}

impl DisplayBoard {

    pub fn new(tracker: Arc<Mutex<AircraftTracker>>, status: StatusHandle) -> DisplayBoard {
        DisplayBoard {
            tracker,
            status,
        }
    }

    pub fn render(&self) {
        let tracker = self.tracker.lock().unwrap();
        let now_ts = Utc::now().timestamp_millis();

        let mut out = String::new();
        out.push_str("\x1B[2J\x1B[H");  // clear screen, cursor home
        out.push_str(ROW_FORMAT_HEADER);
        out.push('\n');

        for aircraft in sorted_for_display(tracker.aircraft()) {
            out.push_str(&format_row(aircraft, now_ts));
            out.push('\n');
        }
        if tracker.aircraft().is_empty() {
            out.push_str("(no aircraft around)\n");
        }

        out.push('\n');
        out.push_str(&self.format_footer(&tracker, now_ts));
        out.push('\n');

        print!("{out}");
        let _ = io::stdout().flush();
    }

    fn format_footer(&self, tracker: &AircraftTracker, now_ts: i64) -> String {
        let status = self.status.get();
        let last_sync = match tracker.last_sync_ts() {
            Some(sync_ts) => format!("{}s ago", (now_ts - sync_ts).max(0) / 1000),
            None => "never".to_string(),
        };
        format!("{status} | aircraft: {} | last sync: {last_sync}", tracker.aircraft().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aircraft(id: &str, state: AircraftState) -> TrackedAircraft {
        TrackedAircraft {
            id: id.into(),
            state,
            call_sign: format!("CS-{id}"),
            origin: None,
            destination: None,
            aircraft_type: None,
            distance: None,
            heading: None,
            speed: None,
            estimated_entry_time: None,
            estimated_exit_time: None,
            estimated_time_to_intersection: None,
            last_updated: None,
            first_seen: 0,
        }
    }

    #[test]
    fn sort_puts_visible_before_incoming_before_passed() {
        let list = vec![
            aircraft("P1", AircraftState::Passed),
            aircraft("I1", AircraftState::Incoming),
            aircraft("V1", AircraftState::Visible),
            aircraft("I2", AircraftState::Incoming),
        ];
        let ids: Vec<&str> = sorted_for_display(&list).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["V1", "I1", "I2", "P1"]);
    }

    #[test]
    fn sort_is_stable_across_repeated_application() {
        let list = vec![
            aircraft("I1", AircraftState::Incoming),
            aircraft("I2", AircraftState::Incoming),
            aircraft("V1", AircraftState::Visible),
            aircraft("I3", AircraftState::Incoming),
        ];
        let once: Vec<&str> = sorted_for_display(&list).iter().map(|a| a.id.as_str()).collect();
        let reordered: Vec<TrackedAircraft> = sorted_for_display(&list).into_iter().cloned().collect();
        let twice: Vec<&str> = sorted_for_display(&reordered).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn countdown_reads_0_30_immediately_and_reaches_0_00_after_30_ticks() {
        let now = 1_700_000_000_000;
        let mut a = aircraft("A1", AircraftState::Incoming);
        a.estimated_entry_time = Some(now + 30_000);

        assert_eq!(format_countdown(countdown_seconds(&a, now).unwrap()), "0:30");
        for tick in 1..=30 {
            assert_eq!(countdown_seconds(&a, now + tick * 1_000), Some(30 - tick));
        }
        assert_eq!(format_countdown(countdown_seconds(&a, now + 30_000).unwrap()), "0:00");

        // past the deadline the countdown stays floored at zero:
        assert_eq!(countdown_seconds(&a, now + 45_000), Some(0));
    }

    #[test]
    fn visible_rows_count_down_to_the_exit_time() {
        let now = 1_700_000_000_000;
        let mut a = aircraft("A1", AircraftState::Visible);
        a.estimated_exit_time = Some(Some(now + 95_000));
        assert_eq!(format_countdown(countdown_seconds(&a, now).unwrap()), "1:35");

        // explicit null = no predicted exit yet, so nothing to count down:
        a.estimated_exit_time = Some(None);
        assert_eq!(countdown_seconds(&a, now), None);
    }

    #[test]
    fn passed_rows_and_rows_without_timing_have_no_countdown() {
        let now = 1_700_000_000_000;
        let mut passed = aircraft("P1", AircraftState::Passed);
        passed.estimated_entry_time = Some(now + 10_000);
        assert_eq!(countdown_seconds(&passed, now), None);

        let incoming = aircraft("I1", AircraftState::Incoming);
        assert_eq!(countdown_seconds(&incoming, now), None);
    }

    #[test]
    fn relative_fallback_is_anchored_at_first_observation() {
        let now = 1_700_000_000_000;
        let mut a = aircraft("A1", AircraftState::Incoming);
        a.first_seen = now;
        a.estimated_time_to_intersection = Some(12.0);  // [s]

        assert_eq!(countdown_seconds(&a, now), Some(12));
        assert_eq!(countdown_seconds(&a, now + 5_000), Some(7));
    }

    #[test]
    fn rows_render_dashes_for_missing_telemetry() {
        let now = 1_700_000_000_000;
        let a = aircraft("A1", AircraftState::Incoming);
        let row = format_row(&a, now);
        assert!(row.starts_with("CS-A1"));
        assert!(row.contains('-'));

        let mut b = aircraft("B2", AircraftState::Visible);
        b.origin = Some("PRG".into());
        b.destination = Some("VIE".into());
        b.distance = Some(12.34);
        assert!(format_row(&b, now).contains("PRG -> VIE"));
        assert!(format_row(&b, now).contains("12.3"));
    }
}
