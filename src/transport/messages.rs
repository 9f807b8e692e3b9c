use chrono::Utc;
use log::{debug, warn};
use serde_json::{json, Value};

use crate::data_structures::{AuthenticationStatus, StateChangeEvent, TrackedAircraft};

/// Frames pushed by the backend, already decoded into their typed payloads.
#[derive(Debug)]
pub enum IncomingMessage {
    Authenticated(AuthenticationStatus),
    FlightData(Vec<TrackedAircraft>),
    StateChange(StateChangeEvent),
}

/// Every frame is a json envelope {"event": <name>, "data": <payload>}.
/// Anything that does not decode is logged and dropped, never fatal.
pub fn parse_message(raw: &str) -> Option<IncomingMessage> {
    let frame: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Discarding malformed frame: {e}");
            return None;
        },
    };

    let event = match frame["event"].as_str() {
        Some(event) => event,
        None => {
            warn!("Discarding frame without an event name.");
            return None;
        },
    };
    let data = &frame["data"];

    match event {
        "authenticated" => match serde_json::from_value::<AuthenticationStatus>(data.clone()) {
            Ok(status) => Some(IncomingMessage::Authenticated(status)),
            Err(e) => {
                warn!("Could not parse authenticated payload: {e}");
                None
            },
        },
        "flightData" => extract_snapshot(data).map(IncomingMessage::FlightData),
        "stateChange" => extract_state_change(data).map(IncomingMessage::StateChange),
        other => {
            debug!("Ignoring unknown event '{other}'.");
            None
        },
    }
}

/// The canonical snapshot payload is {"flightData": {"headers": [..], "data": [..]}},
/// but the backend has been observed to send the record array in other wrappings.
/// Probe the known shapes in sequence and use the first one that matches.
fn extract_snapshot(data: &Value) -> Option<Vec<TrackedAircraft>> {
    let records = if data["flightData"]["data"].is_array() {
        &data["flightData"]["data"]
    } else if data["data"].is_array() {
        &data["data"]
    } else if data.is_array() {
        data
    } else if data["flightData"].is_array() {
        &data["flightData"]
    } else {
        warn!("Unrecognized flightData payload shape, update discarded.");
        return None;
    };

    match serde_json::from_value::<Vec<TrackedAircraft>>(records.clone()) {
        Ok(mut aircraft) => {
            let now = Utc::now().timestamp_millis();
            for record in aircraft.iter_mut() {
                record.first_seen = now;
            }
            Some(aircraft)
        },
        Err(e) => {
            warn!("Could not parse flightData records, update discarded: {e}");
            None
        },
    }
}

/// Canonical shape {"type": "stateChange", "data": {..}}; the bare inner object
/// is tolerated as well.
fn extract_state_change(data: &Value) -> Option<StateChangeEvent> {
    let inner = if data["data"].is_object() { &data["data"] } else { data };

    match serde_json::from_value::<StateChangeEvent>(inner.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Could not parse stateChange payload: {e}");
            None
        },
    }
}

pub fn authenticate_frame(token: &str) -> String {
    json!({"event": "authenticate", "data": {"token": token}}).to_string()
}
