use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of an aircraft relative to the viewcone. Owned by the backend,
/// the client only receives and displays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AircraftState {
    Incoming,
    Visible,
    Passed,
}

impl AircraftState {
    /// Display priority: Visible rows first, then Incoming, then Passed.
    pub fn rank(&self) -> u8 {
        match self {
            AircraftState::Visible => 0,
            AircraftState::Incoming => 1,
            AircraftState::Passed => 2,
        }
    }
}

impl fmt::Display for AircraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AircraftState::Incoming => "Incoming",
            AircraftState::Visible => "Visible",
            AircraftState::Passed => "Passed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAircraft {
    pub id: String,
    pub state: AircraftState,
    pub call_sign: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub aircraft_type: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,      // [km]
    #[serde(default)]
    pub heading: Option<f64>,       // [deg]
    #[serde(default)]
    pub speed: Option<f64>,         // [km/h]
    #[serde(default)]
    pub estimated_entry_time: Option<i64>,  // [ms] server clock
    /// None = field absent (not applicable), Some(None) = explicit null (no predicted exit yet).
    #[serde(default, with = "serde_with::rust::double_option")]
    pub estimated_exit_time: Option<Option<i64>>,   // [ms] server clock
    #[serde(default)]
    pub estimated_time_to_intersection: Option<f64>, // [s] relative to first observation
    #[serde(default)]
    pub last_updated: Option<i64>,  // [ms]
    #[serde(skip)]
    pub first_seen: i64,            // [ms] client clock, set when the record is materialized
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub aircraft_id: String,
    #[serde(default)]
    pub previous_state: Option<AircraftState>,
    pub new_state: AircraftState,
    #[serde(default)]
    pub call_sign: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,     // [ms]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthenticationStatus {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub authenticated: bool,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connected: {}, authenticated: {}", self.connected, self.authenticated)
    }
}
