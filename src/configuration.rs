use std::env;
use simplelog::LevelFilter;

pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: u64 = 2;        // [s]

pub const DISPLAY_REFRESH_INTERVAL: u64 = 1;    // [s]

pub const EVENT_POLL_INTERVAL: u64 = 100;       // [ms]
pub const SOCKET_READ_TIMEOUT: u64 = 200;       // [ms]

const BACKEND_URL: &str = "ws://localhost:3001/tracking";

pub fn get_backend_url() -> String {
    env::var("BACKEND_URL").unwrap_or(BACKEND_URL.into())
}

/// The access token comes from the runtime environment only, never from the build,
/// so the same binary can be pointed at any environment.
pub fn get_access_token() -> Option<String> {
    env::var("ACCESS_TOKEN").ok()
}
