use std::env;
use std::process;
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use simplelog::{Config, SimpleLogger};

mod configuration;
mod cron;
mod data_structures;
mod display;
mod tracker;
mod transport;

use configuration::{get_access_token, get_backend_url, LOG_LEVEL};
use cron::CronJobs;
use display::DisplayBoard;
use tracker::AircraftTracker;
use transport::TransportClient;

fn main() {
    SimpleLogger::init(LOG_LEVEL, Config::default()).expect("Could not initialize logging!");

    // no token, no dashboard - same binary works against any environment:
    let token = match env::args().nth(1).or_else(get_access_token) {
        Some(token) => token,
        None => {
            error!("No access token. Pass it as the first argument or via ACCESS_TOKEN.");
            process::exit(1);
        },
    };

    let tracker = Arc::new(Mutex::new(AircraftTracker::new()));

    let mut client = TransportClient::new(&get_backend_url());

    let sync_tracker = Arc::clone(&tracker);
    let patch_tracker = Arc::clone(&tracker);
    let subscriptions = vec![
        client.on_flight_data(move |records| sync_tracker.lock().unwrap().apply_full_sync(records.to_vec())),
        client.on_state_change(move |event| patch_tracker.lock().unwrap().apply_state_change(event)),
        client.on_authentication_status(|status| {
            if !status.success {
                warn!("Not authenticated: {}", status.error.as_deref().unwrap_or("no reason given"));
            }
        }),
        client.on_connection_status(|status| info!("Connection status: {status}")),
    ];

    client.connect(&token);

    let board = DisplayBoard::new(Arc::clone(&tracker), client.status_handle());
    let mut cron = CronJobs::new();
    cron.start(board);

    let (stop_tx, stop_rx) = crossbeam::channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }).expect("Could not set the termination handler!");

    info!("Entering the loop..");
    stop_rx.recv().unwrap();

    info!("Terminating..");
    cron.stop();
    for subscription in subscriptions {
        client.unsubscribe(subscription);
    }
    client.disconnect();

    info!("KOHEU.");
}
