use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use log::{error, info, warn};
use queues::*;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::configuration::{
    EVENT_POLL_INTERVAL, RECONNECT_BASE_DELAY, RECONNECT_MAX_ATTEMPTS, SOCKET_READ_TIMEOUT,
};
use crate::data_structures::{AuthenticationStatus, ConnectionStatus, StateChangeEvent, TrackedAircraft};

mod messages;
use messages::{authenticate_frame, parse_message, IncomingMessage};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Clone)]
enum Command {
    Authenticate,
}

#[derive(Clone, Debug)]
enum BackendEvent {
    FlightData(Vec<TrackedAircraft>),
    StateChange(StateChangeEvent),
    Authentication(AuthenticationStatus),
    Connection(ConnectionStatus),
}

/// Handle returned by the on_* registrations; pass it to unsubscribe() to stop
/// receiving callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(usize);

type FlightDataListener = Box<dyn Fn(&[TrackedAircraft]) + Send>;
type StateChangeListener = Box<dyn Fn(&StateChangeEvent) + Send>;
type AuthenticationListener = Box<dyn Fn(&AuthenticationStatus) + Send>;
type ConnectionListener = Box<dyn Fn(&ConnectionStatus) + Send>;

struct ListenerRegistry {
    next_id: usize,
    flight_data: Vec<(usize, FlightDataListener)>,
    state_change: Vec<(usize, StateChangeListener)>,
    authentication: Vec<(usize, AuthenticationListener)>,
    connection: Vec<(usize, ConnectionListener)>,
}

impl ListenerRegistry {
    fn new() -> ListenerRegistry {
        ListenerRegistry {
            next_id: 0,
            flight_data: Vec::new(),
            state_change: Vec::new(),
            authentication: Vec::new(),
            connection: Vec::new(),
        }
    }

    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: usize) {
        self.flight_data.retain(|(listener_id, _)| *listener_id != id);
        self.state_change.retain(|(listener_id, _)| *listener_id != id);
        self.authentication.retain(|(listener_id, _)| *listener_id != id);
        self.connection.retain(|(listener_id, _)| *listener_id != id);
    }
}

// Listeners fire in registration order.
fn fan_out(registry: &ListenerRegistry, event: &BackendEvent) {
    match event {
        BackendEvent::FlightData(records) => {
            for (_, listener) in registry.flight_data.iter() {
                listener(records);
            }
        },
        BackendEvent::StateChange(state_change) => {
            for (_, listener) in registry.state_change.iter() {
                listener(state_change);
            }
        },
        BackendEvent::Authentication(status) => {
            for (_, listener) in registry.authentication.iter() {
                listener(status);
            }
        },
        BackendEvent::Connection(status) => {
            for (_, listener) in registry.connection.iter() {
                listener(status);
            }
        },
    }
}

/// Cheap cloneable view of the connection flags, for anyone who only needs to
/// read the current status (the display footer does).
#[derive(Clone)]
pub struct StatusHandle {
    connected: Arc<AtomicBool>,
    authenticated: Arc<AtomicBool>,
}

impl StatusHandle {
    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.connected.load(Ordering::Relaxed),
            authenticated: self.authenticated.load(Ordering::Relaxed),
        }
    }
}

/// Client side of the backend event stream. Owns the websocket in a connection
/// thread (poll loop with reconnection policy) and a dispatch thread that drains
/// received events into the registered listeners, one at a time.
pub struct TransportClient {
    endpoint: String,
    token: Arc<Mutex<Option<String>>>,
    do_run: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    authenticated: Arc<AtomicBool>,
    auth_rejected: Arc<AtomicBool>,
    commands: Arc<Mutex<Queue<Command>>>,
    events: Arc<Mutex<Queue<BackendEvent>>>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    connection_thread: Option<thread::JoinHandle<()>>,
    dispatch_thread: Option<thread::JoinHandle<()>>,
}

impl TransportClient {

    pub fn new(endpoint: &str) -> TransportClient {
        TransportClient {
            endpoint: endpoint.to_string(),
            token: Arc::new(Mutex::new(None)),
            do_run: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            authenticated: Arc::new(AtomicBool::new(false)),
            auth_rejected: Arc::new(AtomicBool::new(false)),
            commands: Arc::new(Mutex::new(Queue::new())),
            events: Arc::new(Mutex::new(Queue::new())),
            listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
            connection_thread: None,
            dispatch_thread: None,
        }
    }

    pub fn on_flight_data<F>(&self, listener: F) -> Subscription
        where F: Fn(&[TrackedAircraft]) + Send + 'static {
        let mut registry = self.listeners.lock().unwrap();
        let id = registry.next_id();
        registry.flight_data.push((id, Box::new(listener)));
        Subscription(id)
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
        where F: Fn(&StateChangeEvent) + Send + 'static {
        let mut registry = self.listeners.lock().unwrap();
        let id = registry.next_id();
        registry.state_change.push((id, Box::new(listener)));
        Subscription(id)
    }

    pub fn on_authentication_status<F>(&self, listener: F) -> Subscription
        where F: Fn(&AuthenticationStatus) + Send + 'static {
        let mut registry = self.listeners.lock().unwrap();
        let id = registry.next_id();
        registry.authentication.push((id, Box::new(listener)));
        Subscription(id)
    }

    pub fn on_connection_status<F>(&self, listener: F) -> Subscription
        where F: Fn(&ConnectionStatus) + Send + 'static {
        let mut registry = self.listeners.lock().unwrap();
        let id = registry.next_id();
        registry.connection.push((id, Box::new(listener)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.listeners.lock().unwrap().remove(subscription.0);
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            connected: Arc::clone(&self.connected),
            authenticated: Arc::clone(&self.authenticated),
        }
    }

    /// Point-in-time read, not a subscription.
    pub fn get_connection_status(&self) -> ConnectionStatus {
        self.status_handle().get()
    }

    /// Stores the credential and opens the connection. No-op when already
    /// connected. A fresh call also resets an exhausted or auth-rejected
    /// reconnection policy.
    pub fn connect(&mut self, token: &str) {
        if self.connected.load(Ordering::Relaxed) {
            info!("connect() while already connected, ignoring.");
            return;
        }
        self.shutdown_threads();    // reap a previous session, if any

        *self.token.lock().unwrap() = Some(token.to_string());
        self.auth_rejected.store(false, Ordering::Relaxed);
        self.do_run.store(true, Ordering::Relaxed);

        self.spawn_connection_thread();
        self.spawn_dispatch_thread();
    }

    /// Queues the authenticate frame. Logged no-op while disconnected or with
    /// no stored token. connect() queues this by itself once the socket is up.
    pub fn authenticate(&self) {
        if !self.connected.load(Ordering::Relaxed) {
            warn!("authenticate() while disconnected, ignored.");
            return;
        }
        if self.token.lock().unwrap().is_none() {
            warn!("authenticate() without a stored token, ignored.");
            return;
        }
        self.commands.lock().unwrap().add(Command::Authenticate).unwrap();
    }

    /// Closes the connection, stops both threads, clears the flags and the
    /// stored token. Idempotent.
    pub fn disconnect(&mut self) {
        self.shutdown_threads();
        self.connected.store(false, Ordering::Relaxed);
        self.authenticated.store(false, Ordering::Relaxed);
        *self.token.lock().unwrap() = None;
    }

    fn shutdown_threads(&mut self) {
        self.do_run.store(false, Ordering::Relaxed);
        if let Some(thread) = self.connection_thread.take() {
            thread.join().unwrap();
        }
        if let Some(thread) = self.dispatch_thread.take() {
            thread.join().unwrap();
        }
    }

    fn spawn_connection_thread(&mut self) {
        // vars used by the thread internally:
        let endpoint = self.endpoint.clone();
        let token = Arc::clone(&self.token);
        let do_run = Arc::clone(&self.do_run);
        let connected = Arc::clone(&self.connected);
        let authenticated = Arc::clone(&self.authenticated);
        let auth_rejected = Arc::clone(&self.auth_rejected);
        let commands = Arc::clone(&self.commands);
        let events = Arc::clone(&self.events);

        let thread = thread::Builder::new().name("transport-connection".into()).spawn(
            move || {
                let mut attempt: u32 = 0;
                while do_run.load(Ordering::Relaxed) {
                    let url = match session_url(&endpoint, &token) {
                        Some(url) => url,
                        None => break,
                    };

                    info!("Connecting to '{endpoint}'..");
                    match tungstenite::connect(url.as_str()) {
                        Ok((mut socket, _response)) => {
                            info!("Connected.");
                            attempt = 0;
                            set_read_timeout(&socket);
                            connected.store(true, Ordering::Relaxed);
                            push_event(&events, BackendEvent::Connection(ConnectionStatus { connected: true, authenticated: false }));

                            // authenticate once the connection reports established:
                            commands.lock().unwrap().add(Command::Authenticate).unwrap();

                            run_session(&mut socket, &do_run, &authenticated, &auth_rejected, &token, &commands, &events);

                            connected.store(false, Ordering::Relaxed);
                            authenticated.store(false, Ordering::Relaxed);
                            push_event(&events, BackendEvent::Connection(ConnectionStatus { connected: false, authenticated: false }));
                        },
                        Err(e) => warn!("Could not connect to '{endpoint}': {e}"),
                    }

                    if !do_run.load(Ordering::Relaxed) {
                        break;
                    }
                    if auth_rejected.load(Ordering::Relaxed) {
                        warn!("Authentication was rejected, not reconnecting. A new connect() with a fresh token is required.");
                        break;
                    }

                    attempt += 1;
                    match reconnect_delay(attempt) {
                        Some(delay) => {
                            info!("Reconnect attempt {attempt}/{RECONNECT_MAX_ATTEMPTS} in {}s..", delay.as_secs());
                            sleep_interruptible(delay, &do_run);
                        },
                        None => {
                            error!("Max reconnect attempts reached, giving up.");
                            break;
                        },
                    }
                }
        }).unwrap();

        self.connection_thread = Some(thread);
    }

    fn spawn_dispatch_thread(&mut self) {
        // vars used by the thread internally:
        let do_run = Arc::clone(&self.do_run);
        let events = Arc::clone(&self.events);
        let listeners = Arc::clone(&self.listeners);

        let thread = thread::Builder::new().name("transport-dispatch".into()).spawn(
            move || {
                let mut num_snapshots: u64 = 0;
                let mut num_state_changes: u64 = 0;
                let mut time = SystemTime::now();

                while do_run.load(Ordering::Relaxed) {
                    let num_queued = events.lock().unwrap().size();
                    if num_queued == 0 {
                        thread::sleep(Duration::from_millis(EVENT_POLL_INTERVAL));
                    } else {
                        while events.lock().unwrap().size() > 0 {
                            let event = events.lock().unwrap().remove().unwrap();
                            match &event {
                                BackendEvent::FlightData(_) => num_snapshots += 1,
                                BackendEvent::StateChange(_) => num_state_changes += 1,
                                _ => (),
                            }
                            fan_out(&listeners.lock().unwrap(), &event);
                        }
                    }

                    // report event rates once a minute:
                    if time.elapsed().unwrap().as_secs() >= 60 {
                        info!("Event rate: {num_snapshots} snapshots/min, {num_state_changes} state changes/min.");
                        num_snapshots = 0;
                        num_state_changes = 0;
                        time = SystemTime::now();
                    }
                }
        }).unwrap();

        self.dispatch_thread = Some(thread);
    }
}

/// Endpoint with the token as a query parameter - the edge checks it before the
/// backend ever sees the authenticate frame.
fn session_url(endpoint: &str, token: &Mutex<Option<String>>) -> Option<String> {
    let mut url = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            error!("Invalid backend url '{endpoint}': {e}");
            return None;
        },
    };
    if let Some(token) = token.lock().unwrap().as_ref() {
        url.query_pairs_mut().append_pair("token", token);
    }
    Some(url.to_string())
}

fn set_read_timeout(socket: &Socket) {
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        if let Err(e) = stream.set_read_timeout(Some(Duration::from_millis(SOCKET_READ_TIMEOUT))) {
            warn!("Could not set the socket read timeout: {e}");
        }
    }
}

/// Linear backoff: attempt number times the base delay, bounded attempt count.
/// None = the policy is exhausted.
fn reconnect_delay(attempt: u32) -> Option<Duration> {
    if attempt > RECONNECT_MAX_ATTEMPTS {
        return None;
    }
    Some(Duration::from_secs(attempt as u64 * RECONNECT_BASE_DELAY))
}

// sleep in 1s chunks so a stop does not have to wait out the whole backoff
fn sleep_interruptible(duration: Duration, do_run: &AtomicBool) {
    let mut remaining = duration.as_secs();
    while remaining > 0 && do_run.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_secs(1));
        remaining -= 1;
    }
}

fn push_event(events: &Mutex<Queue<BackendEvent>>, event: BackendEvent) {
    events.lock().unwrap().add(event).unwrap();
}

/// Read/command loop of one established connection. Returns when the socket
/// closes or fails; the caller decides about reconnection.
fn run_session(
    socket: &mut Socket,
    do_run: &AtomicBool,
    authenticated: &AtomicBool,
    auth_rejected: &AtomicBool,
    token: &Mutex<Option<String>>,
    commands: &Mutex<Queue<Command>>,
    events: &Mutex<Queue<BackendEvent>>,
) {
    loop {
        if !do_run.load(Ordering::Relaxed) {
            let _ = socket.close(None);
            return;
        }

        while commands.lock().unwrap().size() > 0 {
            let command = commands.lock().unwrap().remove().unwrap();
            match command {
                Command::Authenticate => {
                    let token = token.lock().unwrap().clone();
                    match token {
                        Some(token) => {
                            if let Err(e) = socket.send(Message::text(authenticate_frame(&token))) {
                                warn!("Could not send the authenticate frame: {e}");
                            }
                        },
                        None => warn!("No stored token, authenticate skipped."),
                    }
                },
            }
        }

        match socket.read() {
            Ok(Message::Text(raw)) => match parse_message(raw.as_str()) {
                Some(IncomingMessage::Authenticated(status)) => {
                    authenticated.store(status.success, Ordering::Relaxed);
                    if status.success {
                        info!("Authenticated.");
                    } else {
                        warn!("Authentication rejected by the backend: {}", status.error.as_deref().unwrap_or("no reason given"));
                        auth_rejected.store(true, Ordering::Relaxed);
                    }
                    push_event(events, BackendEvent::Authentication(status));
                },
                Some(IncomingMessage::FlightData(records)) => push_event(events, BackendEvent::FlightData(records)),
                Some(IncomingMessage::StateChange(state_change)) => push_event(events, BackendEvent::StateChange(state_change)),
                None => (),     // already logged by the parser
            },
            Ok(Message::Close(_)) => {
                info!("Connection closed by the backend.");
                return;
            },
            Ok(_) => (),        // ping/pong/binary
            Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => {
                warn!("Websocket error: {e}");
                return;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use super::*;

    #[test]
    fn reconnect_delays_are_bounded_and_strictly_increasing() {
        let mut previous = Duration::from_secs(0);
        for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
            let delay = reconnect_delay(attempt).unwrap();
            assert!(delay > previous, "attempt {attempt} did not increase the delay");
            previous = delay;
        }

        // the policy is exhausted after RECONNECT_MAX_ATTEMPTS:
        assert_eq!(reconnect_delay(RECONNECT_MAX_ATTEMPTS + 1), None);
    }

    #[test]
    fn listeners_are_cumulative_and_fire_in_registration_order() {
        let client = TransportClient::new("ws://localhost:9");
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        client.on_connection_status(move |_| c.lock().unwrap().push(1));
        let c = Arc::clone(&calls);
        client.on_connection_status(move |_| c.lock().unwrap().push(2));

        let event = BackendEvent::Connection(ConnectionStatus { connected: true, authenticated: false });
        fan_out(&client.listeners.lock().unwrap(), &event);

        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribed_listener_no_longer_fires() {
        let client = TransportClient::new("ws://localhost:9");
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        let first = client.on_connection_status(move |_| c.lock().unwrap().push(1));
        let c = Arc::clone(&calls);
        client.on_connection_status(move |_| c.lock().unwrap().push(2));

        client.unsubscribe(first);

        let event = BackendEvent::Connection(ConnectionStatus { connected: false, authenticated: false });
        fan_out(&client.listeners.lock().unwrap(), &event);

        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[test]
    fn authenticate_while_disconnected_is_a_logged_no_op() {
        let client = TransportClient::new("ws://localhost:9");
        client.authenticate();
        assert_eq!(client.commands.lock().unwrap().size(), 0);
    }

    #[test]
    fn status_starts_disconnected_and_unauthenticated() {
        let client = TransportClient::new("ws://localhost:9");
        let status = client.get_connection_status();
        assert!(!status.connected);
        assert!(!status.authenticated);
    }

    #[test]
    fn session_url_carries_the_token_query_parameter() {
        let token = Mutex::new(Some("s3cret".to_string()));
        let url = session_url("ws://localhost:3001/tracking", &token).unwrap();
        assert_eq!(url, "ws://localhost:3001/tracking?token=s3cret");

        assert!(session_url("not a url", &token).is_none());
    }
}
