use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

/// Runs a handler on its own named thread every `interval` seconds, until stopped.
pub struct PeriodicTimer {
    name: String,
    handler: Option<Box<dyn Fn() + Send>>,
    interval: u64,  // [s]
    thread: Option<thread::JoinHandle<()>>,
    do_run: Arc<AtomicBool>,
}

impl PeriodicTimer {

    pub fn new(name: String, interval: u64, handler: Box<dyn Fn() + Send>) -> PeriodicTimer {
        PeriodicTimer {
            name,
            handler: Some(handler),
            interval,
            thread: None,
            do_run: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn start(&mut self) {
        if self.thread.is_some() || self.handler.is_none() {
            warn!("Refused to start timer '{}'. The thread is already running!", self.name);
            return;
        }

        // vars used by the thread internally:
        let interval = self.interval;
        let handler = self.handler.take().unwrap();
        let do_run = Arc::clone(&self.do_run);

        let thread = thread::Builder::new().name(self.name.clone()).spawn(
            move || {
                while do_run.load(Ordering::Relaxed) {
                    handler();

                    // sleep in 1s chunks so stop() does not wait a whole interval:
                    for _ in 0..interval {
                        thread::sleep(Duration::from_millis(1000));
                        if !do_run.load(Ordering::Relaxed) {
                            break;
                        }
                    }
                }
        }).unwrap();

        self.thread = Some(thread);
    }

    pub fn stop(&mut self) {
        self.do_run.swap(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}
