//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use moonpool_executive::{EventHandler, Executive};
use parking_lot::Mutex;

/// Shared log of `(label, dispatch time)` pairs.
pub type Log = Arc<Mutex<Vec<(&'static str, Duration)>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that appends `label` and the dispatch time to `log`.
pub fn record(log: &Log, label: &'static str) -> EventHandler {
    let log = Arc::clone(log);
    EventHandler::new(move |exec, _| {
        log.lock().push((label, exec.now()));
        Ok(())
    })
}

pub fn labels(log: &Log) -> Vec<&'static str> {
    log.lock().iter().map(|(label, _)| *label).collect()
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Records `label` with the executive's current time.
pub fn note(log: &Log, exec: &dyn Executive, label: &'static str) {
    log.lock().push((label, exec.now()));
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_micros(100));
    }
    true
}
