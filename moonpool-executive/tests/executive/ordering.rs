//! Dispatch order: time, then descending priority, then request order.

use std::{sync::Arc, time::Duration};

use moonpool_executive::{
    EventHandler, EventKey, EventRequest, ExecEventType, Executive, FullExecutive, payload,
    payload_ref,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::support::{labels, log, record, secs};

#[test]
fn test_time_then_priority() {
    let exec = FullExecutive::default();
    let log = log();

    exec.request_event(record(&log, "t10-p0"), secs(10), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "t10-p5"), secs(10), 5.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "t5-p0"), secs(5), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(labels(&log), vec!["t5-p0", "t10-p5", "t10-p0"]);
    assert_eq!(exec.now(), secs(10));
    assert_eq!(exec.events_served(), 3);
}

#[test]
fn test_equal_time_and_priority_dispatch_in_request_order() {
    let exec = FullExecutive::default();
    let log = log();
    for label in ["a", "b", "c", "d"] {
        exec.request_event(record(&log, label), secs(1), 1.0, None, ExecEventType::Synchronous)
            .expect("should request event");
    }
    exec.start().expect("run should succeed");
    assert_eq!(labels(&log), vec!["a", "b", "c", "d"]);
}

#[test]
fn test_event_list_matches_dispatch_order() {
    let exec = FullExecutive::default();
    let log = log();
    exec.request_event(record(&log, "late"), secs(3), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "low"), secs(1), -2.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "high"), secs(1), 2.0, None, ExecEventType::Synchronous)
        .expect("should request event");

    let listed: Vec<EventKey> = exec.event_list().iter().map(|info| info.key).collect();
    assert_eq!(listed, vec![EventKey(2), EventKey(1), EventKey(0)]);
    assert_eq!(exec.pending_event_count(), 3);

    exec.start().expect("run should succeed");
    assert_eq!(labels(&log), vec!["high", "low", "late"]);
}

/// An immediate event takes the current time and priority, and queues
/// behind events already requested for that time and priority.
#[test]
fn test_immediate_event_does_not_jump_the_queue() {
    let exec = FullExecutive::default();
    let log = log();

    let spawner = {
        let log = Arc::clone(&log);
        let immediate = record(&log, "immediate");
        EventHandler::new(move |exec, _| {
            log.lock().push(("spawner", exec.now()));
            assert_eq!(exec.current_priority(), 3.0);
            exec.request_immediate_event(immediate.clone(), None, ExecEventType::Synchronous)?;
            Ok(())
        })
    };
    exec.request_event(spawner, secs(5), 3.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "peer"), secs(5), 3.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "low"), secs(5), 1.0, None, ExecEventType::Synchronous)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(labels(&log), vec!["spawner", "peer", "immediate", "low"]);
    assert!(log.lock().iter().all(|(_, at)| *at == secs(5)));
}

#[test]
fn test_payload_reaches_handler() {
    let exec = FullExecutive::default();
    let seen = Arc::new(Mutex::new(None));
    let handler = {
        let seen = Arc::clone(&seen);
        EventHandler::new(move |_, data| {
            *seen.lock() = payload_ref::<String>(data).cloned();
            Ok(())
        })
    };
    exec.request(EventRequest::new(handler, secs(1)).payload(payload("hello".to_string())))
        .expect("should request event");
    exec.start().expect("run should succeed");
    assert_eq!(seen.lock().as_deref(), Some("hello"));
}

/// Randomized schedules always dispatch in `(time, -priority, key)` order.
#[test]
fn test_random_schedules_respect_ordering() {
    for seed in 0..8 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let exec = FullExecutive::default();
        let served: Arc<Mutex<Vec<(Duration, f64, i64)>>> = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let served = Arc::clone(&served);
            EventHandler::new(move |exec, data| {
                let key = payload_ref::<i64>(data).copied().unwrap_or(-1);
                served.lock().push((exec.now(), exec.current_priority(), key));
                Ok(())
            })
        };

        // A fresh executive assigns keys 0, 1, 2, ... so each payload carries
        // the key its request receives.
        for i in 0..200i64 {
            let when = Duration::from_millis(rng.gen_range(0..50));
            let priority = f64::from(rng.gen_range(-2..3));
            let key = exec
                .request(
                    EventRequest::new(handler.clone(), when)
                        .priority(priority)
                        .payload(payload(i)),
                )
                .expect("should request event");
            assert_eq!(key, EventKey(i));
        }

        exec.start().expect("run should succeed");

        let served = served.lock();
        assert_eq!(served.len(), 200, "seed {seed}");
        for pair in served.windows(2) {
            let (t1, p1, k1) = pair[0];
            let (t2, p2, k2) = pair[1];
            let ordered = t1 < t2 || (t1 == t2 && p1 > p2) || (t1 == t2 && p1 == p2 && k1 < k2);
            assert!(ordered, "seed {seed}: {:?} before {:?}", pair[0], pair[1]);
        }
    }
}
