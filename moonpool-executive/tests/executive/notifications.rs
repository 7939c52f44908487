//! Lifecycle and dispatch notifications.

use std::{sync::Arc, time::Duration};

use moonpool_executive::{
    EventRequest, ExecEventType, Executive, FullExecutive, Notification, NotificationKind,
    TargetId, notification_handler,
};
use parking_lot::Mutex;

use crate::support::{labels, log, record, secs};

const ALL_KINDS: [NotificationKind; 10] = [
    NotificationKind::Started,
    NotificationKind::Stopped,
    NotificationKind::Paused,
    NotificationKind::Resumed,
    NotificationKind::Finished,
    NotificationKind::Aborted,
    NotificationKind::Reset,
    NotificationKind::EventAboutToFire,
    NotificationKind::EventCompleted,
    NotificationKind::ClockAboutToChange,
];

fn subscribe_all(exec: &FullExecutive) -> Arc<Mutex<Vec<NotificationKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in ALL_KINDS {
        let seen = Arc::clone(&seen);
        exec.subscribe(
            kind,
            notification_handler(move |_, notification| seen.lock().push(notification.kind())),
        );
    }
    seen
}

#[test]
fn test_run_notification_sequence() {
    let exec = FullExecutive::default();
    let log = log();
    let seen = subscribe_all(&exec);

    exec.request_event(record(&log, "zero"), Duration::ZERO, 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "five"), secs(5), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    use NotificationKind::*;
    assert_eq!(
        *seen.lock(),
        vec![
            Started,
            EventAboutToFire,
            EventCompleted,
            ClockAboutToChange,
            EventAboutToFire,
            EventCompleted,
            Finished
        ]
    );
}

#[test]
fn test_clock_notification_carries_both_times() {
    let exec = FullExecutive::default();
    let log = log();
    let changes = Arc::new(Mutex::new(Vec::new()));
    {
        let changes = Arc::clone(&changes);
        exec.subscribe(
            NotificationKind::ClockAboutToChange,
            notification_handler(move |exec, notification| {
                if let Notification::ClockAboutToChange { from, to } = notification {
                    assert_eq!(exec.now(), *from);
                    changes.lock().push((*from, *to));
                }
            }),
        );
    }
    exec.request_event(record(&log, "a"), secs(2), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "b"), secs(2), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.request_event(record(&log, "c"), secs(6), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    assert_eq!(
        *changes.lock(),
        vec![(Duration::ZERO, secs(2)), (secs(2), secs(6))]
    );
}

/// A subscriber may schedule work; the next event is selected afterwards.
#[test]
fn test_clock_subscriber_can_request_events() {
    let exec = FullExecutive::default();
    let log = log();
    let injected = record(&log, "injected");
    let once = Arc::new(Mutex::new(false));
    {
        let once = Arc::clone(&once);
        exec.subscribe(
            NotificationKind::ClockAboutToChange,
            notification_handler(move |exec, _| {
                let mut done = once.lock();
                if !*done {
                    *done = true;
                    exec.request(EventRequest::new(injected.clone(), secs(1)))
                        .expect("subscriber should be able to request");
                }
            }),
        );
    }
    exec.request_event(record(&log, "scheduled"), secs(3), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    assert_eq!(
        *log.lock(),
        vec![("injected", secs(1)), ("scheduled", secs(3))]
    );
}

#[test]
fn test_event_notifications_carry_event_info() {
    let exec = FullExecutive::default();
    let log = log();
    let keys = Arc::new(Mutex::new(Vec::new()));
    {
        let keys = Arc::clone(&keys);
        exec.subscribe(
            NotificationKind::EventAboutToFire,
            notification_handler(move |_, notification| {
                if let Notification::EventAboutToFire(info) = notification {
                    keys.lock().push((info.key, info.priority));
                }
            }),
        );
    }
    let first = exec
        .request_event(record(&log, "a"), secs(1), 2.5, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");
    assert_eq!(*keys.lock(), vec![(first, 2.5)]);
}

#[test]
fn test_unsubscribe_and_detach() {
    let exec = FullExecutive::default();
    let log = log();
    let owner = TargetId::new();
    let seen = Arc::new(Mutex::new(0usize));

    let id = {
        let seen = Arc::clone(&seen);
        exec.subscribe(
            NotificationKind::Started,
            notification_handler(move |_, _| *seen.lock() += 1),
        )
    };
    {
        let seen = Arc::clone(&seen);
        exec.subscribe_for(
            owner,
            NotificationKind::Started,
            notification_handler(move |_, _| *seen.lock() += 10),
        );
    }
    assert!(exec.unsubscribe(id));
    assert!(!exec.unsubscribe(id));

    exec.request(EventRequest::new(record(&log, "owned"), secs(1)).target(owner))
        .expect("should request event");
    exec.request(EventRequest::new(record(&log, "free"), secs(2)))
        .expect("should request event");
    exec.detach(owner).expect("detach should succeed");

    exec.start().expect("run should succeed");

    assert_eq!(*seen.lock(), 0);
    assert_eq!(labels(&log), vec!["free"]);
}

#[test]
fn test_abort_and_reset_notify() {
    let exec = FullExecutive::default();
    let log = log();
    let seen = subscribe_all(&exec);

    exec.request_event(record(&log, "a"), secs(1), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.abort().expect("abort should succeed while stopped");
    exec.reset();

    use NotificationKind::*;
    assert_eq!(*seen.lock(), vec![Reset, Aborted, Reset]);
    assert!(labels(&log).is_empty());
}
