//! Joining on other events from a detachable context.

use std::{sync::Arc, thread, time::Duration};

use moonpool_executive::{
    EventHandler, ExecEventType, Executive, ExecutiveError, FullExecutive,
};
use parking_lot::Mutex;

use crate::support::{labels, log, note, record, secs};

#[test]
fn test_join_waits_for_all_keys() {
    let exec = FullExecutive::default();
    let log = log();
    let coordinator = {
        let log = log.clone();
        EventHandler::new(move |exec, _| {
            let first = exec.request_event(
                record(&log, "child-1"),
                secs(1),
                0.0,
                None,
                ExecEventType::Synchronous,
            )?;
            let second = exec.request_event(
                record(&log, "child-4"),
                secs(4),
                0.0,
                None,
                ExecEventType::Synchronous,
            )?;
            exec.join(&[first, second])?;
            note(&log, exec, "joined");
            Ok(())
        })
    };
    exec.request_event(coordinator, Duration::ZERO, 0.0, None, ExecEventType::Detachable)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(
        *log.lock(),
        vec![
            ("child-1", secs(1)),
            ("child-4", secs(4)),
            ("joined", secs(4)),
        ]
    );
}

#[test]
fn test_join_on_detachable_child_waits_for_its_return() {
    let exec = FullExecutive::default();
    let log = log();
    let child = {
        let log = log.clone();
        EventHandler::new(move |exec, _| {
            let ctrl = exec.current_detachable().ok_or("not in a detachable context")?;
            ctrl.suspend_for(secs(3))?;
            note(&log, exec, "child-done");
            Ok(())
        })
    };
    let parent = {
        let log = log.clone();
        EventHandler::new(move |exec, _| {
            let key = exec.request_event(
                child.clone(),
                exec.now(),
                0.0,
                None,
                ExecEventType::Detachable,
            )?;
            exec.join(&[key])?;
            note(&log, exec, "parent-joined");
            Ok(())
        })
    };
    exec.request_event(parent, secs(1), 0.0, None, ExecEventType::Detachable)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(
        *log.lock(),
        vec![("child-done", secs(4)), ("parent-joined", secs(4))]
    );
    assert!(exec.live_detachables().is_empty());
}

#[test]
fn test_cancelled_key_counts_as_completed() {
    let exec = FullExecutive::default();
    let log = log();
    let coordinator = {
        let log = log.clone();
        EventHandler::new(move |exec, _| {
            let kept = exec.request_event(
                record(&log, "kept"),
                secs(2),
                0.0,
                None,
                ExecEventType::Synchronous,
            )?;
            let cancelled = exec.request_event(
                record(&log, "cancelled"),
                secs(9),
                0.0,
                None,
                ExecEventType::Synchronous,
            )?;
            exec.unrequest_event(cancelled)?;
            exec.join(&[kept, cancelled])?;
            note(&log, exec, "joined");
            Ok(())
        })
    };
    exec.request_event(coordinator, Duration::ZERO, 0.0, None, ExecEventType::Detachable)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(labels(&log), vec!["kept", "joined"]);
    assert_eq!(exec.now(), secs(2));
}

#[test]
fn test_join_on_finished_keys_returns_immediately() {
    let exec = FullExecutive::default();
    let log = log();
    let done = exec
        .request_event(record(&log, "early"), secs(1), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    let late = {
        let log = log.clone();
        EventHandler::new(move |exec, _| {
            exec.join(&[done])?;
            note(&log, exec, "joined");
            Ok(())
        })
    };
    exec.request_event(late, secs(5), 0.0, None, ExecEventType::Detachable)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(*log.lock(), vec![("early", secs(1)), ("joined", secs(5))]);
}

#[test]
fn test_join_outside_detachable_context_is_an_error() {
    let exec = FullExecutive::default();
    let outcome = Arc::new(Mutex::new(None));
    let handler = {
        let outcome = Arc::clone(&outcome);
        EventHandler::new(move |exec, _| {
            *outcome.lock() = Some(exec.join(&[]));
            Ok(())
        })
    };
    exec.request_event(handler, secs(1), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    assert!(matches!(
        outcome.lock().take(),
        Some(Err(ExecutiveError::NotInDetachableContext))
    ));
    assert!(matches!(
        exec.join(&[]),
        Err(ExecutiveError::NotInDetachableContext)
    ));
}

#[test]
fn test_join_from_foreign_thread_is_rejected() {
    let exec = FullExecutive::default();
    let log = log();
    let target = exec
        .request_event(record(&log, "target"), secs(3), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    let rejected = Arc::new(Mutex::new(None));

    let worker = {
        let log = log.clone();
        let rejected = Arc::clone(&rejected);
        EventHandler::new(move |exec, _| {
            // Another thread asks to join while this context is the active one
            let outcome = thread::scope(|scope| {
                scope
                    .spawn(|| {
                        matches!(
                            exec.join(&[target]),
                            Err(ExecutiveError::NotInDetachableContext)
                        )
                    })
                    .join()
            });
            *rejected.lock() = Some(outcome.unwrap_or(false));

            let ctrl = exec.current_detachable().ok_or("not in a detachable context")?;
            ctrl.suspend_for(secs(10))?;
            note(&log, exec, "worker-resumed");
            Ok(())
        })
    };
    exec.request_event(worker, secs(1), 0.0, None, ExecEventType::Detachable)
        .expect("should request event");

    exec.start().expect("run should succeed");

    assert_eq!(*rejected.lock(), Some(true));
    assert_eq!(
        *log.lock(),
        vec![("target", secs(3)), ("worker-resumed", secs(11))]
    );
}
