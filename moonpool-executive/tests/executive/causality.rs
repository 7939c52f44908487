//! Requests for times earlier than the current time.

use std::sync::Arc;

use moonpool_executive::{
    EventHandler, EventKey, ExecEventType, Executive, ExecutiveConfiguration, ExecutiveError,
    FullExecutive,
};
use parking_lot::Mutex;

use crate::support::{labels, log, record, secs};

/// Handler at t=10 that requests an event at t=5 and stores the outcome.
fn past_requester(
    outcome: &Arc<Mutex<Option<Result<EventKey, ExecutiveError>>>>,
    late: EventHandler,
) -> EventHandler {
    let outcome = Arc::clone(outcome);
    EventHandler::new(move |exec, _| {
        let result =
            exec.request_event(late.clone(), secs(5), 0.0, None, ExecEventType::Synchronous);
        *outcome.lock() = Some(result);
        Ok(())
    })
}

#[test]
fn test_past_request_rejected_with_checking() {
    let exec = FullExecutive::default();
    let log = log();
    let outcome = Arc::new(Mutex::new(None));

    exec.request_event(
        past_requester(&outcome, record(&log, "late")),
        secs(10),
        0.0,
        None,
        ExecEventType::Synchronous,
    )
    .expect("should request event");
    exec.start().expect("run should succeed");

    let outcome = outcome.lock().take().expect("handler should have run");
    match outcome {
        Err(ExecutiveError::CausalityViolation { requested, now }) => {
            assert_eq!(requested, secs(5));
            assert_eq!(now, secs(10));
        }
        other => panic!("expected causality violation, got {other:?}"),
    }
    assert!(labels(&log).is_empty());
}

#[test]
fn test_past_request_ignored_without_checking() {
    let exec = FullExecutive::new(ExecutiveConfiguration::full().with_causality_checking(false));
    let log = log();
    let outcome = Arc::new(Mutex::new(None));

    exec.request_event(
        past_requester(&outcome, record(&log, "late")),
        secs(10),
        0.0,
        None,
        ExecEventType::Synchronous,
    )
    .expect("should request event");
    exec.start().expect("run should succeed");

    let outcome = outcome.lock().take().expect("handler should have run");
    assert_eq!(outcome.expect("request should not fail"), EventKey::IGNORED);
    assert!(labels(&log).is_empty());
    assert_eq!(exec.now(), secs(10));
}

#[test]
fn test_request_at_current_time_is_admitted() {
    let exec = FullExecutive::default();
    let log = log();
    let follow_up = record(&log, "same-time");
    let handler = EventHandler::new(move |exec, _| {
        exec.request_event(follow_up.clone(), exec.now(), 0.0, None, ExecEventType::Synchronous)?;
        Ok(())
    });
    exec.request_event(handler, secs(4), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");
    assert_eq!(*log.lock(), vec![("same-time", secs(4))]);
}

#[test]
fn test_resubmit_into_the_past_rejected() {
    let exec = FullExecutive::default();
    let log = log();
    let target = exec
        .request_event(record(&log, "target"), secs(20), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    let outcome = Arc::new(Mutex::new(None));
    let mover = {
        let outcome = Arc::clone(&outcome);
        EventHandler::new(move |exec, _| {
            *outcome.lock() = Some(exec.resubmit_event_at_time(target, secs(1), true));
            Ok(())
        })
    };
    exec.request_event(mover, secs(10), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    assert!(matches!(
        outcome.lock().take(),
        Some(Err(ExecutiveError::CausalityViolation { .. }))
    ));
    assert_eq!(*log.lock(), vec![("target", secs(20))]);
}

#[test]
fn test_finished_executive_rejects_requests() {
    let exec = FullExecutive::default();
    let log = log();
    exec.request_event(record(&log, "only"), secs(1), 0.0, None, ExecEventType::Synchronous)
        .expect("should request event");
    exec.start().expect("run should succeed");

    let result = exec.request_event(record(&log, "after"), secs(2), 0.0, None, ExecEventType::Synchronous);
    assert!(matches!(result, Err(ExecutiveError::ExecutiveFinished)));
}
