use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use groupalarm::alarm::{AlarmError, AlarmEvent, AlarmService, EventSink};

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn collecting_service() -> (AlarmService, Receiver<AlarmEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.lock().expect("sink sender").send(event);
    });
    let service = AlarmService::start(sink).expect("start service");
    (service, rx)
}

/// Drains events until `stop` returns true for one of them, or panics
/// after a timeout. Returns everything received up to and including
/// the matching event.
fn collect_until(
    rx: &Receiver<AlarmEvent>,
    stop: impl Fn(&AlarmEvent) -> bool,
) -> Vec<AlarmEvent> {
    let deadline = Instant::now() + EVENT_WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {seen:?}"));
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn expired_ids(events: &[AlarmEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            AlarmEvent::Expired { alarm_id, .. } => Some(*alarm_id),
            _ => None,
        })
        .collect()
}

#[test]
fn same_group_alarms_expire_in_deadline_order() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_millis(400), "A")
        .expect("submit 1");
    service
        .submit_alarm(2, 10, Duration::from_millis(150), "B")
        .expect("submit 2");

    let events = collect_until(&rx, |event| {
        matches!(event, AlarmEvent::Expired { alarm_id: 1, .. })
    });
    assert_eq!(expired_ids(&events), vec![2, 1]);

    // Both alarms announced through the one worker of group 10.
    let announced: Vec<(u32, u32)> = events
        .iter()
        .filter_map(|event| match event {
            AlarmEvent::Announced {
                alarm_id, group_id, ..
            } => Some((*alarm_id, *group_id)),
            _ => None,
        })
        .collect();
    assert!(announced.contains(&(1, 10)));
    assert!(announced.contains(&(2, 10)));

    service.shutdown();
}

#[test]
fn earlier_insert_preempts_current_wait() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_secs(30), "slow")
        .expect("submit 1");
    service
        .submit_alarm(2, 11, Duration::from_millis(100), "fast")
        .expect("submit 2");

    let started = Instant::now();
    let events = collect_until(&rx, |event| matches!(event, AlarmEvent::Expired { .. }));
    assert_eq!(expired_ids(&events), vec![2]);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "dispatcher stayed asleep on the stale 30s target"
    );

    service.shutdown();
}

#[test]
fn duplicate_submit_is_rejected_without_state_change() {
    let (service, _rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_secs(30), "first")
        .expect("submit");
    let err = service
        .submit_alarm(1, 20, Duration::from_secs(30), "second")
        .expect_err("duplicate id must fail");
    assert!(matches!(err, AlarmError::DuplicateId(1)));
    assert_eq!(service.queue_snapshot(), vec![(1, 10)]);

    service.shutdown();
}

#[test]
fn change_of_unknown_alarm_is_rejected() {
    let (service, _rx) = collecting_service();
    let err = service
        .change_alarm(77, 1, Duration::from_secs(1), "nope")
        .expect_err("unknown id must fail");
    assert!(matches!(err, AlarmError::UnknownAlarm(77)));

    service.shutdown();
}

#[test]
fn same_group_change_announces_without_a_new_worker() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_secs(30), "before")
        .expect("submit");
    collect_until(&rx, |event| {
        matches!(event, AlarmEvent::Announced { alarm_id: 1, .. })
    });
    assert_eq!(service.active_groups(), vec![10]);

    service
        .change_alarm(1, 10, Duration::from_secs(30), "after")
        .expect("change");
    let events = collect_until(&rx, |event| {
        matches!(event, AlarmEvent::Changed { alarm_id: 1, .. })
    });
    let changed_messages: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            AlarmEvent::Changed { message, .. } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(changed_messages, vec!["after"]);
    assert_eq!(service.active_groups(), vec![10]);
    assert_eq!(service.queue_snapshot(), vec![(1, 10)]);

    service.shutdown();
}

#[test]
fn cross_group_change_moves_the_alarm_and_stops_the_old_worker() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_secs(100), "A")
        .expect("submit");
    collect_until(&rx, |event| {
        matches!(
            event,
            AlarmEvent::Announced {
                alarm_id: 1,
                group_id: 10,
                ..
            }
        )
    });

    let changed_at = Instant::now();
    service
        .change_alarm(1, 20, Duration::from_millis(300), "B")
        .expect("change");

    let events = collect_until(&rx, |event| {
        matches!(event, AlarmEvent::Expired { alarm_id: 1, .. })
    });

    // The deadline was reset by the edit, not inherited from the
    // original 100s submission.
    assert!(
        changed_at.elapsed() < Duration::from_secs(5),
        "alarm kept its pre-edit deadline"
    );

    let old_group_stops = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                AlarmEvent::StoppedPrinting {
                    alarm_id: 1,
                    group_id: 10,
                    ..
                }
            )
        })
        .count();
    assert_eq!(old_group_stops, 1);

    let new_group_announces = events.iter().any(|event| {
        matches!(
            event,
            AlarmEvent::Announced {
                alarm_id: 1,
                group_id: 20,
                message,
                ..
            } if message == "B"
        )
    });
    assert!(new_group_announces, "group 20 never announced the moved alarm");

    service.shutdown();
}

#[test]
fn repeated_identical_change_is_idempotent() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_secs(60), "A")
        .expect("submit");
    collect_until(&rx, |event| {
        matches!(event, AlarmEvent::Announced { alarm_id: 1, .. })
    });

    service
        .change_alarm(1, 20, Duration::from_secs(60), "B")
        .expect("first change");
    service
        .change_alarm(1, 20, Duration::from_secs(60), "B")
        .expect("second change");

    let events = collect_until(&rx, |event| {
        matches!(
            event,
            AlarmEvent::Announced {
                alarm_id: 1,
                group_id: 20,
                ..
            }
        )
    });
    let old_group_stops = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                AlarmEvent::StoppedPrinting {
                    alarm_id: 1,
                    group_id: 10,
                    ..
                }
            )
        })
        .count();
    assert_eq!(old_group_stops, 1);
    assert_eq!(service.queue_snapshot(), vec![(1, 20)]);

    // The old group's teardown completes asynchronously.
    let deadline = Instant::now() + EVENT_WAIT;
    while service.active_groups() != vec![20] {
        assert!(Instant::now() < deadline, "group 10 worker never torn down");
        std::thread::sleep(Duration::from_millis(20));
    }

    service.shutdown();
}

#[test]
fn group_worker_is_torn_down_after_last_member_expires() {
    let (service, rx) = collecting_service();
    service
        .submit_alarm(1, 10, Duration::from_millis(150), "quick")
        .expect("submit");

    collect_until(&rx, |event| {
        matches!(
            event,
            AlarmEvent::StoppedPrinting {
                alarm_id: 1,
                group_id: 10,
                ..
            }
        )
    });

    // Teardown runs right after the stop line; give the dispatcher a
    // moment to finish the join.
    let deadline = Instant::now() + EVENT_WAIT;
    while !service.active_groups().is_empty() {
        assert!(Instant::now() < deadline, "group 10 worker never torn down");
        std::thread::sleep(Duration::from_millis(20));
    }

    service.shutdown();
}
