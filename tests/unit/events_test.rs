//! Tests for task event sinks

use quota_scheduler::core::{
    build_task_event, CompletionReason, EventSink, InMemoryEventSink, NullEventSink, TaskEventKind,
    TracingEventSink,
};

#[test]
fn test_in_memory_event_sink() {
    let mut sink = InMemoryEventSink::new(10);

    let event = build_task_event("r1", "team-a", Some("w1".to_string()), 5, TaskEventKind::Enqueued);
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].request_id, "r1");
    assert_eq!(events[0].action(), "enqueue");
}

#[test]
fn test_event_sink_overflow() {
    let mut sink = InMemoryEventSink::new(2);

    sink.record(build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued));
    sink.record(build_task_event("r2", "a", None, 2, TaskEventKind::Enqueued));
    sink.record(build_task_event("r3", "a", None, 3, TaskEventKind::Enqueued));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].request_id, "r2"); // First one popped
    assert_eq!(events[1].request_id, "r3");
}

#[test]
fn test_events_for_filters_by_request() {
    let mut sink = InMemoryEventSink::new(10);
    sink.record(build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued));
    sink.record(build_task_event("r2", "a", None, 1, TaskEventKind::Enqueued));
    sink.record(build_task_event(
        "r1",
        "a",
        Some("w1".into()),
        2,
        TaskEventKind::Assigned {
            priority: 0,
            preempting: false,
        },
    ));

    let r1 = sink.events_for("r1");
    assert_eq!(r1.len(), 2);
    assert_eq!(r1[1].action(), "assign");
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued);
    let b = build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued);
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn test_event_json_is_flat() {
    let event = build_task_event(
        "r1",
        "a",
        Some("w1".into()),
        9,
        TaskEventKind::Completed {
            reason: CompletionReason::TaskAbsent,
        },
    );
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"], "completed");
    assert_eq!(json["reason"], "task_absent");
    assert_eq!(json["request_id"], "r1");
}

#[test]
fn test_null_and_tracing_sinks_accept_events() {
    let mut null = NullEventSink;
    null.record(build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued));
    let mut tracing_sink = TracingEventSink;
    tracing_sink.record(build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued));
}

#[test]
fn test_zero_capacity_sink_stores_nothing() {
    let mut sink = InMemoryEventSink::new(0);
    sink.record(build_task_event("r1", "a", None, 1, TaskEventKind::Enqueued));
    assert!(sink.is_empty());
}
