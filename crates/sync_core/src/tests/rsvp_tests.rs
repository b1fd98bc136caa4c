use super::*;

fn entry(user_id: i64, status: RsvpStatus) -> RsvpEntry {
    RsvpEntry {
        user_id: UserId(user_id),
        status,
    }
}

#[test]
fn merge_without_viewer_entry_preserves_viewer_status() {
    let mut aggregate = RsvpAggregate::new(EventId(5), UserId(7));
    aggregate.apply_update(UserId(7), RsvpStatus::Going);

    let changed = aggregate.merge_snapshot(&[
        entry(3, RsvpStatus::Going),
        entry(5, RsvpStatus::Maybe),
    ]);

    assert!(changed);
    assert_eq!(aggregate.viewer_status(), Some(RsvpStatus::Going));
    assert_eq!(aggregate.status_of(UserId(3)), Some(RsvpStatus::Going));
    assert_eq!(aggregate.status_of(UserId(5)), Some(RsvpStatus::Maybe));
}

#[test]
fn merge_with_viewer_entry_overwrites_viewer_status() {
    let mut aggregate = RsvpAggregate::new(EventId(5), UserId(7));
    aggregate.apply_update(UserId(7), RsvpStatus::Going);

    aggregate.merge_snapshot(&[entry(7, RsvpStatus::Declined)]);
    assert_eq!(aggregate.viewer_status(), Some(RsvpStatus::Declined));
}

#[test]
fn apply_update_reports_changes_only() {
    let mut aggregate = RsvpAggregate::new(EventId(5), UserId(7));

    assert!(aggregate.apply_update(UserId(3), RsvpStatus::Maybe));
    assert!(!aggregate.apply_update(UserId(3), RsvpStatus::Maybe));
    assert!(aggregate.apply_update(UserId(3), RsvpStatus::Going));
}

#[test]
fn snapshot_is_sorted_by_user_id() {
    let mut aggregate = RsvpAggregate::new(EventId(5), UserId(7));
    aggregate.apply_update(UserId(9), RsvpStatus::Maybe);
    aggregate.apply_update(UserId(2), RsvpStatus::Going);
    aggregate.apply_update(UserId(5), RsvpStatus::Declined);

    let users: Vec<_> = aggregate.snapshot().iter().map(|e| e.user_id).collect();
    assert_eq!(users, vec![UserId(2), UserId(5), UserId(9)]);
}
