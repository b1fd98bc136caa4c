use chrono::TimeZone;

use super::*;

fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, second).unwrap()
}

fn record(server_id: i64, sender: i64, content: &str, second: u32) -> ConfirmedMessage {
    ConfirmedMessage {
        server_id: MessageId(server_id),
        sender_id: UserId(sender),
        content: content.to_string(),
        client_ref: None,
        sent_at: at(second),
    }
}

fn pending(reference: &str, sender: i64, content: &str, second: u32) -> LogEntry {
    LogEntry {
        server_id: None,
        client_ref: Some(ClientRef(reference.to_string())),
        sender_id: UserId(sender),
        content: content.to_string(),
        timestamp: at(second),
        delivery: Delivery::Pending,
    }
}

#[test]
fn duplicate_server_ids_merge_to_one_entry() {
    let mut log = MessageLog::default();
    assert_eq!(log.merge_confirmed(&record(900, 3, "hi", 10)), MergeOutcome::Inserted);
    assert_eq!(log.merge_confirmed(&record(900, 3, "hi", 10)), MergeOutcome::Duplicate);
    // Same id with diverging content still merges to the first record.
    assert_eq!(log.merge_confirmed(&record(900, 3, "hi again", 11)), MergeOutcome::Duplicate);
    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].content, "hi");
}

#[test]
fn entries_stay_ordered_by_timestamp() {
    let mut log = MessageLog::default();
    log.merge_confirmed(&record(3, 1, "third", 30));
    log.merge_confirmed(&record(1, 1, "first", 10));
    log.merge_confirmed(&record(2, 2, "second", 20));

    let contents: Vec<_> = log.entries().iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[test]
fn matching_client_ref_promotes_provisional_entry() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "hi", 5));

    let mut confirmation = record(900, 7, "hi", 6);
    confirmation.client_ref = Some(ClientRef("r1".to_string()));
    assert_eq!(log.merge_confirmed(&confirmation), MergeOutcome::Promoted);

    assert_eq!(log.len(), 1);
    let entry = &log.entries()[0];
    assert_eq!(entry.server_id, Some(MessageId(900)));
    assert_eq!(entry.delivery, Delivery::Confirmed);
    assert_eq!(entry.timestamp, at(6));
    assert_eq!(entry.content, "hi");
}

#[test]
fn confirmation_paths_collapse_to_one_entry() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "hi", 5));

    let mut durable = record(900, 7, "hi", 6);
    durable.client_ref = Some(ClientRef("r1".to_string()));
    let echo = durable.clone();

    // Durable response first, channel echo second.
    assert_eq!(log.merge_confirmed(&durable), MergeOutcome::Promoted);
    assert_eq!(log.merge_confirmed(&echo), MergeOutcome::Duplicate);
    assert_eq!(log.len(), 1);

    // Echo first, durable response second.
    let mut log = MessageLog::default();
    log.insert_pending(pending("r2", 7, "yo", 5));
    let mut echo_first = record(901, 7, "yo", 6);
    echo_first.client_ref = Some(ClientRef("r2".to_string()));
    assert_eq!(log.merge_confirmed(&echo_first), MergeOutcome::Promoted);
    assert_eq!(log.merge_confirmed(&echo_first), MergeOutcome::Duplicate);
    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].delivery, Delivery::Confirmed);
}

#[test]
fn rollback_returns_original_content() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "draft", 5));

    assert_eq!(log.roll_back(&ClientRef("r1".to_string())), Some("draft".to_string()));
    assert!(log.is_empty());
    assert_eq!(log.roll_back(&ClientRef("r1".to_string())), None);
}

#[test]
fn rollback_leaves_promoted_entries_alone() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "hi", 5));
    let mut confirmation = record(900, 7, "hi", 6);
    confirmation.client_ref = Some(ClientRef("r1".to_string()));
    log.merge_confirmed(&confirmation);

    assert_eq!(log.roll_back(&ClientRef("r1".to_string())), None);
    assert_eq!(log.len(), 1);
}

#[test]
fn mark_failed_applies_only_while_pending() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "hi", 5));

    assert!(log.mark_failed(&ClientRef("r1".to_string())));
    assert_eq!(log.entries()[0].delivery, Delivery::Failed);
    assert!(!log.mark_failed(&ClientRef("r1".to_string())));
}

#[test]
fn late_confirmation_revives_failed_entry() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "hi", 5));
    log.mark_failed(&ClientRef("r1".to_string()));

    let mut confirmation = record(900, 7, "hi", 8);
    confirmation.client_ref = Some(ClientRef("r1".to_string()));
    assert_eq!(log.merge_confirmed(&confirmation), MergeOutcome::Promoted);
    assert_eq!(log.entries()[0].delivery, Delivery::Confirmed);
}

#[test]
fn seed_deduplicates_across_calls() {
    let mut log = MessageLog::default();
    log.seed(vec![record(900, 1, "a", 10), record(901, 2, "b", 20)]);
    log.seed(vec![record(901, 2, "b", 20), record(902, 1, "c", 30)]);

    assert_eq!(log.len(), 3);
    let ids: Vec<_> = log.entries().iter().map(|e| e.server_id).collect();
    assert_eq!(
        ids,
        vec![Some(MessageId(900)), Some(MessageId(901)), Some(MessageId(902))]
    );
}

#[test]
fn latest_confirmed_at_skips_provisional_entries() {
    let mut log = MessageLog::default();
    assert_eq!(log.latest_confirmed_at(), None);

    log.merge_confirmed(&record(900, 1, "a", 10));
    log.merge_confirmed(&record(901, 1, "b", 20));
    log.insert_pending(pending("r1", 7, "later", 30));

    assert_eq!(log.latest_confirmed_at(), Some(at(20)));
}

#[test]
fn provisional_entries_sort_after_confirmed_at_same_timestamp() {
    let mut log = MessageLog::default();
    log.insert_pending(pending("r1", 7, "mine", 10));
    log.merge_confirmed(&record(900, 3, "theirs", 10));

    let contents: Vec<_> = log.entries().iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["theirs", "mine"]);
}
