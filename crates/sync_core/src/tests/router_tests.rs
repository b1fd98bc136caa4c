use chrono::{TimeZone, Utc};
use shared::{
    domain::{ClientRef, EventId, GroupId, MessageId, PresenceState},
    protocol::{ChatTarget, PresenceFrame, RsvpFrame},
};

use super::*;

fn chat(sender: i64, target: ChatTarget, server_id: Option<i64>) -> Envelope {
    Envelope::Chat(ChatFrame {
        sender_id: UserId(sender),
        target,
        content: "hello".to_string(),
        server_id: server_id.map(MessageId),
        client_ref: Some(ClientRef("r1".to_string())),
        timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
    })
}

#[test]
fn group_frame_routes_to_matching_group_session() {
    let router = MessageRouter::new(Context::Group(GroupId(10)), UserId(7));
    let decision = router.route(chat(3, ChatTarget::Group { group_id: GroupId(10) }, Some(900)));

    match decision {
        RouteDecision::Chat(record) => {
            assert_eq!(record.server_id, MessageId(900));
            assert_eq!(record.sender_id, UserId(3));
            assert_eq!(record.content, "hello");
        }
        other => panic!("expected chat decision, got {other:?}"),
    }
}

#[test]
fn foreign_group_frame_is_dropped() {
    let router = MessageRouter::new(Context::Group(GroupId(10)), UserId(7));
    let decision = router.route(chat(3, ChatTarget::Group { group_id: GroupId(11) }, Some(900)));
    assert_eq!(decision, RouteDecision::Ignore(IgnoreReason::ForeignTarget));
}

#[test]
fn private_frames_route_for_either_party() {
    let router = MessageRouter::new(Context::Private(UserId(42)), UserId(7));

    // Peer to viewer.
    let inbound = chat(42, ChatTarget::Receiver { receiver_id: UserId(7) }, Some(900));
    assert!(matches!(router.route(inbound), RouteDecision::Chat(_)));

    // Viewer's own echo off the shared feed.
    let echo = chat(7, ChatTarget::Receiver { receiver_id: UserId(42) }, Some(901));
    assert!(matches!(router.route(echo), RouteDecision::Chat(_)));

    // A conversation between two other users never lands here.
    let foreign = chat(42, ChatTarget::Receiver { receiver_id: UserId(9) }, Some(902));
    assert_eq!(router.route(foreign), RouteDecision::Ignore(IgnoreReason::ForeignTarget));
}

#[test]
fn chat_without_server_id_is_dropped() {
    let router = MessageRouter::new(Context::Group(GroupId(10)), UserId(7));
    let decision = router.route(chat(3, ChatTarget::Group { group_id: GroupId(10) }, None));
    assert_eq!(decision, RouteDecision::Ignore(IgnoreReason::MissingServerId));
}

#[test]
fn rsvp_updates_route_only_to_their_event() {
    let frame = Envelope::RsvpUpdate(RsvpFrame {
        sender_id: UserId(3),
        event_id: EventId(5),
        status: RsvpStatus::Maybe,
        timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
    });

    let event_router = MessageRouter::new(Context::Event(EventId(5)), UserId(7));
    assert_eq!(
        event_router.route(frame.clone()),
        RouteDecision::Rsvp {
            user_id: UserId(3),
            status: RsvpStatus::Maybe
        }
    );

    let other_event = MessageRouter::new(Context::Event(EventId(6)), UserId(7));
    assert_eq!(
        other_event.route(frame.clone()),
        RouteDecision::Ignore(IgnoreReason::ForeignTarget)
    );

    let group_router = MessageRouter::new(Context::Group(GroupId(10)), UserId(7));
    assert_eq!(
        group_router.route(frame),
        RouteDecision::Ignore(IgnoreReason::ForeignTarget)
    );
}

#[test]
fn presence_frames_are_left_to_the_tracker() {
    let router = MessageRouter::new(Context::Private(UserId(42)), UserId(7));
    let frame = Envelope::Presence(PresenceFrame {
        sender_id: UserId(42),
        status: PresenceState::Online,
        timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
    });
    assert_eq!(router.route(frame), RouteDecision::Ignore(IgnoreReason::Presence));
}
