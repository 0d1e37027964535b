use super::*;
use crate::state::test_helpers::{connect_client, drain, drain_events, recv_frame, test_app};

#[tokio::test]
async fn emit_to_room_skips_excluded_and_other_rooms() {
    let (state, _clock) = test_app(&[]);
    let (a, mut rx_a) = connect_client(&state).await;
    let (b, mut rx_b) = connect_client(&state).await;
    let (c, mut rx_c) = connect_client(&state).await;
    join_room(&state, a, "AB12CD").await;
    join_room(&state, b, "AB12CD").await;
    join_room(&state, c, "ZZ99ZZ").await;

    emit_to_room(&state, "AB12CD", &Frame::empty("messagesCleared"), Some(b)).await;

    let got = recv_frame(&mut rx_a).await;
    assert_eq!(got.event, "messagesCleared");
    assert_eq!(got.room_id.as_deref(), Some("AB12CD"));
    assert!(drain(&mut rx_b).is_empty());
    assert!(drain(&mut rx_c).is_empty());
}

#[tokio::test]
async fn emit_to_client_reports_missing_connection() {
    let (state, _clock) = test_app(&[]);
    let (a, mut rx_a) = connect_client(&state).await;

    assert!(emit_to_client(&state, a, Frame::empty("kicked")).await);
    assert_eq!(recv_frame(&mut rx_a).await.event, "kicked");

    unregister(&state, a).await;
    assert!(!emit_to_client(&state, a, Frame::empty("kicked")).await);
}

#[tokio::test]
async fn joining_another_room_leaves_the_first() {
    let (state, _clock) = test_app(&[]);
    let (a, _rx) = connect_client(&state).await;
    join_room(&state, a, "AB12CD").await;
    join_room(&state, a, "EF34GH").await;

    assert!(room_members(&state, "AB12CD").await.is_empty());
    assert!(!has_ticker(&state, "AB12CD").await);
    assert_eq!(room_members(&state, "EF34GH").await, vec![a]);
}

#[tokio::test]
async fn ticker_lives_while_room_has_members() {
    let (state, _clock) = test_app(&[]);
    let (a, _rx_a) = connect_client(&state).await;
    let (b, _rx_b) = connect_client(&state).await;

    join_room(&state, a, "AB12CD").await;
    assert!(has_ticker(&state, "AB12CD").await);
    join_room(&state, b, "AB12CD").await;

    assert_eq!(unregister(&state, a).await.as_deref(), Some("AB12CD"));
    assert!(has_ticker(&state, "AB12CD").await);

    assert_eq!(unregister(&state, b).await.as_deref(), Some("AB12CD"));
    assert!(!has_ticker(&state, "AB12CD").await);
    assert!(room_members(&state, "AB12CD").await.is_empty());
}

#[tokio::test]
async fn disconnect_queues_close_after_pending_frames() {
    let (state, _clock) = test_app(&[]);
    let (a, mut rx) = connect_client(&state).await;
    join_room(&state, a, "AB12CD").await;

    emit_to_client(&state, a, Frame::empty("kicked")).await;
    disconnect(&state, a).await;

    let queued = drain(&mut rx);
    assert_eq!(queued.len(), 2);
    assert!(matches!(&queued[0], Outbound::Frame(f) if f.event == "kicked"));
    assert!(matches!(queued[1], Outbound::Close));
    assert!(room_members(&state, "AB12CD").await.is_empty());

    emit_to_room(&state, "AB12CD", &Frame::empty("newMessage"), None).await;
    assert!(drain_events(&mut rx).is_empty());
}
