use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::models::{Role, User};
use crate::state::test_helpers::{T0, sample_room, sample_user, test_app};

fn new_poll(room_id: &str, duration: Option<i64>) -> NewPoll {
    NewPoll {
        question: "2+2?".into(),
        options: vec!["3".into(), "4".into()],
        duration,
        room_id: room_id.into(),
        created_by: Uuid::new_v4(),
    }
}

async fn seeded(max_polls: i32) -> (AppState, Arc<crate::clock::ManualClock>) {
    let (state, clock) = test_app(&[]);
    let mut room = sample_room("AB12CD");
    room.max_polls = max_polls;
    state.store.insert_room(&room).await.unwrap();
    (state, clock)
}

async fn add_student(state: &AppState, name: &str) -> User {
    let user = sample_user("AB12CD", name, Role::Student);
    state.store.insert_user(&user).await.unwrap();
    user
}

#[test]
fn percentage_rounds_half_up_and_handles_zero() {
    assert_eq!(percentage(0, 0), 0);
    assert_eq!(percentage(1, 2), 50);
    assert_eq!(percentage(1, 3), 33);
    assert_eq!(percentage(2, 3), 67);
    assert_eq!(percentage(1, 8), 13);
    assert_eq!(percentage(3, 3), 100);
}

#[tokio::test]
async fn create_poll_validates_payload() {
    let (state, _clock) = seeded(15).await;

    let mut blank = new_poll("AB12CD", None);
    blank.question = "   ".into();
    assert!(matches!(create_poll(&state, blank).await, Err(PollError::Validation(_))));

    let mut one_option = new_poll("AB12CD", None);
    one_option.options = vec!["only".into()];
    assert!(matches!(create_poll(&state, one_option).await, Err(PollError::Validation(_))));

    let mut empty_option = new_poll("AB12CD", None);
    empty_option.options = vec!["a".into(), " ".into()];
    assert!(matches!(create_poll(&state, empty_option).await, Err(PollError::Validation(_))));

    assert!(matches!(create_poll(&state, new_poll("AB12CD", Some(0))).await, Err(PollError::Validation(_))));
    assert_eq!(state.store.count_polls("AB12CD").await.unwrap(), 0);
}

#[tokio::test]
async fn create_poll_rejects_duration_past_clock_range() {
    let (state, _clock) = seeded(15).await;

    for duration in [i64::MAX / 10, i64::MAX / 1000] {
        let err = create_poll(&state, new_poll("AB12CD", Some(duration))).await.unwrap_err();
        assert!(matches!(err, PollError::Validation("Duration is too long")), "{duration}: {err}");
    }
    assert_eq!(state.store.count_polls("AB12CD").await.unwrap(), 0);
    let room = state.store.find_room("AB12CD").await.unwrap().unwrap();
    assert_eq!(room.current_poll_count, 0);

    let long = create_poll(&state, new_poll("AB12CD", Some(86_400))).await.unwrap();
    assert_eq!(long.end_time, T0 + 86_400_000);
}

#[tokio::test]
async fn create_poll_defaults_duration_and_sets_deadline() {
    let (state, _clock) = seeded(15).await;
    let poll = create_poll(&state, new_poll("AB12CD", None)).await.unwrap();

    assert_eq!(poll.duration, 60);
    assert_eq!(poll.created_at, T0);
    assert_eq!(poll.end_time, T0 + 60_000);
    assert!(poll.is_active);
    let room = state.store.find_room("AB12CD").await.unwrap().unwrap();
    assert_eq!(room.current_poll_count, 1);
}

#[tokio::test]
async fn create_poll_requires_room() {
    let (state, _clock) = test_app(&[]);
    let err = create_poll(&state, new_poll("NOPE00", None)).await.unwrap_err();
    assert!(matches!(err, PollError::RoomNotFound));
}

#[tokio::test]
async fn create_poll_stops_at_quota() {
    let (state, _clock) = seeded(2).await;
    create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap();
    create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap();

    let err = create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap_err();
    assert!(matches!(err, PollError::QuotaExceeded(2)));
    assert_eq!(err.to_string(), "Room has reached maximum poll limit of 2");
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
}

#[tokio::test]
async fn concurrent_creates_never_pass_quota() {
    let (state, _clock) = seeded(3).await;

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move { create_poll(&state, new_poll("AB12CD", Some(30))).await }));
    }
    let mut created = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(PollError::QuotaExceeded(3)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 3);
    assert_eq!(rejected, 9);
    assert_eq!(state.store.count_polls("AB12CD").await.unwrap(), 3);
    assert_eq!(state.store.find_room("AB12CD").await.unwrap().unwrap().current_poll_count, 3);
}

#[tokio::test]
async fn pending_answers_block_new_poll_until_everyone_answers() {
    let (state, _clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let bob = add_student(&state, "bob").await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    let err = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap_err();
    assert!(matches!(err, PollError::PendingAnswers(2)));
    assert_eq!(
        err.to_string(),
        "Cannot create new poll: 2 student(s) haven't answered the current poll yet"
    );

    submit_answer(&state, "AB12CD", poll.id, alice.id, 0).await.unwrap();
    assert!(matches!(create_poll(&state, new_poll("AB12CD", Some(30))).await, Err(PollError::PendingAnswers(1))));

    submit_answer(&state, "AB12CD", poll.id, bob.id, 1).await.unwrap();
    create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
}

#[tokio::test]
async fn pending_gate_ignores_kicked_students_and_expired_polls() {
    let (state, clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let _poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    state.store.mark_kicked(alice.id, T0).await.unwrap();
    create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    let bob = add_student(&state, "bob").await;
    assert!(matches!(create_poll(&state, new_poll("AB12CD", Some(30))).await, Err(PollError::PendingAnswers(1))));

    clock.advance(Duration::from_secs(30));
    let fresh = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    assert!(!has_user_answered(&state, fresh.id, bob.id).await.unwrap());
}

#[tokio::test]
async fn submit_answer_checks_in_order_without_mutating() {
    let (state, clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    assert!(matches!(submit_answer(&state, "AB12CD", Uuid::new_v4(), alice.id, 0).await, Err(PollError::NotFound)));
    assert!(matches!(submit_answer(&state, "AB12CD", poll.id, Uuid::new_v4(), 0).await, Err(PollError::UserNotFound)));
    assert!(matches!(submit_answer(&state, "AB12CD", poll.id, alice.id, 2).await, Err(PollError::InvalidOption)));
    assert!(matches!(submit_answer(&state, "AB12CD", poll.id, alice.id, -1).await, Err(PollError::InvalidOption)));

    let answer = submit_answer(&state, "AB12CD", poll.id, alice.id, 1).await.unwrap();
    assert_eq!(answer.option_text, "4");
    assert_eq!(answer.user_name, "alice");
    assert!(matches!(submit_answer(&state, "AB12CD", poll.id, alice.id, 0).await, Err(PollError::DuplicateAnswer)));

    clock.advance(Duration::from_secs(30));
    let bob = add_student(&state, "bob").await;
    assert!(matches!(submit_answer(&state, "AB12CD", poll.id, bob.id, 0).await, Err(PollError::NotActive)));

    let stored = state.store.find_poll(poll.id).await.unwrap().unwrap();
    assert_eq!(stored.answers.len(), 1);
}

#[tokio::test]
async fn submit_answer_rejects_poll_from_another_room() {
    let (state, _clock) = seeded(15).await;
    state.store.insert_room(&sample_room("EF34GH")).await.unwrap();
    let outsider = sample_user("EF34GH", "mallory", Role::Student);
    state.store.insert_user(&outsider).await.unwrap();
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    let err = submit_answer(&state, "EF34GH", poll.id, outsider.id, 0).await.unwrap_err();
    assert!(matches!(err, PollError::NotFound));
    assert!(state.store.find_poll(poll.id).await.unwrap().unwrap().answers.is_empty());
}

#[tokio::test]
async fn submit_to_closed_poll_is_not_active() {
    let (state, _clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    close_poll(&state, poll.id).await.unwrap();

    let err = submit_answer(&state, "AB12CD", poll.id, alice.id, 0).await.unwrap_err();
    assert!(matches!(err, PollError::NotActive));
    assert_eq!(err.to_string(), "Poll is not active or has expired");
}

#[tokio::test]
async fn concurrent_submits_from_one_user_record_once() {
    let (state, _clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    let (poll_id, user_id) = (poll.id, alice.id);

    let mut tasks = Vec::new();
    for i in 0..10 {
        let state = state.clone();
        tasks.push(tokio::spawn(async move { submit_answer(&state, "AB12CD", poll_id, user_id, i % 2).await }));
    }
    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(PollError::DuplicateAnswer) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 1);
    assert_eq!(state.store.find_poll(poll_id).await.unwrap().unwrap().answers.len(), 1);
}

#[tokio::test]
async fn two_students_split_fifty_fifty() {
    let (state, _clock) = seeded(15).await;
    let alice = add_student(&state, "alice").await;
    let bob = add_student(&state, "bob").await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    submit_answer(&state, "AB12CD", poll.id, alice.id, 0).await.unwrap();
    submit_answer(&state, "AB12CD", poll.id, bob.id, 1).await.unwrap();

    let results = get_poll_results(&state, poll.id).await.unwrap().results;
    assert_eq!(results.total_answers, 2);
    assert!(results.is_active);
    let counts: Vec<(usize, u32)> = results.option_counts.iter().map(|c| (c.count, c.percentage)).collect();
    assert_eq!(counts, vec![(1, 50), (1, 50)]);
    assert_eq!(results.option_counts[0].users[0].user_name, "alice");
    assert_eq!(results.option_counts[1].users[0].user_id, bob.id);
}

#[tokio::test]
async fn percentages_sum_to_hundred_within_rounding() {
    let (state, _clock) = seeded(15).await;
    let poll = create_poll(
        &state,
        NewPoll {
            question: "Pick".into(),
            options: vec!["a".into(), "b".into(), "c".into()],
            duration: Some(60),
            room_id: "AB12CD".into(),
            created_by: Uuid::new_v4(),
        },
    )
    .await
    .unwrap();
    for (i, name) in ["s1", "s2", "s3"].iter().enumerate() {
        let student = add_student(&state, name).await;
        submit_answer(&state, "AB12CD", poll.id, student.id, i64::try_from(i).unwrap()).await.unwrap();
    }

    let results = get_poll_results(&state, poll.id).await.unwrap().results;
    let sum: u32 = results.option_counts.iter().map(|c| c.percentage).sum();
    assert!((99..=101).contains(&sum), "sum was {sum}");
}

#[test]
fn tally_without_answers_is_all_zero() {
    let poll = crate::state::test_helpers::sample_poll("AB12CD", T0, 30);
    let summary = tally(&poll, T0);
    assert_eq!(summary.total_answers, 0);
    assert!(summary.option_counts.iter().all(|c| c.count == 0 && c.percentage == 0));
    assert!(summary.is_active);
    assert!(!tally(&poll, T0 + 30_000).is_active);
}

#[tokio::test]
async fn expired_poll_leaves_active_list_and_reports_inactive() {
    let (state, clock) = seeded(15).await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    assert_eq!(get_active_polls(&state, "AB12CD").await.unwrap().len(), 1);

    clock.advance(Duration::from_secs(29));
    assert!(get_poll_results(&state, poll.id).await.unwrap().results.is_active);

    clock.advance(Duration::from_secs(1));
    let results = get_poll_results(&state, poll.id).await.unwrap();
    assert!(!results.results.is_active);
    assert!(get_active_polls(&state, "AB12CD").await.unwrap().is_empty());
    assert!(!state.store.find_poll(poll.id).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let (state, clock) = seeded(15).await;
    create_poll(&state, new_poll("AB12CD", Some(10))).await.unwrap();
    clock.advance(Duration::from_secs(10));

    assert_eq!(sweep_expired(&state, "AB12CD").await.unwrap(), 1);
    assert_eq!(sweep_expired(&state, "AB12CD").await.unwrap(), 0);
}

#[tokio::test]
async fn close_poll_is_idempotent_and_reports_missing() {
    let (state, _clock) = seeded(15).await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();

    close_poll(&state, poll.id).await.unwrap();
    close_poll(&state, poll.id).await.unwrap();
    assert!(!get_poll_results(&state, poll.id).await.unwrap().results.is_active);
    assert!(matches!(close_poll(&state, Uuid::new_v4()).await, Err(PollError::NotFound)));
}

#[tokio::test]
async fn history_and_all_polls_are_newest_first() {
    let (state, clock) = seeded(15).await;
    let first = create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap();
    clock.advance(Duration::from_secs(10));
    let second = create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap();

    let all: Vec<Uuid> = get_all_poll_results(&state, "AB12CD")
        .await
        .unwrap()
        .iter()
        .map(|r| r.poll.id)
        .collect();
    assert_eq!(all, vec![second.id, first.id]);

    let history = get_poll_history(&state, "AB12CD").await.unwrap();
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[0].results.len(), 2);
    let json = serde_json::to_value(&history[0]).unwrap();
    assert!(json["results"][0].get("users").is_none());
    assert_eq!(json["totalAnswers"], 0);
}

#[tokio::test]
async fn room_stats_count_total_and_live() {
    let (state, clock) = seeded(4).await;
    create_poll(&state, new_poll("AB12CD", Some(5))).await.unwrap();
    clock.advance(Duration::from_secs(5));
    create_poll(&state, new_poll("AB12CD", Some(60))).await.unwrap();

    let stats = get_room_stats(&state, "AB12CD").await.unwrap();
    assert_eq!(stats, RoomStats { total_polls: 2, active_polls: 1, max_polls: 4, remaining_polls: 2 });
    assert!(matches!(get_room_stats(&state, "NOPE00").await, Err(PollError::RoomNotFound)));
}

#[tokio::test]
async fn poll_results_serialize_flat_with_results() {
    let (state, _clock) = seeded(15).await;
    let poll = create_poll(&state, new_poll("AB12CD", Some(30))).await.unwrap();
    let json = serde_json::to_value(get_poll_results(&state, poll.id).await.unwrap()).unwrap();

    assert_eq!(json["id"], poll.id.to_string());
    assert_eq!(json["question"], "2+2?");
    assert_eq!(json["endTime"], T0 + 30_000);
    assert_eq!(json["results"]["totalAnswers"], 0);
    assert_eq!(json["results"]["isActive"], true);
    assert_eq!(json["results"]["optionCounts"][1]["option"], "4");
    assert_eq!(json["results"]["optionCounts"][1]["percentage"], 0);
}
