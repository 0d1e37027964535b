use std::time::Duration;

use super::*;
use crate::config::Config;
use crate::models::Role;
use crate::state::test_helpers::{T0, sample_user, test_app, test_app_with_config};

#[tokio::test]
async fn append_trims_and_denormalizes_sender() {
    let (state, _clock) = test_app(&[]);
    let teacher = sample_user("AB12CD", "Ms. Frizzle", Role::Teacher);

    let message = append(&state, &teacher, "  hello class  ").await.unwrap();
    assert_eq!(message.text, "hello class");
    assert_eq!(message.sender, teacher.id);
    assert_eq!(message.sender_name, "Ms. Frizzle");
    assert_eq!(message.sender_role, Role::Teacher);
    assert_eq!(message.room_id, "AB12CD");
    assert_eq!(message.created_at, T0);
}

#[tokio::test]
async fn append_rejects_blank_and_oversized() {
    let config = Config { max_message_len: 5, ..Config::default() };
    let (state, _clock) = test_app_with_config(config, &[]);
    let student = sample_user("AB12CD", "alice", Role::Student);

    assert!(matches!(append(&state, &student, "   ").await, Err(ChatError::Empty)));
    assert!(matches!(append(&state, &student, "toolong").await, Err(ChatError::TooLong(5))));
    assert!(append(&state, &student, " hey! ").await.is_ok());
    assert_eq!(history(&state, "AB12CD").await.unwrap().len(), 1);
}

#[tokio::test]
async fn history_is_oldest_first_and_clear_is_scoped() {
    let (state, clock) = test_app(&[]);
    let alice = sample_user("AB12CD", "alice", Role::Student);
    let other = sample_user("ZZ99ZZ", "zed", Role::Student);

    append(&state, &alice, "first").await.unwrap();
    clock.advance(Duration::from_millis(10));
    append(&state, &alice, "second").await.unwrap();
    append(&state, &other, "elsewhere").await.unwrap();

    let texts: Vec<String> = history(&state, "AB12CD")
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["first", "second"]);

    assert_eq!(clear(&state, "AB12CD").await.unwrap(), 2);
    assert!(history(&state, "AB12CD").await.unwrap().is_empty());
    assert_eq!(history(&state, "ZZ99ZZ").await.unwrap().len(), 1);
}
