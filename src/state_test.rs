use super::*;
use test_helpers::{T0, test_app};

#[tokio::test]
async fn poll_lock_is_shared_per_room() {
    let (state, _clock) = test_app(&[]);
    let a1 = state.poll_lock("AB12CD").await;
    let a2 = state.poll_lock("AB12CD").await;
    let b = state.poll_lock("ZZ99ZZ").await;

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));

    let _held = a1.lock().await;
    assert!(a2.try_lock().is_err());
    assert!(b.try_lock().is_ok());
}

#[tokio::test]
async fn now_follows_injected_clock() {
    let (state, clock) = test_app(&[]);
    assert_eq!(state.now(), T0);
    clock.advance(std::time::Duration::from_secs(30));
    assert_eq!(state.now(), T0 + 30_000);
}
