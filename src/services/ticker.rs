//! Per-room sweep ticker.
//!
//! DESIGN
//! ======
//! One task per non-empty room channel, owned by the hub. Each tick closes
//! deadline-expired polls and pushes refreshed state to every member:
//! `activePolls`, `roomStats`, then one `pollResults` per open poll.
//!
//! The first tick fires one full interval after start. Missed ticks are
//! skipped rather than bunched. A tick that finds the room empty ends the
//! task; normally the hub aborts it first.

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{info, warn};

use crate::frame::Frame;
use crate::services::{hub, poll};
use crate::state::AppState;

pub fn spawn_room_ticker(state: AppState, room_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = state.config.sweep_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if hub::room_members(&state, &room_id).await.is_empty() {
                break;
            }
            match timeout(state.config.request_timeout, tick_room(&state, &room_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%room_id, error = %e, "ticker: tick failed"),
                Err(_) => warn!(%room_id, "ticker: tick timed out"),
            }
        }
        info!(%room_id, "ticker: stopped");
    })
}

/// Sweep the room once and broadcast its refreshed state.
///
/// # Errors
///
/// Store errors from the sweep or the reads.
pub async fn tick_room(state: &AppState, room_id: &str) -> Result<(), poll::PollError> {
    let active = poll::get_active_polls(state, room_id).await?;
    let stats = poll::get_room_stats(state, room_id).await?;

    let mut results = Vec::with_capacity(active.len());
    for p in &active {
        results.push(poll::get_poll_results(state, p.id).await?);
    }

    hub::emit_to_room(state, room_id, &Frame::new("activePolls", &active), None).await;
    hub::emit_to_room(state, room_id, &Frame::new("roomStats", stats), None).await;
    for r in &results {
        hub::emit_to_room(state, room_id, &Frame::new("pollResults", r), None).await;
    }
    Ok(())
}

#[cfg(test)]
#[path = "ticker_test.rs"]
mod tests;
