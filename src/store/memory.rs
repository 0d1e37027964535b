//! In-memory `Store`.
//!
//! DESIGN
//! ======
//! All collections live behind one `RwLock`. Each trait method takes the lock
//! once, so every operation is atomic with respect to every other. Vectors
//! keep insertion order, which doubles as creation order; linear scans are
//! fine at classroom scale.

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AnswerWrite, Store, StoreError};
use crate::models::{Answer, BanEntry, ConnId, Message, Poll, Role, Room, User, UserRebind};

#[derive(Default)]
struct Inner {
    rooms: Vec<Room>,
    users: Vec<User>,
    polls: Vec<Poll>,
    messages: Vec<Message>,
}

impl Inner {
    fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.room_id == room_id)
    }

    fn user_mut(&mut self, user_id: Uuid) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == user_id)
    }

    fn poll_mut(&mut self, poll_id: Uuid) -> Option<&mut Poll> {
        self.polls.iter_mut().find(|p| p.id == poll_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_active_student(user: &User) -> bool {
    user.role == Role::Student && !user.kicked
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.rooms.iter().any(|r| r.room_id == room.room_id) {
            return Err(StoreError::Conflict("room code"));
        }
        inner.rooms.push(room.clone());
        Ok(())
    }

    async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.rooms.iter().find(|r| r.room_id == room_id).cloned())
    }

    async fn increment_poll_count(&self, room_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(room) = inner.room_mut(room_id) else {
            return Ok(false);
        };
        if room.current_poll_count >= room.max_polls {
            return Ok(false);
        }
        room.current_poll_count += 1;
        Ok(true)
    }

    async fn push_ban(&self, room_id: &str, ban: &BanEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(room) = inner.room_mut(room_id) {
            room.kicked_users.push(ban.clone());
        }
        Ok(())
    }

    async fn pull_expired_bans(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(room) = inner.room_mut(room_id) else {
            return Ok(0);
        };
        let before = room.kicked_users.len();
        room.kicked_users.retain(|ban| ban.is_active(now));
        Ok((before - room.kicked_users.len()) as u64)
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if is_active_student(user)
            && inner
                .users
                .iter()
                .any(|u| is_active_student(u) && u.room_id == user.room_id && u.name == user.name)
        {
            return Err(StoreError::Conflict("student name"));
        }
        if user.socket_id.is_some() && inner.users.iter().any(|u| u.socket_id == user.socket_id) {
            return Err(StoreError::Conflict("socket handle"));
        }
        inner.users.push(user.clone());
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_user_by_socket(&self, socket_id: ConnId) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .iter()
            .find(|u| u.socket_id == Some(socket_id))
            .cloned())
    }

    async fn find_student_by_name(&self, room_id: &str, name: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        let candidates = inner
            .users
            .iter()
            .filter(|u| u.role == Role::Student && u.room_id == room_id && u.name == name);
        let mut fallback = None;
        for user in candidates {
            if !user.kicked {
                return Ok(Some(user.clone()));
            }
            fallback.get_or_insert_with(|| user.clone());
        }
        Ok(fallback)
    }

    async fn rebind_user(&self, user_id: Uuid, rebind: &UserRebind) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.user_mut(user_id).is_none() {
            return Ok(None);
        }
        if let Some(socket_id) = rebind.socket_id {
            for other in inner.users.iter_mut().filter(|u| u.id != user_id) {
                if other.socket_id == Some(socket_id) {
                    other.socket_id = None;
                }
            }
        }
        let Some(user) = inner.user_mut(user_id) else {
            return Ok(None);
        };
        if let Some(name) = &rebind.name {
            user.name.clone_from(name);
        }
        if let Some(role) = rebind.role {
            user.role = role;
        }
        if let Some(room_id) = &rebind.room_id {
            user.room_id.clone_from(room_id);
        }
        if rebind.socket_id.is_some() {
            user.socket_id = rebind.socket_id;
        }
        if rebind.clear_kicked {
            user.kicked = false;
        }
        Ok(Some(user.clone()))
    }

    async fn mark_kicked(&self, user_id: Uuid, now: i64) -> Result<Option<(User, Option<ConnId>)>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner.user_mut(user_id) else {
            return Ok(None);
        };
        let prior = user.socket_id.take();
        user.kicked = true;
        user.last_kicked_at = Some(now);
        Ok(Some((user.clone(), prior)))
    }

    async fn list_students(&self, room_id: &str) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .iter()
            .filter(|u| is_active_student(u) && u.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn find_teacher(&self, room_id: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .iter()
            .find(|u| u.role == Role::Teacher && u.room_id == room_id)
            .cloned())
    }

    async fn insert_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.polls.iter().any(|p| p.id == poll.id) {
            return Err(StoreError::Conflict("poll id"));
        }
        inner.polls.push(poll.clone());
        Ok(())
    }

    async fn find_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.polls.iter().find(|p| p.id == poll_id).cloned())
    }

    async fn list_polls(&self, room_id: &str) -> Result<Vec<Poll>, StoreError> {
        let inner = self.inner.read().await;
        let mut polls: Vec<Poll> = inner
            .polls
            .iter()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        polls.sort_by_key(|p| p.created_at);
        polls.reverse();
        Ok(polls)
    }

    async fn list_live_polls(&self, room_id: &str, now: i64) -> Result<Vec<Poll>, StoreError> {
        let inner = self.inner.read().await;
        let mut polls: Vec<Poll> = inner
            .polls
            .iter()
            .filter(|p| p.room_id == room_id && p.is_live(now))
            .cloned()
            .collect();
        polls.sort_by_key(|p| p.created_at);
        Ok(polls)
    }

    async fn close_poll(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(poll) = inner.poll_mut(poll_id) else {
            return Ok(false);
        };
        poll.is_active = false;
        Ok(true)
    }

    async fn close_expired_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut closed = 0;
        for poll in inner
            .polls
            .iter_mut()
            .filter(|p| p.room_id == room_id && p.is_active && p.end_time <= now)
        {
            poll.is_active = false;
            closed += 1;
        }
        Ok(closed)
    }

    async fn count_polls(&self, room_id: &str) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.polls.iter().filter(|p| p.room_id == room_id).count() as u64)
    }

    async fn count_live_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .polls
            .iter()
            .filter(|p| p.room_id == room_id && p.is_live(now))
            .count() as u64)
    }

    async fn push_answer(&self, poll_id: Uuid, answer: &Answer, now: i64) -> Result<AnswerWrite, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(poll) = inner.poll_mut(poll_id) else {
            return Ok(AnswerWrite::NotLive);
        };
        if !poll.is_live(now) {
            return Ok(AnswerWrite::NotLive);
        }
        if poll.has_answer_from(answer.user_id) {
            return Ok(AnswerWrite::Duplicate);
        }
        poll.answers.push(answer.clone());
        Ok(AnswerWrite::Appended)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let mut messages: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn delete_messages(&self, room_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.room_id != room_id);
        Ok((before - inner.messages.len()) as u64)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
