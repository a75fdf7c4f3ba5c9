use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;
use uuid::Uuid;

use crate::registry::RoomId;

pub type SessionId = Uuid;

pub const DEFAULT_USERNAME: &str = "Player";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub room: Option<RoomId>,
    last_seen: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            username: DEFAULT_USERNAME.to_string(),
            room: None,
            last_seen: Instant::now(),
        }
    }
}

/// Durable identities keyed by the id clients present on every request.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
}

impl SessionStore {
    /// Returns the known session for `id`, or opens a fresh one.
    pub fn resolve(&mut self, id: Option<SessionId>) -> SessionId {
        match id {
            Some(id) if self.sessions.contains_key(&id) => {
                self.touch(&id);
                id
            }
            _ => {
                let id = Uuid::new_v4();
                self.sessions.insert(id, Session::default());
                id
            }
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn room_of(&self, id: &SessionId) -> Option<RoomId> {
        self.sessions.get(id).and_then(|session| session.room)
    }

    pub fn touch(&mut self, id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_seen = Instant::now();
        }
    }

    /// Forgets sessions outside any room that have been idle longer than
    /// `ttl`, except those in `live`. Returns how many were dropped.
    pub fn prune(&mut self, ttl: Duration, live: impl Fn(&SessionId) -> bool) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            session.room.is_some()
                || live(id)
                || now.saturating_duration_since(session.last_seen) <= ttl
        });
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            debug!("Pruned {} idle sessions", dropped);
        }
        dropped
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn is_identifier(candidate: &str, min_len: usize) -> bool {
    let mut chars = candidate.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    starts_with_letter
        && candidate.chars().count() >= min_len
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// At least four characters, starting with a letter, letters/digits/`_` only.
pub fn is_valid_username(candidate: &str) -> bool {
    is_identifier(candidate, 4)
}

/// Same shape as a username but at least five characters long.
pub fn is_valid_room_name(candidate: &str) -> bool {
    is_identifier(candidate, 5)
}
