use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::board::Color;
use crate::clock::{Clock, ClockView};
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player1,
    Player2,
    Spectator,
}

impl Role {
    /// The other seat at the board; spectators have none.
    pub fn opponent(self) -> Option<Role> {
        match self {
            Role::Player1 => Some(Role::Player2),
            Role::Player2 => Some(Role::Player1),
            Role::Spectator => None,
        }
    }

    pub fn is_player(self) -> bool {
        self != Role::Spectator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Owner,
    Guest,
}

#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub role: Role,
    pub status: Status,
    pub connected: bool,
    pub ready: bool,
    pub color: Option<Color>,
    pub clock: Option<Clock>,
}

impl User {
    pub fn new(username: String, role: Role, status: Status) -> Self {
        User {
            username,
            role,
            status,
            connected: true,
            ready: false,
            color: None,
            clock: None,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.status == Status::Owner
    }

    pub fn view(&self) -> UserView {
        UserView {
            username: self.username.clone(),
            role: self.role,
            status: self.status,
            connected: self.connected,
            ready: self.ready,
            color: self.color,
            clock: self.clock.as_ref().map(Clock::view),
        }
    }
}

/// What other participants see of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub username: String,
    pub role: Role,
    pub status: Status,
    pub connected: bool,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockView>,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    users: HashMap<SessionId, User>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.users.contains_key(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &User)> {
        self.users.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SessionId, &mut User)> {
        self.users.iter_mut()
    }

    pub fn find_role(&self, role: Role) -> Option<SessionId> {
        self.users
            .iter()
            .find(|(_, user)| user.role == role)
            .map(|(id, _)| *id)
    }

    /// Role a newcomer gets: a free player seat, player1 first.
    pub fn identify_init_role(&self) -> Role {
        let mut role = Role::Spectator;
        if self.find_role(Role::Player2).is_none() {
            role = Role::Player2;
        }
        if self.find_role(Role::Player1).is_none() {
            role = Role::Player1;
        }
        role
    }

    pub fn insert_owner(&mut self, id: SessionId, username: String) {
        self.users
            .insert(id, User::new(username, Role::Player1, Status::Owner));
    }

    pub fn join(&mut self, id: SessionId, username: String) -> &User {
        let role = self.identify_init_role();
        self.users
            .entry(id)
            .or_insert_with(|| User::new(username, role, Status::Guest))
    }

    /// Removes a user and repairs seats and ownership among those left.
    pub fn remove(&mut self, id: &SessionId) -> Option<User> {
        let user = self.users.remove(id)?;
        if self.users.is_empty() {
            return Some(user);
        }

        if self.find_role(Role::Player1).is_none() {
            if let Some(promoted) = self.find_role(Role::Player2) {
                if let Some(promoted) = self.users.get_mut(&promoted) {
                    promoted.role = Role::Player1;
                }
            }
        }

        if user.is_owner() {
            let heir = self
                .find_role(Role::Player1)
                .or_else(|| self.users.keys().next().copied());
            if let Some(heir) = heir.and_then(|id| self.users.get_mut(&id)) {
                heir.status = Status::Owner;
            }
        }

        Some(user)
    }

    /// Borrows two distinct users at once.
    pub fn pair_mut(&mut self, a: &SessionId, b: &SessionId) -> Option<(&mut User, &mut User)> {
        let mut first = None;
        let mut second = None;
        for (id, user) in &mut self.users {
            if id == a {
                first = Some(user);
            } else if id == b {
                second = Some(user);
            }
        }
        first.zip(second)
    }

    pub fn views(&self) -> Vec<UserView> {
        self.users.values().map(User::view).collect()
    }
}
