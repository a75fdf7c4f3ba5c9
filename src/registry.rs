use std::collections::HashMap;

use log::info;
use rand::Rng;

use crate::error::RoomError;
use crate::messages::ServerMessage;
use crate::room::{Ctx, Room};
use crate::roster::Role;
use crate::session::SessionId;

pub type RoomId = u32;

/// Exclusive upper bound for generated ids; `0` never names a room.
const MAX_ROOM_ID: RoomId = 1_000_000;

/// Every live room, keyed by its numeric id.
#[derive(Default)]
pub struct Registry {
    rooms: HashMap<RoomId, Room>,
}

impl Registry {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn get_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&id)
    }

    fn generate_id(&self) -> RoomId {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1..MAX_ROOM_ID);
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    /// Opens a room with default settings and `owner` seated as player1.
    pub fn create_room(&mut self, owner: SessionId, username: String) -> RoomId {
        let id = self.generate_id();
        self.rooms.insert(id, Room::new(id, owner, username));
        info!("Room {} created", id);
        id
    }

    pub fn join_room(
        &mut self,
        id: RoomId,
        session: SessionId,
        username: String,
        ctx: &mut Ctx,
    ) -> Result<Role, RoomError> {
        let room = self.rooms.get_mut(&id).ok_or(RoomError::NotFound(id))?;
        let user = room.roster.join(session, username);
        let (role, announcement) = (user.role, format!("{} joined!", user.username));
        ctx.outbox
            .broadcast(id, ServerMessage::server_msg(announcement));
        Ok(role)
    }

    pub fn remove(&mut self, id: RoomId) -> Option<Room> {
        let room = self.rooms.remove(&id)?;
        info!("Room {} deleted", id);
        Some(room)
    }

    /// Drops the room once nobody is left in it.
    pub fn remove_if_empty(&mut self, id: RoomId) -> bool {
        if self.rooms.get(&id).is_some_and(|room| room.roster.is_empty()) {
            self.remove(id);
            true
        } else {
            false
        }
    }
}
