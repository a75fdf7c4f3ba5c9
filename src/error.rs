use thiserror::Error;

use crate::registry::RoomId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Sorry, we couldn't find room with this ID.")]
    NotFound(RoomId),
    #[error("Username should be at least 4 symbols long and can only include letters, digits and '_' symbol")]
    InvalidUsername,
    #[error("Room name should be at least 5 symbols long and can only include letters, digits and '_' symbol")]
    InvalidRoomName,
    #[error("You are not in a room")]
    NotInRoom,
    #[error("Server is shutting down")]
    Unavailable,
}
