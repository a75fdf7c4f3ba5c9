use serde::{Deserialize, Serialize};

use crate::board::{Color, Coord};
use crate::game::MatchSnapshot;
use crate::registry::RoomId;
use crate::roster::{Role, Status, UserView};
use crate::server::ConnectionId;
use crate::settings::{Settings, SettingsPatch};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    EnterRoom,
    GetUserData,
    Msg {
        text: String,
    },
    ChangedUsername {
        username: String,
    },
    ChangeRoomName,
    SetSettings {
        settings: SettingsPatch,
    },
    ReadyStatus {
        ready: bool,
    },
    Move {
        origin: Coord,
        destination: Coord,
    },
    LeaveRoom,
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Data {
        room_id: RoomId,
        name: String,
        users: Vec<UserView>,
    },
    Settings {
        settings: Settings,
    },
    UserData {
        status: Status,
        role: Role,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
    },
    ServerMsg {
        text: String,
    },
    StartGame {
        board: MatchSnapshot,
    },
    StartRound {
        board: MatchSnapshot,
    },
    BoardData {
        board: MatchSnapshot,
    },
    Msg {
        sender: String,
        text: String,
    },
}

impl ServerMessage {
    pub fn server_msg(text: impl Into<String>) -> Self {
        ServerMessage::ServerMsg { text: text.into() }
    }
}

/// Who receives an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Room(RoomId),
    Connection(ConnectionId),
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub message: ServerMessage,
}

/// Messages produced while handling one event, delivered once it completes.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<Outbound>,
}

impl Outbox {
    pub fn broadcast(&mut self, room: RoomId, message: ServerMessage) {
        self.messages.push(Outbound {
            audience: Audience::Room(room),
            message,
        });
    }

    pub fn reply(&mut self, connection: ConnectionId, message: ServerMessage) {
        self.messages.push(Outbound {
            audience: Audience::Connection(connection),
            message,
        });
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.messages.drain(..)
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[Outbound] {
        &self.messages
    }
}
