use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::api::{ApiBody, ApiRequest, ApiResponse};
use crate::config::Timing;
use crate::error::RoomError;
use crate::messages::{Audience, ClientMessage, Outbound, Outbox};
use crate::registry::{Registry, RoomId};
use crate::room::Ctx;
use crate::roster::Role;
use crate::rules::{MoveOracle, StandardRules};
use crate::session::{is_valid_room_name, is_valid_username, SessionId, SessionStore};
use crate::timer::Scheduler;

pub type ConnectionId = Uuid;

const SESSION_SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Everything the hub reacts to, in arrival order.
#[derive(Debug)]
pub enum Command {
    Connect {
        session: SessionId,
        connection: ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Client {
        connection: ConnectionId,
        message: ClientMessage,
    },
    ClockExpired {
        room: RoomId,
        /// Identifies which armed timeout fired.
        token: u64,
        winner: Role,
    },
    CountdownTick {
        room: RoomId,
    },
    GraceExpired {
        room: RoomId,
        session: SessionId,
    },
    PruneSessions,
    Api {
        session: Option<SessionId>,
        request: ApiRequest,
        reply: oneshot::Sender<ApiResponse>,
    },
}

struct Connection {
    session: SessionId,
    sender: mpsc::UnboundedSender<Message>,
    /// Set once the socket entered its room and should receive broadcasts.
    room: Option<RoomId>,
}

struct Services {
    scheduler: Scheduler,
    oracle: Box<dyn MoveOracle>,
    timing: Timing,
}

impl Services {
    fn ctx<'a>(&'a self, outbox: &'a mut Outbox) -> Ctx<'a> {
        Ctx {
            scheduler: &self.scheduler,
            oracle: self.oracle.as_ref(),
            timing: &self.timing,
            outbox,
        }
    }
}

/// Owns every room and session. Runs as a single task so each command is
/// handled to completion before the next one starts.
struct Hub {
    registry: Registry,
    sessions: SessionStore,
    connections: HashMap<ConnectionId, Connection>,
    services: Services,
    outbox: Outbox,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Hub {
    fn new(
        scheduler: Scheduler,
        timing: Timing,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Hub {
            registry: Registry::default(),
            sessions: SessionStore::default(),
            connections: HashMap::new(),
            services: Services {
                scheduler,
                oracle: Box::new(StandardRules),
                timing,
            },
            outbox: Outbox::default(),
            commands,
        }
    }

    async fn run(mut self) {
        let _sweep = self
            .services
            .scheduler
            .every(SESSION_SWEEP_PERIOD, || Command::PruneSessions);
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                session,
                connection,
                sender,
            } => self.connect(session, connection, sender),
            Command::Disconnect { connection } => self.disconnect(connection),
            Command::Client {
                connection,
                message,
            } => self.client_message(connection, message),
            Command::ClockExpired {
                room,
                token,
                winner,
            } => {
                let mut ctx = self.services.ctx(&mut self.outbox);
                if let Some(room) = self.registry.get_mut(room) {
                    room.clock_expired(token, winner, &mut ctx);
                }
            }
            Command::CountdownTick { room } => {
                let mut ctx = self.services.ctx(&mut self.outbox);
                if let Some(room) = self.registry.get_mut(room) {
                    room.countdown_tick(&mut ctx);
                }
            }
            Command::GraceExpired { room, session } => self.grace_expired(room, session),
            Command::PruneSessions => self.prune_sessions(),
            Command::Api {
                session,
                request,
                reply,
            } => {
                let response = self.api(session, request);
                if reply.send(response).is_err() {
                    debug!("API caller went away before the reply");
                }
            }
        }
        self.deliver();
    }

    fn deliver(&mut self) {
        for Outbound { audience, message } in self.outbox.drain() {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            match audience {
                Audience::Room(room) => {
                    for connection in self.connections.values() {
                        if connection.room == Some(room) {
                            let _ = connection.sender.send(Message::text(text.clone()));
                        }
                    }
                }
                Audience::Connection(id) => {
                    if let Some(connection) = self.connections.get(&id) {
                        let _ = connection.sender.send(Message::text(text));
                    }
                }
            }
        }
    }

    /// Sessions with an open socket or a room seat are never dropped.
    fn prune_sessions(&mut self) {
        let connections = &self.connections;
        self.sessions.prune(self.services.timing.session_ttl, |id| {
            connections.values().any(|connection| connection.session == *id)
        });
    }

    fn connect(
        &mut self,
        session: SessionId,
        connection: ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        info!("Connection {} opened for session {}", connection, session);
        self.sessions.touch(&session);
        self.connections.insert(
            connection,
            Connection {
                session,
                sender,
                room: None,
            },
        );

        let Some(room_id) = self.sessions.room_of(&session) else {
            return;
        };
        let mut ctx = self.services.ctx(&mut self.outbox);
        if let Some(room) = self.registry.get_mut(room_id) {
            let returning = room.roster.get(&session).is_some_and(|user| !user.connected);
            if returning {
                room.reconnect(&session);
                room.broadcast_data(&mut ctx);
            }
        }
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        let Some(closed) = self.connections.remove(&connection) else {
            return;
        };
        info!("Connection {} closed", connection);

        let session = closed.session;
        if self.connections.values().any(|c| c.session == session) {
            return;
        }
        let Some(room_id) = self.sessions.room_of(&session) else {
            return;
        };
        let mut ctx = self.services.ctx(&mut self.outbox);
        if let Some(room) = self.registry.get_mut(room_id) {
            room.disconnect(&session, &mut ctx);
        }
    }

    fn grace_expired(&mut self, room_id: RoomId, session: SessionId) {
        let mut ctx = self.services.ctx(&mut self.outbox);
        let Some(room) = self.registry.get_mut(room_id) else {
            return;
        };
        if room.grace_expired(&session, &mut ctx).is_some() {
            self.detach(room_id, session);
        }
    }

    /// Forgets that `session` belongs to `room_id` and drops the room once empty.
    fn detach(&mut self, room_id: RoomId, session: SessionId) {
        if let Some(state) = self.sessions.get_mut(&session) {
            if state.room == Some(room_id) {
                state.room = None;
            }
        }
        for connection in self.connections.values_mut() {
            if connection.session == session && connection.room == Some(room_id) {
                connection.room = None;
            }
        }
        self.registry.remove_if_empty(room_id);
    }

    fn leave_room(&mut self, session: SessionId) {
        let Some(room_id) = self.sessions.room_of(&session) else {
            return;
        };
        let mut ctx = self.services.ctx(&mut self.outbox);
        if let Some(room) = self.registry.get_mut(room_id) {
            room.leave(&session, &mut ctx);
        }
        self.detach(room_id, session);
    }

    fn client_message(&mut self, connection: ConnectionId, message: ClientMessage) {
        let Some(session) = self.connections.get(&connection).map(|c| c.session) else {
            return;
        };
        let Some(room_id) = self.sessions.room_of(&session) else {
            debug!("Connection {} is not in a room, ignoring {:?}", connection, message);
            return;
        };

        if message == ClientMessage::LeaveRoom {
            self.leave_room(session);
            return;
        }

        let mut ctx = self.services.ctx(&mut self.outbox);
        let Some(room) = self.registry.get_mut(room_id) else {
            warn!("Session {} points at missing room {}", session, room_id);
            return;
        };

        match message {
            ClientMessage::EnterRoom => {
                if room.roster.contains(&session) {
                    if let Some(c) = self.connections.get_mut(&connection) {
                        c.room = Some(room_id);
                    }
                    room.enter(&session, connection, &mut ctx);
                }
            }
            ClientMessage::GetUserData => {
                if let Some(user_data) = room.user_data(&session) {
                    ctx.outbox.reply(connection, user_data);
                }
            }
            ClientMessage::Msg { text } => room.chat(&session, text, &mut ctx),
            ClientMessage::ChangedUsername { username } => {
                if room.rename(&session, &username, &mut ctx) {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.username = username;
                    }
                }
            }
            ClientMessage::ChangeRoomName => room.announce_name(&session, &mut ctx),
            ClientMessage::SetSettings { settings } => {
                room.set_settings(&session, &settings, &mut ctx);
            }
            ClientMessage::ReadyStatus { ready } => room.set_ready(&session, ready, &mut ctx),
            ClientMessage::Move {
                origin,
                destination,
            } => room.submit_move(&session, origin, destination, &mut ctx),
            ClientMessage::LeaveRoom => {}
        }
    }

    fn api(&mut self, session: Option<SessionId>, request: ApiRequest) -> ApiResponse {
        let session_id = self.sessions.resolve(session);
        let body = match request {
            ApiRequest::SessionInfo => {
                let (username, room_id) = self
                    .sessions
                    .get(&session_id)
                    .map(|s| (s.username.clone(), s.room.unwrap_or(0)))
                    .unwrap_or_default();
                ApiBody::Session { username, room_id }
            }
            ApiRequest::SubmitUsername { username } => self.submit_username(session_id, username),
            ApiRequest::SubmitRoomName { name } => {
                let error_msg = match self.submit_room_name(session_id, name) {
                    Ok(()) => String::new(),
                    Err(e) => e.to_string(),
                };
                ApiBody::RoomName { error_msg }
            }
            ApiRequest::CreateRoom => {
                self.leave_room(session_id);
                let username = self.username_of(session_id);
                let room_id = self.registry.create_room(session_id, username);
                if let Some(state) = self.sessions.get_mut(&session_id) {
                    state.room = Some(room_id);
                }
                ApiBody::Access {
                    access_granted: true,
                    error_msg: None,
                }
            }
            ApiRequest::JoinRoom { id } => match self.join_room(session_id, id) {
                Ok(()) => ApiBody::Access {
                    access_granted: true,
                    error_msg: None,
                },
                Err(e) => ApiBody::Access {
                    access_granted: false,
                    error_msg: Some(e.to_string()),
                },
            },
        };
        ApiResponse { session_id, body }
    }

    fn username_of(&self, session: SessionId) -> String {
        self.sessions
            .get(&session)
            .map(|s| s.username.clone())
            .unwrap_or_default()
    }

    fn submit_username(&mut self, session: SessionId, username: String) -> ApiBody {
        let Some(state) = self.sessions.get_mut(&session) else {
            return ApiBody::Username {
                username,
                error_msg: String::new(),
            };
        };
        let mut error_msg = String::new();
        if state.username != username {
            if is_valid_username(&username) {
                state.username = username;
            } else {
                error_msg = RoomError::InvalidUsername.to_string();
            }
        }
        ApiBody::Username {
            username: state.username.clone(),
            error_msg,
        }
    }

    fn submit_room_name(&mut self, session: SessionId, name: String) -> Result<(), RoomError> {
        if !is_valid_room_name(&name) {
            return Err(RoomError::InvalidRoomName);
        }
        let room_id = self.sessions.room_of(&session).ok_or(RoomError::NotInRoom)?;
        let room = self
            .registry
            .get_mut(room_id)
            .ok_or(RoomError::NotFound(room_id))?;
        room.name = name;
        Ok(())
    }

    /// Already being in a room counts as success; the client is sent back there.
    fn join_room(&mut self, session: SessionId, id: RoomId) -> Result<(), RoomError> {
        if self.sessions.room_of(&session).is_some() {
            return Ok(());
        }
        let username = self.username_of(session);
        let mut ctx = self.services.ctx(&mut self.outbox);
        self.registry.join_room(id, session, username, &mut ctx)?;
        if let Some(state) = self.sessions.get_mut(&session) {
            state.room = Some(id);
        }
        Ok(())
    }
}

/// Cheap handle to the hub task.
#[derive(Clone)]
pub struct Server {
    commands: mpsc::UnboundedSender<Command>,
}

impl Server {
    pub fn spawn(timing: Timing) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub::new(Scheduler::new(tx.clone()), timing, rx);
        tokio::spawn(hub.run());
        Server { commands: tx }
    }

    pub async fn request(
        &self,
        session: Option<SessionId>,
        request: ApiRequest,
    ) -> Result<ApiResponse, RoomError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Api {
                session,
                request,
                reply,
            })
            .map_err(|_| RoomError::Unavailable)?;
        response.await.map_err(|_| RoomError::Unavailable)
    }

    pub async fn handle_connection(&self, ws: WebSocket, session: SessionId) {
        let connection = Uuid::new_v4();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        if self
            .commands
            .send(Command::Connect {
                session,
                connection,
                sender: tx,
            })
            .is_err()
        {
            return;
        }

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    warn!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) => {
                    let Ok(text) = msg.to_str() else {
                        continue;
                    };
                    match serde_json::from_str::<ClientMessage>(text) {
                        Ok(message) => {
                            let command = Command::Client {
                                connection,
                                message,
                            };
                            if self.commands.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping malformed client message: {}", e),
                    }
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            }
        }

        let _ = self.commands.send(Command::Disconnect { connection });
    }
}
