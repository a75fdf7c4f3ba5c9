//! HTTP endpoints for identity, room creation and room joining.
//!
//! Every endpoint except `/client-url` is answered by the hub, which resolves
//! the `x-session-id` header to a session (opening one when it is missing or
//! unknown) and echoes the id back as `sessionId`.

use std::convert::Infallible;

use log::error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::registry::RoomId;
use crate::server::Server;
use crate::session::SessionId;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    SessionInfo,
    SubmitUsername { username: String },
    SubmitRoomName { name: String },
    CreateRoom,
    JoinRoom { id: RoomId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub body: ApiBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ApiBody {
    Session {
        username: String,
        /// `0` while the session is not in a room.
        room_id: RoomId,
    },
    Username {
        username: String,
        error_msg: String,
    },
    RoomName {
        error_msg: String,
    },
    Access {
        access_granted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_msg: Option<String>,
    },
}

#[derive(Deserialize)]
struct UsernameForm {
    username: String,
}

#[derive(Deserialize)]
struct RoomNameForm {
    #[serde(rename = "room-name")]
    room_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientUrl {
    client_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Failure {
    error_msg: String,
}

#[derive(Deserialize)]
pub struct SocketQuery {
    pub session: SessionId,
}

/// Missing or malformed ids resolve to a fresh session in the hub.
fn session_header() -> impl Filter<Extract = (Option<SessionId>,), Error = Rejection> + Clone {
    warp::header::optional::<String>(SESSION_HEADER)
        .map(|raw: Option<String>| raw.and_then(|raw| Uuid::parse_str(raw.trim()).ok()))
}

fn with_server(server: Server) -> impl Filter<Extract = (Server,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

async fn respond(
    server: Server,
    session: Option<SessionId>,
    request: ApiRequest,
) -> Result<impl Reply, Infallible> {
    match server.request(session, request).await {
        Ok(response) => Ok(warp::reply::with_status(
            warp::reply::json(&response),
            StatusCode::OK,
        )),
        Err(e) => {
            error!("API request failed: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&Failure {
                    error_msg: e.to_string(),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

/// Unparseable ids can never match a room.
fn parse_room_id(raw: &str) -> RoomId {
    raw.trim().parse().unwrap_or(0)
}

pub fn routes(
    server: Server,
    client_url: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let session_info = warp::path::end()
        .and(warp::get())
        .and(with_server(server.clone()))
        .and(session_header())
        .and_then(|server: Server, session: Option<SessionId>| {
            respond(server, session, ApiRequest::SessionInfo)
        });

    let client_url = warp::path("client-url")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::json(&ClientUrl {
                client_url: client_url.clone(),
            })
        });

    let submit_username = warp::path("submit-username")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_server(server.clone()))
        .and(session_header())
        .and(warp::body::json())
        .and_then(|server: Server, session: Option<SessionId>, form: UsernameForm| {
            respond(
                server,
                session,
                ApiRequest::SubmitUsername {
                    username: form.username,
                },
            )
        });

    let submit_room_name = warp::path("submit-room-name")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_server(server.clone()))
        .and(session_header())
        .and(warp::body::json())
        .and_then(|server: Server, session: Option<SessionId>, form: RoomNameForm| {
            respond(
                server,
                session,
                ApiRequest::SubmitRoomName {
                    name: form.room_name,
                },
            )
        });

    let create_room = warp::path("create-room")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_server(server.clone()))
        .and(session_header())
        .and_then(|server: Server, session: Option<SessionId>| {
            respond(server, session, ApiRequest::CreateRoom)
        });

    let join_room = warp::path!("join-room" / String)
        .and(warp::get())
        .and(with_server(server))
        .and(session_header())
        .and_then(|raw: String, server: Server, session: Option<SessionId>| {
            respond(
                server,
                session,
                ApiRequest::JoinRoom {
                    id: parse_room_id(&raw),
                },
            )
        });

    session_info
        .or(client_url)
        .or(submit_username)
        .or(submit_room_name)
        .or(create_room)
        .or(join_room)
}
