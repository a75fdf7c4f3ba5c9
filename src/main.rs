mod api;
mod board;
mod clock;
mod config;
mod error;
mod game;
mod messages;
mod registry;
mod room;
mod roster;
mod rules;
mod server;
mod session;
mod settings;
mod timer;

use log::info;
use warp::{Filter, Rejection, Reply};

use api::SocketQuery;
use config::Config;
use server::Server;

/// Socket upgrade plus the HTTP API, with CORS and per-request logging.
fn app(
    server: Server,
    client_url: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let socket_server = server.clone();
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(warp::query::<SocketQuery>())
        .map(move |ws: warp::ws::Ws, query: SocketQuery| {
            let server = socket_server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket, query.session).await;
            })
        });

    ws_route
        .or(api::routes(server, client_url))
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_headers(vec!["content-type", api::SESSION_HEADER])
                .allow_methods(vec!["GET", "POST"]),
        )
        .with(warp::log("chess_rooms"))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();
    let server = Server::spawn(config.timing);

    let routes = app(server, config.client_url.clone());

    let address = ([0, 0, 0, 0], config.port);
    match &config.tls {
        Some(tls) => {
            info!("Starting secure server (HTTPS/WSS) on port {}...", config.port);
            warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .run(address)
                .await;
        }
        None => {
            info!("Starting server (HTTP/WS) on port {}...", config.port);
            warp::serve(routes).run(address).await;
        }
    }
}
