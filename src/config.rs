use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

const DEFAULT_PORT: u16 = 2052;
const DEFAULT_CLIENT_URL: &str = "http://localhost:3000";
const DEFAULT_GRACE_SECS: u64 = 120;
const DEFAULT_COUNTDOWN_SECS: u32 = 5;
const DEFAULT_SESSION_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Delays that drive the room state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long a dropped connection may stay away before it counts as leaving.
    pub disconnect_grace: Duration,
    /// Ticks announced before a match starts.
    pub countdown_ticks: u32,
    pub countdown_period: Duration,
    /// Idle time after which a session outside any room is forgotten.
    pub session_ttl: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            disconnect_grace: Duration::from_secs(DEFAULT_GRACE_SECS),
            countdown_ticks: DEFAULT_COUNTDOWN_SECS,
            countdown_period: Duration::from_secs(1),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub client_url: String,
    pub tls: Option<TlsPaths>,
    pub timing: Timing,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Reads the environment, after loading `.env` when one exists.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("Ignoring unreadable .env file: {}", e);
            }
        }

        let tls = match (env::var("TLS_CERT_PATH"), env::var("TLS_KEY_PATH")) {
            (Ok(cert), Ok(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => None,
        };

        Config {
            port: parse_var("PORT", DEFAULT_PORT),
            client_url: env::var("CLIENT_URL").unwrap_or_else(|_| DEFAULT_CLIENT_URL.to_string()),
            tls,
            timing: Timing {
                disconnect_grace: Duration::from_secs(parse_var(
                    "DISCONNECT_GRACE_SECS",
                    DEFAULT_GRACE_SECS,
                )),
                countdown_ticks: parse_var("COUNTDOWN_SECS", DEFAULT_COUNTDOWN_SECS),
                session_ttl: Duration::from_secs(parse_var(
                    "SESSION_TTL_SECS",
                    DEFAULT_SESSION_TTL_SECS,
                )),
                ..Timing::default()
            },
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value {:?} for {}, using default", raw, name);
            default
        }),
        Err(_) => default,
    }
}
