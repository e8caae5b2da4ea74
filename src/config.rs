use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::Settings;
use crate::error::ConfigError;
use crate::moderation::WordList;
use crate::room::DEFAULT_CAPACITY;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (default: 0.0.0.0)
    pub host: IpAddr,
    /// Bind port (default: 3000)
    pub port: u16,
    /// Static asset directory (default: public)
    pub public_dir: PathBuf,
    /// PEM certificate; TLS is attempted only when both paths are set
    pub tls_cert_path: Option<PathBuf>,
    /// PKCS#8 PEM private key
    pub tls_key_path: Option<PathBuf>,
    /// Delay before an empty room is deleted (default: 10s)
    pub room_grace: Duration,
    /// Length of an automatic ban (default: 30 minutes)
    pub ban_duration: Duration,
    /// Members allowed per room, 1 to 5 (default: 5)
    pub room_capacity: usize,
    /// Newline separated word list replacing the built-in one
    pub offensive_words_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        Config {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            public_dir: PathBuf::from("public"),
            tls_cert_path: None,
            tls_key_path: None,
            room_grace: settings.room_grace,
            ban_duration: settings.ban_duration,
            room_capacity: settings.room_capacity,
            offensive_words_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source; unset variables keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            host: parse_or(&lookup, "HOST", defaults.host)?,
            port: parse_or(&lookup, "PORT", defaults.port)?,
            public_dir: lookup("PUBLIC_DIR").map_or(defaults.public_dir, PathBuf::from),
            tls_cert_path: lookup("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: lookup("TLS_KEY_PATH").map(PathBuf::from),
            room_grace: Duration::from_secs(parse_or(
                &lookup,
                "ROOM_GRACE_SECS",
                defaults.room_grace.as_secs(),
            )?),
            ban_duration: Duration::from_secs(parse_or(
                &lookup,
                "BAN_DURATION_SECS",
                defaults.ban_duration.as_secs(),
            )?),
            room_capacity: parse_capacity(&lookup, defaults.room_capacity)?,
            offensive_words_path: lookup("OFFENSIVE_WORDS_PATH").map(PathBuf::from),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert_path.as_ref().zip(self.tls_key_path.as_ref())
    }

    pub fn settings(&self) -> Settings {
        Settings {
            room_capacity: self.room_capacity,
            room_grace: self.room_grace,
            ban_duration: self.ban_duration,
            ..Settings::default()
        }
    }

    pub fn word_list(&self) -> Result<WordList, ConfigError> {
        match &self.offensive_words_path {
            Some(path) => WordList::from_file(path),
            None => Ok(WordList::builtin()),
        }
    }
}

/// Rooms may be made smaller than the default cap, never larger or empty.
fn parse_capacity(
    lookup: &impl Fn(&str) -> Option<String>,
    default: usize,
) -> Result<usize, ConfigError> {
    let capacity = parse_or(lookup, "ROOM_CAPACITY", default)?;
    if (1..=DEFAULT_CAPACITY).contains(&capacity) {
        Ok(capacity)
    } else {
        Err(ConfigError::InvalidValue {
            name: "ROOM_CAPACITY",
            value: capacity.to_string(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::InvalidValue { name, value })
        }
        None => Ok(default),
    }
}
