use clap::Parser;
use serde::*;
use std::{collections::HashMap, fs::read_to_string, net::SocketAddr, path::PathBuf};

#[derive(Deserialize, Debug)]
pub struct Listen {
    /// client listener address
    ///
    /// the address and port bound for ordinary client connections.
    #[serde(default = "Listen::clients")]
    pub clients: SocketAddr,

    /// server listener address
    ///
    /// the address and port other servers connect to for linking. ignored
    /// unless `servers_enabled` is set.
    #[serde(default = "Listen::servers")]
    pub servers: SocketAddr,

    /// whether the server listener is bound at all
    ///
    /// a standalone node with no peers has no reason to expose a server
    /// port.
    #[serde(default)]
    pub servers_enabled: bool,
}

impl Listen {
    fn clients() -> SocketAddr {
        "0.0.0.0:6667".parse().unwrap()
    }

    fn servers() -> SocketAddr {
        "0.0.0.0:7000".parse().unwrap()
    }
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            clients: Self::clients(),
            servers: Self::servers(),
            servers_enabled: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct SendClassConfig {
    pub name: String,
    /// cap in bytes
    pub cap: u64,
    /// whether links in this class are granted the connect-burst
    /// cap-doubling window on admission.
    #[serde(default)]
    pub burst: bool,
}

#[derive(Deserialize, Debug)]
pub struct Resolver {
    /// local address the resolver's UDP socket binds to.
    #[serde(default = "Resolver::bind")]
    pub bind: SocketAddr,

    /// configured nameservers; a DNS reply from any other source address is
    /// dropped.
    #[serde(default = "Resolver::nameservers")]
    pub nameservers: Vec<SocketAddr>,
}

impl Resolver {
    fn bind() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    fn nameservers() -> Vec<SocketAddr> {
        vec!["127.0.0.1:53".parse().unwrap()]
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            bind: Self::bind(),
            nameservers: Self::nameservers(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Auth {
    /// issue the RFC 1413 ident probe against freshly accepted connections.
    #[serde(default = "Auth::ident_enabled")]
    pub ident_enabled: bool,

    /// longest username the ident probe (or iauth) may hand back.
    #[serde(default = "Auth::ident_max_username_len")]
    pub ident_max_username_len: usize,

    /// path to the external iauth helper executable. unset disables the
    /// helper entirely; the built-in ident probe still runs if enabled.
    #[serde(default)]
    pub iauth_path: Option<String>,

    /// append-only audit log of registered-client departures.
    #[serde(default = "Auth::user_log")]
    pub user_log: PathBuf,

    /// append-only audit log of rejected/unregistered-connection closes.
    #[serde(default = "Auth::conn_log")]
    pub conn_log: PathBuf,

    /// static operator name -> password-hash table.
    ///
    /// the actual password check is a dispatcher concern; this is only the
    /// configuration slot it reads from.
    #[serde(default)]
    pub operators: HashMap<String, String>,
}

impl Auth {
    fn ident_enabled() -> bool {
        true
    }

    fn ident_max_username_len() -> usize {
        10
    }

    fn user_log() -> PathBuf {
        PathBuf::from("./var/userlog")
    }

    fn conn_log() -> PathBuf {
        PathBuf::from("./var/connlog")
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            ident_enabled: Self::ident_enabled(),
            ident_max_username_len: Self::ident_max_username_len(),
            iauth_path: None,
            user_log: Self::user_log(),
            conn_log: Self::conn_log(),
            operators: HashMap::new(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Controller {
    /// controller bind
    ///
    /// this option specifies the http server binding address used to
    /// expose read-only diagnostics (cache dump, counters) about this
    /// node.
    ///
    /// Warn: this http server does not contain any means of
    /// authentication, and should not be exposed to an unsafe environment.
    #[serde(default = "Controller::listen")]
    pub listen: SocketAddr,

    /// Set the value of the Access-Control-Allow-Origin header.
    #[serde(default = "Controller::allow_origin")]
    pub allow_origin: String,
}

impl Controller {
    fn listen() -> SocketAddr {
        "127.0.0.1:3000".parse().unwrap()
    }

    fn allow_origin() -> String {
        "*".to_string()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            allow_origin: Self::allow_origin(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

fn default_sendq_classes() -> Vec<SendClassConfig> {
    vec![
        SendClassConfig { name: "clients".into(), cap: 1_048_576, burst: false },
        SendClassConfig { name: "servers".into(), cap: 20_971_520, burst: true },
    ]
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub listen: Listen,
    #[serde(default = "default_sendq_classes")]
    pub sendq: Vec<SendClassConfig>,
    #[serde(default)]
    pub resolver: Resolver,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub controller: Controller,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            sendq: default_sendq_classes(),
            resolver: Resolver::default(),
            auth: Auth::default(),
            controller: Controller::default(),
            log: Log::default(),
        }
    }
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// specify the configuration file path.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Load command line parameters. If a configuration file path is
    /// given, the configuration is read from it; a missing `--config`
    /// falls back to an empty document, so every field's `#[serde(default)]`
    /// applies and this never panics for that reason.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = Cli::parse()
            .config
            .map(|path| read_to_string(path).ok())
            .flatten()
            .unwrap_or_default();
        Ok(toml::from_str(&cfg_str)?)
    }
}
