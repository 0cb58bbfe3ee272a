use std::time::Duration;

use clap::Parser;
use taxobot_sdk::client::ConnectConfig;

/// IRC bot answering NickServ TAXONOMY lookups over HTTP as Turtle.
#[derive(Parser, Debug, Clone)]
#[command(name = "taxobot", version, about)]
pub struct BotConfig {
    /// IRC server host name.
    pub server: String,

    /// IRC server port.
    pub port: u16,

    /// Nickname to register with.
    pub nick: String,

    /// Username (ident).
    pub user: String,

    /// Real name.
    pub name: String,

    /// Port the HTTP relay listens on.
    pub local_port: u16,

    /// File the protocol transcript is appended to.
    pub logfile: String,

    /// Channels to join after registering. Repeatable or comma-separated.
    #[arg(long = "channel", value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Address the HTTP relay binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_host: String,

    /// Network name used in rendered irc:// URIs.
    #[arg(long, default_value = "freenode")]
    pub network: String,

    /// Services nick answering TAXONOMY queries.
    #[arg(long, default_value = "NickServ")]
    pub service_nick: String,

    /// How long an HTTP lookup waits for NickServ before giving up.
    #[arg(long, default_value = "60")]
    pub query_timeout_secs: u64,

    /// How long the server has to welcome us after connecting.
    #[arg(long, default_value = "120")]
    pub registration_timeout_secs: u64,

    /// Pause between an answered keepalive PING and the next one.
    #[arg(long, default_value = "300")]
    pub ping_interval_secs: u64,

    /// How long to wait for the PONG to a keepalive PING.
    #[arg(long, default_value = "300")]
    pub pong_timeout_secs: u64,

    /// Retry delay after losing a registered connection. Doubles per failed attempt.
    #[arg(long, default_value = "5")]
    pub initial_backoff_secs: u64,

    /// Upper bound for the retry delay. Unbounded if not set.
    #[arg(long)]
    pub max_backoff_secs: Option<u64>,

    /// Drop a connection after this many nickname collisions during
    /// registration. Unbounded if not set.
    #[arg(long)]
    pub max_nick_retries: Option<u32>,
}

impl BotConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.local_port)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.server_addr(),
            nick: self.nick.clone(),
            user: self.user.clone(),
            realname: self.name.clone(),
            channels: self
                .channels
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            service_nick: self.service_nick.clone(),
            registration_timeout: Duration::from_secs(self.registration_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
            max_backoff: self.max_backoff_secs.map(Duration::from_secs),
            max_nick_retries: self.max_nick_retries,
        }
    }
}
