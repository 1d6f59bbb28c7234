use clap::{Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf};
use url::Url;

#[derive(Debug, Parser)]
#[clap(name = "ocmt-relay")]
#[clap(about = "OCMT zero-knowledge message relay", long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the relay and serve containers
    Serve {
        /// The IP address of the interface that the relay should bind to
        #[clap(short, long, value_parser, default_value = "0.0.0.0")]
        interface: IpAddr,

        /// The port that the relay should listen on
        #[clap(short, long, value_parser, env = "PORT", default_value = "5000")]
        port: u16,

        /// Directory for the persistent store; omit to run entirely
        /// in-memory (development only)
        #[clap(short, long, value_parser, env = "RELAY_STORAGE_PATH")]
        storage_path: Option<PathBuf>,

        /// Base URL of the agent server's container status/wake API
        #[clap(long, value_parser, env = "AGENT_SERVER_URL")]
        agent_server_url: Option<Url>,

        /// Auth token presented to the agent server
        #[clap(long, value_parser, env = "AGENT_SERVER_TOKEN", hide_env_values = true)]
        agent_server_token: Option<String>,

        /// Endpoint of the shared mesh audit sink
        #[clap(long, value_parser, env = "MESH_AUDIT_URL")]
        mesh_audit_url: Option<Url>,

        /// Comma-separated list of origins allowed by CORS; no wildcard
        #[clap(long, value_parser, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
        allowed_origins: Vec<String>,

        /// Hot-path cap on messages per container per minute
        #[clap(long, value_parser, env = "RATE_LIMIT_MESSAGES_PER_MINUTE", default_value = "100")]
        messages_per_minute: u64,

        /// DB-backed cap on messages per container per window
        #[clap(long, value_parser, env = "RATE_LIMIT_MESSAGES_PER_HOUR", default_value = "100")]
        messages_per_hour: u64,

        /// Length of the DB-backed rate window in milliseconds
        #[clap(long, value_parser, env = "RATE_LIMIT_WINDOW_MS", default_value = "3600000")]
        rate_limit_window_ms: u64,

        /// General API cap per client address per hour
        #[clap(long, value_parser, env = "RATE_LIMIT_REQUESTS_PER_HOUR", default_value = "1000")]
        requests_per_hour: u64,

        /// Timeout for one callback delivery attempt in milliseconds
        #[clap(long, value_parser, env = "FORWARD_TIMEOUT_MS", default_value = "10000")]
        forward_timeout_ms: u64,

        /// Additional callback attempts after the first
        #[clap(long, value_parser, env = "FORWARD_MAX_RETRIES", default_value = "2")]
        forward_max_retries: u32,

        /// Hours before an undelivered message expires
        #[clap(long, value_parser, env = "RELAY_MESSAGE_TTL_HOURS", default_value = "24")]
        message_ttl_hours: u64,
    },
}
