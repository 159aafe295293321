use std::fmt::{Display, Formatter};

use clap::{Parser, ValueEnum};

/// Process bootstrap configuration (spec §6 "Environment configuration"),
/// ported from `netmet/run.py::load`'s `os.getenv` reads.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "NetMet network-quality measurement fleet")]
pub struct Args {
    /// Which role this process plays
    #[clap(value_enum, long, env = "APP")]
    pub app: Role,

    /// Port to bind the HTTP API on
    #[clap(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Address to bind the HTTP API on
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Netmet server this client registers with and reports metrics to
    #[clap(long, env = "NETMET_SERVER_URL")]
    pub netmet_server_url: Option<String>,

    /// This process's own externally-reachable base URL
    #[clap(long, env = "NETMET_OWN_URL")]
    pub netmet_own_url: Option<String>,

    /// Comma-separated list of Elasticsearch base URLs (server role only)
    #[clap(long, env = "ELASTIC", value_delimiter = ',')]
    pub elastic: Vec<String>,

    /// Comma-separated list of valid HMAC keys
    #[clap(long, env = "NETMET_HMACS", value_delimiter = ',')]
    pub netmet_hmacs: Vec<String>,

    /// Skip HMAC verification entirely; only for local/dev use
    #[clap(long, env = "NETMET_HMAC_SKIP", default_value_t = false)]
    pub netmet_hmac_skip: bool,

    /// Directory holding the client's restore marker
    #[clap(long, env = "NETMET_BASE_DIR", default_value = "/var/run/netmet")]
    pub base_dir: String,

    /// Comma-separated `user:pass` pairs gating every route but `/status`
    /// with HTTP Basic auth; empty disables the gate entirely
    #[clap(long, env = "NETMET_USERS", value_delimiter = ',')]
    pub netmet_users: Vec<String>,

    #[clap(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Output details about requests and responses; specify multiple times for more detail"
    )]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = self.to_possible_value().unwrap();
        f.write_str(value.get_name())
    }
}

impl Args {
    pub fn base_dir_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.base_dir)
    }

    pub fn own_url(&self) -> String {
        self.netmet_own_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    pub fn users(&self) -> std::collections::HashMap<String, String> {
        netmet_common::basic_auth::parse_users(&self.netmet_users)
    }
}
