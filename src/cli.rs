use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tradegate")]
#[command(version)]
#[command(about = "Back-office gateway to the trading venue manager API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and the per-environment overrides
    #[arg(short, long, default_value = "config", env = "TRADEGATE_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the admin API, the commission webhook and periodic group sync
    Serve {
        /// Override api.port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one group directory sync and print the report
    SyncGroups,
    /// Store new venue manager credentials (password is prompted)
    Rotate {
        /// Venue server address, host:port
        #[arg(long)]
        address: String,
        /// Manager login
        #[arg(long)]
        login: u64,
        /// Display name (defaults to the address)
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the venue figures of one account
    Balance {
        /// Account login
        login: u64,
    },
    /// Hash a password in the stored settings format (password is prompted)
    HashSecret {
        /// PBKDF2 iterations (defaults to secrets.hash_iterations)
        #[arg(long)]
        iterations: Option<u32>,
    },
    /// Generate a base64 master key for the settings cipher
    GenKey,
}
