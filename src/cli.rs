use clap::{Parser, Subcommand};

/// tokengate: OAuth token lifecycle and proxy for multi-tenant CRM installations
#[derive(Parser)]
#[command(name = "tokengate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the background token sweeper
    Serve {
        /// Port to bind (defaults to TOKENGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List stored installations (no secrets)
    Installations,

    /// Force a token refresh for one installation
    Refresh {
        installation_id: String,
    },

    /// List the logical endpoints the proxy knows about
    Endpoints,

    /// Exchange an OAuth authorization code for a new installation
    ExchangeCode {
        code: String,
    },

    /// Print the claims of an access token without verifying it
    DecodeJwt {
        token: String,
    },
}
