use clap::{Parser, Subcommand};

use crate::screen::DEFAULT_JPEG_QUALITY;

#[derive(Parser)]
#[command(name = "farview")]
#[command(about = "🖥️  Encrypted remote desktop control", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controlled-side server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:5000")]
        addr: String,

        /// Shared password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// JPEG quality for streamed frames (1-100)
        #[arg(short, long, default_value_t = DEFAULT_JPEG_QUALITY)]
        quality: u8,
    },

    /// Fetch a single screen frame
    Shot {
        /// Server address (host:port)
        #[arg(short, long)]
        to: String,

        /// Shared password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Where to write the JPEG
        #[arg(short, long, default_value = "shot.jpg")]
        output: String,
    },

    /// Fetch frames continuously at a fixed interval
    Watch {
        /// Server address (host:port)
        #[arg(short, long)]
        to: String,

        /// Shared password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Directory for numbered frames
        #[arg(short, long, default_value = ".")]
        dir: String,

        /// Delay between requests in milliseconds
        #[arg(short, long, default_value_t = 500)]
        interval_ms: u64,

        /// Stop after this many frames (0 = until interrupted)
        #[arg(short, long, default_value_t = 0)]
        count: u64,
    },

    /// Upload a local file to the server
    Push {
        /// Server address (host:port)
        #[arg(short, long)]
        to: String,

        /// Shared password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Local source path
        local: String,

        /// Remote destination path
        remote: String,
    },

    /// Download a file from the server
    Pull {
        /// Server address (host:port)
        #[arg(short, long)]
        to: String,

        /// Shared password (prompted if omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Remote source path
        remote: String,

        /// Local destination path
        local: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
