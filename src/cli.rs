use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pollserv", about = "Poll voting API service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "POLL_PORT", default_value = "8080")]
        port: u16,
    },
    /// Manage principals (voters)
    Principal {
        #[command(subcommand)]
        command: PrincipalCommands,
    },
    /// Manage questions and options
    Question {
        #[command(subcommand)]
        command: QuestionCommands,
    },
    /// Issue or revoke bearer tokens out of band
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum PrincipalCommands {
    /// Create a principal
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// List principals
    List,
    /// Disable a principal (existing tokens stop working at the vote gate)
    Disable {
        #[arg(long)]
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum QuestionCommands {
    /// Create a question
    Add {
        #[arg(long)]
        title: String,
        /// Hide per-option results from the public results endpoint
        #[arg(long, default_value_t = false)]
        hide_results: bool,
    },
    /// Add an option to a question
    AddOption {
        #[arg(long)]
        question_id: i64,
        #[arg(long)]
        title: String,
        #[arg(long, default_value_t = 0)]
        weight: i32,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a principal
    Issue {
        #[arg(long)]
        principal_id: i64,
        /// TTL in seconds (defaults to POLL_TOKEN_TTL)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Revoke a token
    Revoke {
        #[arg(long)]
        token: String,
    },
}
