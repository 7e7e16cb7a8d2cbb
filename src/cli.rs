//! CLI argument parsing for the collaborators-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "collaborators-worker", about = "Collaborators backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Create an account, or reset the password of an existing one
    CreateUser {
        /// Account email address
        #[arg(long)]
        email: String,
        /// Display name
        #[arg(long)]
        name: String,
    },
}
