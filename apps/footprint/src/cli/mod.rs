//! # Footprint CLI Module
//!
//! This module implements the CLI interface for Footprint.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `create-chain` - Create a project chain at its first stage
//! - `add-member` - Add a member to an instance
//! - `complete` - Complete a user's part of the current stage
//! - `accrue` - Apply a session-stop event
//! - `estimate` - Estimate emissions for a user's device without recording
//! - `show` - Show an instance with roster and progress
//! - `chain` - List all instances of a chain
//! - `sweep` - Finalize instances whose contributors are all done
//! - `archive` - Archive an instance

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand, ValueEnum};
use footprint_core::{FootprintError, Role};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Footprint - project stage progression and carbon accounting.
#[derive(Parser, Debug)]
#[command(name = "footprint")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database
    #[arg(short = 'D', long, global = true, default_value = "footprint.redb")]
    pub database: PathBuf,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum, default_value_t = Backend::Redb)]
    pub backend: Backend,

    /// Configuration file (default: ./footprint.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// ACID database file
    Redb,
    /// Volatile, process-local tables
    Memory,
}

impl Backend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Redb => "redb",
            Self::Memory => "memory",
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Create a project chain; the creating user becomes owner
    CreateChain {
        /// Creating user
        #[arg(short, long)]
        user: u64,

        /// Organization name
        #[arg(short, long)]
        organization: String,

        /// Project name
        #[arg(short, long)]
        name: String,

        /// Project description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Initial member as USER:ROLE (repeatable)
        #[arg(short, long = "member", value_parser = parse_member_spec)]
        members: Vec<(u64, Role)>,
    },

    /// Add a member to an open instance
    AddMember {
        #[arg(short, long)]
        instance: u64,

        /// Inviting user (owner or leader)
        #[arg(long)]
        inviter: u64,

        /// User to add
        #[arg(short, long)]
        user: u64,

        /// Role of the new member
        #[arg(short, long, default_value = "member")]
        role: Role,
    },

    /// Complete a user's part of the instance's current stage
    Complete {
        #[arg(short, long)]
        instance: u64,

        #[arg(short, long)]
        user: u64,
    },

    /// Apply a session-stop event to an instance
    Accrue {
        #[arg(short, long)]
        instance: u64,

        #[arg(short, long)]
        user: u64,

        /// Elapsed session time in seconds
        #[arg(short, long)]
        seconds: u64,
    },

    /// Estimate emissions for a user's active device without recording
    Estimate {
        #[arg(short, long)]
        user: u64,

        /// Session length in seconds
        #[arg(short, long)]
        seconds: u64,
    },

    /// Show an instance with roster and progress
    Show {
        #[arg(short, long)]
        instance: u64,
    },

    /// List all instances of a chain
    Chain {
        #[arg(short, long)]
        chain: u64,
    },

    /// Finalize every instance whose contributors are all done
    Sweep,

    /// Archive an instance (owner only)
    Archive {
        #[arg(short, long)]
        instance: u64,

        /// Acting user
        #[arg(short, long)]
        user: u64,
    },
}

/// Parse `USER:ROLE`, e.g. `42:leader`.
fn parse_member_spec(raw: &str) -> Result<(u64, Role), String> {
    let (user, role) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected USER:ROLE, got '{}'", raw))?;
    let user = user
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid user id '{}': {}", user, e))?;
    let role = role.trim().parse::<Role>().map_err(|e| e.to_string())?;
    Ok((user, role))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), FootprintError> {
    let config = Config::load(cli.config.as_deref())?;
    let ctx = Context {
        database: cli.database,
        backend: cli.backend,
        json_mode: cli.json_mode,
    };

    match cli.command {
        Commands::Server { host, port } => cmd_server(&ctx, config, host, port).await,
        Commands::Init { force } => cmd_init(&ctx, force),
        Commands::CreateChain {
            user,
            organization,
            name,
            description,
            members,
        } => cmd_create_chain(&ctx, &config, user, organization, name, description, members),
        Commands::AddMember {
            instance,
            inviter,
            user,
            role,
        } => cmd_add_member(&ctx, &config, instance, inviter, user, role),
        Commands::Complete { instance, user } => cmd_complete(&ctx, &config, instance, user),
        Commands::Accrue {
            instance,
            user,
            seconds,
        } => cmd_accrue(&ctx, &config, instance, user, seconds),
        Commands::Estimate { user, seconds } => cmd_estimate(&ctx, &config, user, seconds),
        Commands::Show { instance } => cmd_show(&ctx, &config, instance),
        Commands::Chain { chain } => cmd_chain(&ctx, &config, chain),
        Commands::Sweep => cmd_sweep(&ctx, &config),
        Commands::Archive { instance, user } => cmd_archive(&ctx, &config, instance, user),
    }
}

// =============================================================================
// TESTS
// =============================================================================
