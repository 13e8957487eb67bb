use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rxcache")]
#[command(author = "Rxcache Team")]
#[command(version)]
#[command(about = "Semantic answer cache and usage quotas for compounding-pharmacy AI queries", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use an in-memory store (nothing persists)
    #[arg(long, global = true)]
    pub in_memory: bool,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Read settings from this file instead of the platform config dir
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question: quota check, cache lookup, provider call on miss
    Ask {
        /// The question
        #[arg(required = true)]
        query: String,

        /// Therapeutic category (e.g. dor, imuno, dermato)
        #[arg(short = 'k', long, default_value = "geral")]
        category: String,

        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Look up a cached answer without calling the provider
    Lookup {
        #[arg(required = true)]
        query: String,

        #[arg(short = 'k', long, default_value = "geral")]
        category: String,

        /// Show the ranked fuzzy candidates instead of the best match
        #[arg(long)]
        candidates: bool,
    },

    /// Store an answer for a query
    Save {
        #[arg(required = true)]
        query: String,

        /// Answer text
        #[arg(required = true)]
        response: String,

        #[arg(short = 'k', long, default_value = "geral")]
        category: String,

        /// Provider/model that produced the answer
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Remove expired and long-unused entries
    Cleanup,

    /// Show cache statistics
    Stats,

    /// Delete every cache entry
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Quota commands
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },

    /// Print the normalized form and hash of a query
    Normalize {
        #[arg(required = true)]
        query: String,

        #[arg(short = 'k', long, default_value = "geral")]
        category: String,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
pub enum QuotaCommands {
    /// Show tier, usage and remaining queries
    Status {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Consume one query
    Consume {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Change a user's tier (free, pro, premium, enterprise)
    Upgrade {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(required = true)]
        tier: String,
    },
}
