use crate::EventFormat;
use crate::reconcile::{DEFAULT_SAMPLE_SIZE, DEFAULT_TOLERANCE};
use crate::store::CountStrategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply change feeds to the target database
    Apply {
        /// Target PostgreSQL connection URI
        #[arg(short, long, env = "TGT_POSTGRES_CONN_STR")]
        target: String,

        /// Mapping file (TOML); the built-in AdventureWorks mapping when omitted
        #[arg(short, long, env = "MAPPING_FILE")]
        mappings: Option<PathBuf>,

        /// Newline-delimited change feed; repeat for independent key-spaces
        #[arg(short, long)]
        feed: Vec<PathBuf>,

        /// Record format of the feed files
        #[arg(long, value_enum, default_value_t = EventFormat::Debezium)]
        format: EventFormat,

        /// Keep waiting for new lines at the end of each feed
        #[arg(long, default_value = "false")]
        follow: bool,

        /// Logical replication slot (wal2json) on the source to consume
        #[arg(long, requires = "source")]
        slot: Option<String>,

        /// Source PostgreSQL connection URI, needed with --slot
        #[arg(short, long, env = "SRC_POSTGRES_CONN_STR")]
        source: Option<String>,

        /// Create the slot if it does not exist
        #[arg(long, default_value = "false", requires = "slot")]
        create_slot: bool,
    },
    /// Reconcile source and target and report whether they agree
    Validate {
        /// Source PostgreSQL connection URI
        #[arg(short, long, env = "SRC_POSTGRES_CONN_STR")]
        source: String,

        /// Target PostgreSQL connection URI
        #[arg(short, long, env = "TGT_POSTGRES_CONN_STR")]
        target: String,

        /// Mapping file (TOML); the built-in AdventureWorks mapping when omitted
        #[arg(short, long, env = "MAPPING_FILE")]
        mappings: Option<PathBuf>,

        /// Keys sampled per table
        #[arg(long, env = "VALIDATION_SAMPLE_SIZE", default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,

        /// Absolute tolerance for metric comparisons
        #[arg(long, env = "VALIDATION_TOLERANCE", default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,

        /// Seed for a reproducible sample draw
        #[arg(long, env = "VALIDATION_SEED")]
        seed: Option<u64>,

        /// How source rows are counted
        #[arg(long, value_enum, default_value_t = CountStrategy::Exact)]
        source_count: CountStrategy,

        /// How target rows are counted
        #[arg(long, value_enum, default_value_t = CountStrategy::Exact)]
        target_count: CountStrategy,

        /// Only check this table (source or target name); repeatable
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Write the JSON report here
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

pub fn get_args() -> Result<Args, clap::Error> {
    Args::try_parse()
}
