use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dat",
    about = "dat: versioned document store with streaming ingestion",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Data directory holding the journal and blobs
    #[arg(long, global = true, default_value = ".dat")]
    pub data: PathBuf,

    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import CSV, JSON lines or binary rows
    Import(ImportArgs),
    /// Show the latest (or a given) version of a document
    Get(GetArgs),
    /// Print every document in insertion/update order
    Cat(CatArgs),
    /// Show every version of a document
    History(HistoryArgs),
    /// Count live documents
    Count,
    /// Write, read or probe attachment blobs
    Blob(BlobArgs),
}

#[derive(Args)]
pub struct ImportArgs {
    /// Input file, or `-` for stdin
    #[arg(default_value = "-")]
    pub file: String,
    /// Parse input as CSV
    #[arg(long, conflicts_with_all = ["tsv", "binary"])]
    pub csv: bool,
    /// Parse input as tab-separated values
    #[arg(long, conflicts_with = "binary")]
    pub tsv: bool,
    /// Parse input as binary rows (schema comes from --config)
    #[arg(long)]
    pub binary: bool,
    /// Primary key field(s), comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub primary: Vec<String>,
    /// Digest composite keys
    #[arg(long)]
    pub hash: bool,
    /// CSV delimiter and composite key separator
    #[arg(short, long)]
    pub separator: Option<String>,
    /// The first CSV record is data, not a header
    #[arg(long, requires = "columns")]
    pub no_header: bool,
    /// Column names, comma separated
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Ingestion options as TOML
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Base directory for relative attachment paths
    #[arg(long)]
    pub attachment_root: Option<PathBuf>,
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    #[arg(long)]
    pub version: Option<u64>,
}

#[derive(Args)]
pub struct CatArgs {
    /// Print bare field values without key and version
    #[arg(long)]
    pub values: bool,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub key: String,
}

#[derive(Args)]
pub struct BlobArgs {
    #[command(subcommand)]
    pub action: BlobAction,
}

#[derive(Subcommand)]
pub enum BlobAction {
    /// Store a file as an attachment of a document
    Put {
        name: String,
        file: PathBuf,
        /// Owning document (created when absent)
        #[arg(long)]
        key: Option<String>,
        /// Current version of the owning document
        #[arg(long)]
        version: Option<u64>,
    },
    /// Write an attachment's bytes to stdout or a file
    Get {
        key: String,
        name: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check whether a blob hash is stored
    Exists { hash: String },
}
