use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "class-cache")]
#[command(about = "Resolve class files and resources from jars, directories and a database through an in-memory cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Archive to register; may be repeated.
    #[arg(long = "jar", value_name = "PATH", global = true)]
    pub jars: Vec<PathBuf>,

    /// Directory scanned recursively for archives; may be repeated.
    #[arg(long = "dir", value_name = "PATH", global = true)]
    pub dirs: Vec<PathBuf>,

    /// Delimiter-joined list of directories.
    #[arg(long = "dirs", value_name = "LIST", global = true)]
    pub dir_list: Option<String>,

    #[arg(long, value_name = "D", global = true)]
    pub delimiter: Option<String>,

    /// Index archives at registration instead of scanning on demand.
    #[arg(long, global = true)]
    pub eager: bool,

    #[arg(long, value_name = "N", allow_negative_numbers = true, global = true)]
    pub hard_size: Option<i64>,

    #[arg(long, value_name = "N", global = true)]
    pub soft_capacity: Option<usize>,

    #[arg(long, value_name = "FILE", global = true)]
    pub db_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Resolve {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    Index,
    Stats,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
    Raw,
}
