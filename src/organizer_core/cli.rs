use crate::organizer_core::organize::Criterion;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use simplelog::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Organize photo and video collections by date, camera and location")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable file logging to photo-organizer.log
    #[arg(long = "log", global = true)]
    pub log: bool,

    /// Log level for file logging (debug, info, warn, error)
    #[arg(long, default_value_t = LevelFilter::Debug, global = true)]
    pub log_level: LevelFilter,

    /// More terminal output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to the user configuration directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn terminal_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy or move media into folders built from date, camera and location
    Organize {
        /// Files or directories (searched recursively) to organize
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination root
        #[arg(long, required = true)]
        dest: PathBuf,

        /// Organize by capture date
        #[arg(long)]
        by_date: bool,

        /// Organize by camera make and model
        #[arg(long)]
        by_camera: bool,

        /// Organize by reverse-geocoded GPS position
        #[arg(long)]
        by_location: bool,

        /// Nest one folder level per criterion instead of using only the first
        #[arg(long)]
        multilayer: bool,

        /// Criterion order for multilayer mode, comma-separated (e.g. "camera,date")
        #[arg(long, value_enum, value_delimiter = ',')]
        order: Vec<Criterion>,

        /// Date folder layout (year/month/day, year/month, year, year_month,
        /// year_month_day, day_month_year, month_year)
        #[arg(long)]
        date_format: Option<String>,

        /// Move files instead of copying them
        #[arg(long)]
        r#move: bool,

        /// Show where files would go without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Append every copy or move to this JSON-lines journal
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Do not read or write the metadata cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Copy or move media into one folder per group of nearby GPS positions
    Group {
        /// Files or directories (searched recursively) to group
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination root
        #[arg(long, required = true)]
        dest: PathBuf,

        /// Maximum distance from a group's first file, in kilometres
        #[arg(long)]
        max_distance_km: Option<f64>,

        /// Move files instead of copying them
        #[arg(long)]
        r#move: bool,

        /// Show where files would go without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Append every copy or move to this JSON-lines journal
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Do not read or write the metadata cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Report dates, cameras and GPS coverage of a collection
    Analyze {
        /// Files or directories (searched recursively) to analyze
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Do not read or write the metadata cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Show the extracted metadata and resolved attributes of one file
    Inspect {
        #[arg(required = true)]
        file: PathBuf,

        /// Do not read or write the metadata cache
        #[arg(long)]
        no_cache: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Read or change preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Maintain the metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print a value, e.g. `geocoding.enabled` or `api_keys.positionstack`
    Get { key: String },
    /// Change a value and save the file
    Set { key: String, value: String },
    /// Print the configuration file location
    Path,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Entry count and location
    Stats,
    /// Remove entries older than the configured lifetime
    Purge,
    /// Remove every entry
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}
