//! CLI argument definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use procstream::stream::DEFAULT_CAPACITY;

/// procstream - run a command and read its output as decoded text streams
#[derive(Parser, Debug)]
#[command(name = "procstream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Bytes requested per read from each pipe
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub buffer_size: usize,

    /// Command to run; reads stdin when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print stdout and stderr lines as they arrive
    Lines {
        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,

        /// Only print lines matching this regular expression
        #[arg(long)]
        grep: Option<String>,

        /// Discard the command's stderr
        #[arg(long)]
        stdout_only: bool,

        /// Kill the command after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Count scalars, characters or lines on stdout
    Count {
        /// Unit to count
        #[arg(long, value_enum, default_value_t = Unit::Lines)]
        unit: Unit,

        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Text units that can be counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Unit {
    /// Unicode scalar values
    Scalars,
    /// Extended grapheme clusters
    Characters,
    /// Lines
    Lines,
}
