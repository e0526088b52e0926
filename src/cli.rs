use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "mutability-scan")]
#[command(about = "Analyze compiled Java classes and report whether their instances are immutable")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON file with result overrides and allow-listed immutable types.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Analyze classes found on the given classpath roots.
    Analyze {
        /// Classpath roots: directories of .class files, or JARs.
        #[arg(value_name = "CLASSPATH", required = true)]
        classpath: Vec<PathBuf>,

        /// Analyze only the named classes instead of the whole classpath.
        #[arg(short = 'c', long = "class", value_name = "NAME")]
        classes: Vec<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
