// Command-line interface for the daemon
// Uses clap for parsing arguments

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ffautod",
    about = "ffauto - profile-driven ffmpeg transcoding daemon",
    version,
    author
)]
pub struct Args {
    /// Input directory to scan and watch
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Output directory for transcoded files
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Path to the profile file
    #[arg(short, long, value_name = "FILE")]
    pub profile: PathBuf,

    /// Keep watching for new files after the initial scan
    #[arg(short, long)]
    pub watch: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "debug")]
    pub debug: bool,
}
