//! CLI argument parsing for tardis

use std::path::PathBuf;

use clap::Parser;

use crate::config::{parse_factor, DEFAULT_PRELOAD};

#[derive(Parser, Debug)]
#[command(name = "tardis")]
#[command(version)]
#[command(about = "Run a program with accelerated or decelerated time", long_about = None)]
pub struct Cli {
    /// Print every syscall stop and rewrite to stderr
    #[arg(short, long)]
    pub debug: bool,

    /// Shim preloaded into the target to force time reads through real syscalls
    #[arg(
        long = "preload",
        value_name = "PATH",
        env = "TARDIS_PRELOAD",
        default_value = DEFAULT_PRELOAD
    )]
    pub preload: PathBuf,

    /// Launch the target without touching LD_PRELOAD
    #[arg(long = "no-preload")]
    pub no_preload: bool,

    /// Requested sleeps and timeouts are divided by this factor
    #[arg(value_name = "DELAY_FACTOR", value_parser = parse_factor, allow_negative_numbers = true)]
    pub delay_factor: f64,

    /// Elapsed time on clock readings is multiplied by this factor
    #[arg(value_name = "TIME_FACTOR", value_parser = parse_factor, allow_negative_numbers = true)]
    pub time_factor: f64,

    /// Command to run, with its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// The shim to inject, unless disabled
    pub fn preload(&self) -> Option<PathBuf> {
        if self.no_preload {
            None
        } else {
            Some(self.preload.clone())
        }
    }
}
