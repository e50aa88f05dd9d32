//! Command-line front end. A thin overlay on top of the library: it loads
//! [`config::DaConfig`](crate::config::DaConfig), wires up the simulator
//! adapter or the mock runner, and drives [`assimilation`](crate::assimilation)
//! or [`forecast`](crate::forecast). None of this module is required by the
//! core and the core does not depend back on it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the ensemble through sequential assimilation against an
    /// observation series, using the configured external simulator.
    RunAssimilation {
        /// Path to a TOML configuration file (see `DaConfig`).
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Observation file to assimilate against.
        #[arg(short, long)]
        observations: PathBuf,

        /// Assimilation window start, "yyyyMMdd HH-mm".
        #[arg(long)]
        start: String,

        /// Assimilation window end, "yyyyMMdd HH-mm".
        #[arg(long)]
        end: String,
    },

    /// Fan an assimilated ensemble out over lead times and report forecast
    /// distributions per variable/lead-time.
    RunForecast {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Archived timestamp to forecast from, "yyyyMMdd HH-mm".
        #[arg(long)]
        from: String,

        /// Directory to write per-lead-time forecast reports to.
        #[arg(short, long, default_value = "./data/forecast/")]
        output_dir: PathBuf,
    },

    /// Run the full assimilation + forecast pipeline against the in-memory
    /// mock model, for smoke-testing a build without an external simulator.
    MockDemo {
        #[arg(short, long, default_value_t = 20)]
        ensemble_size: usize,

        #[arg(short, long, default_value_t = 24)]
        steps: usize,
    },
}
