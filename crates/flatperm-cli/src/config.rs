//! Command-line arguments and the validated run configuration.
//!
//! Every option can also come from the environment:
//!
//! | Flag                    | Variable                       | Default |
//! |-------------------------|--------------------------------|---------|
//! | `--filename`            | `FLATPERM_FILE`                | none    |
//! | `--resume`              | `FLATPERM_RESUME`              | off     |
//! | `--tours`, `-S`         | `FLATPERM_TOURS`               | none    |
//! | `--seed`                | `FLATPERM_SEED`                | `1`     |
//! | `--length`, `-N`        | `FLATPERM_LENGTH`              | none    |
//! | `--mu`                  | `FLATPERM_MU`                  | `1`     |
//! | `--checkpoint-interval` | `FLATPERM_CHECKPOINT_INTERVAL` | `3600`  |
//! | `--log-level`           | `FLATPERM_LOG`                 | `info`  |

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use flatperm_core::FlatpermError;

#[derive(Debug, Parser)]
#[command(name = "flatperm", version)]
#[command(about = "flatPERM sampling of self-avoiding walks on the triangular lattice")]
pub struct Cli {
    /// Data file: created on a fresh start, read and updated with --resume
    #[arg(long, env = "FLATPERM_FILE")]
    pub filename: PathBuf,

    /// Continue the simulation stored in --filename
    #[arg(long, env = "FLATPERM_RESUME")]
    pub resume: bool,

    /// Number of tours to add
    #[arg(short = 'S', long, env = "FLATPERM_TOURS")]
    pub tours: u64,

    /// Random generator seed
    #[arg(long, env = "FLATPERM_SEED", default_value_t = 1)]
    pub seed: u64,

    /// Maximum walk length (ignored when resuming)
    #[arg(short = 'N', long, env = "FLATPERM_LENGTH")]
    pub length: Option<usize>,

    /// Weight renormalisation (ignored when resuming)
    #[arg(long, env = "FLATPERM_MU", default_value_t = 1.0)]
    pub mu: f64,

    /// Seconds between periodic checkpoints (0 = only on SIGHUP and at exit)
    #[arg(long, env = "FLATPERM_CHECKPOINT_INTERVAL", default_value_t = 3600)]
    pub checkpoint_interval: u64,

    /// Tracing filter, e.g. `debug` or `flatperm_core=trace,info`
    #[arg(long, env = "FLATPERM_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartMode {
    Fresh { length: usize, mu: f64 },
    Resume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub filename: PathBuf,
    pub mode: StartMode,
    pub tours: u64,
    pub seed: u64,
    pub checkpoint_interval: Option<Duration>,
}

impl Cli {
    /// Check the start parameters before anything touches the data file.
    pub fn into_config(self) -> Result<RunConfig, FlatpermError> {
        let mode = if self.resume {
            StartMode::Resume
        } else {
            let length = self.length.ok_or_else(|| {
                FlatpermError::Configuration("--length is required unless --resume is given".into())
            })?;
            if length == 0 {
                return Err(FlatpermError::Configuration("--length must be at least 1".into()));
            }
            if !(self.mu.is_finite() && self.mu > 0.0) {
                return Err(FlatpermError::Configuration(format!(
                    "--mu must be finite and positive, got {}",
                    self.mu
                )));
            }
            StartMode::Fresh { length, mu: self.mu }
        };

        Ok(RunConfig {
            filename: self.filename,
            mode,
            tours: self.tours,
            seed: self.seed,
            checkpoint_interval: (self.checkpoint_interval > 0)
                .then(|| Duration::from_secs(self.checkpoint_interval)),
        })
    }
}
