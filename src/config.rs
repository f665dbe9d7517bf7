//! Runtime configuration
//!
//! The only tunable is the size of each task's stack. It is taken from
//! `RALPH_COOP_STACK_SIZE` when set, otherwise 16 KiB.

use lazy_static::lazy_static;
use tracing::warn;

use crate::error::Error;

/// Stack size per task (16KB)
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Smallest accepted task stack
pub const MIN_STACK_SIZE: usize = 4 * 1024;

/// Environment variable overriding the default stack size, in bytes
pub const STACK_SIZE_ENV: &str = "RALPH_COOP_STACK_SIZE";

lazy_static! {
    static ref ENV_CONFIG: Config = Config::from_env();
}

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes of stack allocated for every task
    pub stack_size: usize,
}

impl Default for Config {
    /// Environment-derived configuration, read once per process
    fn default() -> Self {
        *ENV_CONFIG
    }
}

impl Config {
    /// Configuration with the built-in defaults, ignoring the environment
    pub const fn builtin() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Read the configuration from the environment
    ///
    /// Invalid values are logged and replaced by the defaults.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(STACK_SIZE_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Self::builtin();
        };
        match raw.trim().parse::<usize>() {
            Ok(size) => {
                let config = Self::builtin().with_stack_size(size);
                match config.validate() {
                    Ok(()) => config,
                    Err(err) => {
                        warn!(%err, "{} ignored", STACK_SIZE_ENV);
                        Self::builtin()
                    }
                }
            }
            Err(err) => {
                warn!(value = raw, %err, "{} is not a byte count, ignored", STACK_SIZE_ENV);
                Self::builtin()
            }
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Check that a task can run with this configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall {
                requested: self.stack_size,
                minimum: MIN_STACK_SIZE,
            });
        }
        Ok(())
    }
}
