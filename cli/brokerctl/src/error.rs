//! Error handling and display for the CLI.

use brokerd_lock::LockError;
use colored::Colorize;
use thiserror::Error;

/// Exit code when the lock was not acquired in time.
pub const EXIT_QUEUE_TIMEOUT: i32 = 3;

/// Exit code when the locked command outlived its ttl.
pub const EXIT_JOB_TIMEOUT: i32 = 4;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error {code}: {message}")]
    Api {
        status: u16,
        code: i32,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let lock_err = err.downcast_ref::<LockError>().or_else(|| {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Lock(e)) => Some(e),
            _ => None,
        }
    });
    match lock_err {
        Some(LockError::QueueTimeout { .. }) => EXIT_QUEUE_TIMEOUT,
        Some(LockError::JobTimeout { .. }) => EXIT_JOB_TIMEOUT,
        _ => 1,
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check that the provisioner API is reachable (--api-url).".yellow()
                );
            }
            CliError::Lock(LockError::Store(_)) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the etcd endpoints (--etcd-endpoints).".yellow()
                );
            }
            CliError::Api { status, .. } if *status >= 500 => {
                eprintln!("\n{}", "Hint: See the provisioner logs for details.".yellow());
            }
            _ => {}
        }
    }
}
