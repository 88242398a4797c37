//! Command-line interface of batchline, built on clap.
//!
//! Every batch command goes through the front desk as if it had arrived
//! from the conversation named by `--as`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use batchline::model::BatchId;

/// batchline: stage progression for production batches.
#[derive(Debug, Parser)]
#[command(name = "batchline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to `batchline.toml` if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Conversation to act as; must be linked to an active worker.
    #[arg(long = "as", global = true, default_value = "console")]
    pub conversation: String,

    /// Enables debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Loads actors, stage catalogs and batches from a TOML fixture.
    Seed {
        file: PathBuf,
    },

    /// Shows a batch, fixing it to you if it is free.
    Status {
        /// Batch identifier as printed in the QR code.
        identifier: String,
    },

    /// Completes the current stage of a batch.
    Done {
        batch: BatchId,
    },

    /// Releases your fixation of a batch.
    Cancel {
        batch: BatchId,
    },

    /// Sends free text, as if typed into the conversation.
    Send {
        text: String,
    },

    /// Prints the state and completion history of a batch.
    History {
        batch: BatchId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const BATCH: &str = "0194fafe-3911-7cdf-b1ae-245469b6b1c8";

    #[test]
    fn cli_parses_done_subcommand() {
        let cli = Cli::parse_from(["batchline", "done", BATCH]);
        match cli.command {
            Command::Done { batch } => assert_eq!(batch.to_string(), BATCH),
            _ => panic!("expected Done command"),
        }
        assert_eq!(cli.conversation, "console");
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "batchline",
            "--config",
            "shop.toml",
            "--as",
            "chat-anna",
            "--verbose",
            "status",
            "hello",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("shop.toml")));
        assert_eq!(cli.conversation, "chat-anna");
        assert!(matches!(cli.command, Command::Status { identifier } if identifier == "hello"));
    }

    #[test]
    fn cli_rejects_malformed_batch_id() {
        assert!(Cli::try_parse_from(["batchline", "cancel", "not-a-uuid"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
