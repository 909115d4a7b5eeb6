//! CLI argument definitions.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use intentflow_core::EventType;

/// intentflow -- event-driven intent automation.
#[derive(Parser)]
#[command(
    name = "intentflow",
    version,
    about = "intentflow -- turn incoming events into approved, executed workflows",
    long_about = "Monitors email, voicemail, calendar and other feeds, classifies each event \
                  into an intent with a language model, and runs the matching workflow \
                  behind an approval gate."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines instead of compact text.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every configured monitor and process events until Ctrl-C.
    Run,

    /// Classify one piece of text and show what would run.
    Classify {
        /// User the event belongs to.
        #[arg(long, short)]
        user: String,

        /// Source type of the event.
        #[arg(long, short, default_value = "email", value_parser = parse_event_type)]
        source: EventType,

        /// Event content.
        text: String,
    },

    /// List persisted executions for a user, newest first.
    Executions {
        #[arg(long, short)]
        user: String,

        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Work with workflow definitions.
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// Load and validate a workflow file.
    Check {
        /// Defaults to the file named in the configuration.
        path: Option<PathBuf>,
    },
}

fn parse_event_type(s: &str) -> Result<EventType, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_classify() {
        let cli = Cli::try_parse_from([
            "intentflow",
            "classify",
            "--user",
            "u1",
            "--source",
            "voicemail",
            "call the pharmacy",
        ])
        .unwrap();
        match cli.command {
            Commands::Classify { user, source, text } => {
                assert_eq!(user, "u1");
                assert_eq!(source, EventType::Voicemail);
                assert_eq!(text, "call the pharmacy");
            }
            _ => panic!("expected classify"),
        }
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let args = ["intentflow", "workflows", "check", "--log-json", "-c", "x.toml"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Commands::Workflows {
                action: WorkflowAction::Check { path: None }
            }
        ));
    }

    #[test]
    fn rejects_unknown_source() {
        let args = ["intentflow", "classify", "-u", "u1", "-s", "fax", "hi"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
