//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Recognize human actions from pose keypoints and reason about them
#[derive(Parser, Debug)]
#[command(name = "action-reasoner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (defaults to ./action-reasoner.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classifier from labelled keypoint directories
    Train {
        /// Root directory with one subdirectory per action label
        #[arg(short, long)]
        data: PathBuf,

        /// Where to write the model artifact
        #[arg(short, long, default_value = "models/action_mlp.json")]
        output: PathBuf,
    },

    /// Classify every clip under a keypoint directory
    Classify {
        /// Root directory of clips to classify
        #[arg(short, long)]
        data: PathBuf,

        /// Model artifact produced by `train`
        #[arg(short, long, default_value = "models/action_mlp.json")]
        model: PathBuf,

        /// Annotate each prediction with reasoning
        #[arg(long)]
        reason: bool,

        /// Use the offline reasoner instead of the HTTP endpoint
        #[arg(long)]
        offline: bool,

        /// Also reason over the predicted actions as one ordered episode
        #[arg(long)]
        temporal: bool,
    },

    /// Ask the reasoning agent about an action or a sequence of actions
    Reason {
        /// Single action label, e.g. open_door
        #[arg(long, conflicts_with = "sequence", required_unless_present = "sequence")]
        action: Option<String>,

        /// Comma separated labels, e.g. open_door,walk_stop,pick_book
        #[arg(long)]
        sequence: Option<String>,

        /// Use the offline reasoner instead of the HTTP endpoint
        #[arg(long)]
        offline: bool,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
