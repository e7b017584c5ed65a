use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rkforensics", version, about = "Pod checkpoint controller")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch PodCheckpoint and Job objects and reconcile them until interrupted
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a single reconcile pass for one PodCheckpoint and print its status
    Reconcile {
        #[arg(short, long)]
        config: PathBuf,
        /// `<namespace>/<name>` of the PodCheckpoint
        key: String,
    },
    /// Delete a PodCheckpoint and the capture job it owns
    Delete {
        #[arg(short, long)]
        config: PathBuf,
        /// `<namespace>/<name>` of the PodCheckpoint
        key: String,
    },
}
