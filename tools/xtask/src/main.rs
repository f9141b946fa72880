mod bundle;
mod plist;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask", about = "VoiceMorph build and packaging tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Assemble dist/VoiceMorph.app from a release build
    Bundle(bundle::BundleArgs),
    /// Remove previous build output
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Bundle(args) => bundle::run(&args),
        Cmd::Clean => bundle::clean_dist(),
    }
}
