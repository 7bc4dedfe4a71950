//! The stackmerge command line tool.

use clap::Parser as _;
use stackmerge_cli::CliArgs;

fn main() {
    if let Err(err) = CliArgs::parse().run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
