//! CLI entrypoint for the `vm-controller` binary.

use clap::Parser as _;

use vmgate_controller::{cli::Cli, inner_main};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    inner_main(Cli::parse()).await
}
