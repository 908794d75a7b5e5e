use clap::Parser;
use kitsune_gltfview::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    kitsune_gltfview::run(cli)
}
