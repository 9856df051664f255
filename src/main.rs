//! CLI driver: reads a source file, runs the compiler, writes the
//! resulting PE image. No flags beyond `--input`/`--output` — there is
//! nothing here for an optimization level, a target triple, or an
//! external linker to configure.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

#[derive(Parser)]
#[command(name = "flatc")]
#[command(about = "Compiles a source file to a freestanding Windows x64 PE executable")]
struct Cli {
    /// Path to the source file to compile.
    #[arg(long)]
    input: PathBuf,

    /// Path the resulting PE executable is written to.
    #[arg(long)]
    output: PathBuf,
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read input file '{}'", cli.input.display()))?;

    log::info!("compiling {}", cli.input.display());
    let image = flatc::compile(&source)?;

    fs::write(&cli.output, &image)
        .with_context(|| format!("failed to write output file '{}'", cli.output.display()))?;
    log::info!("wrote {} ({} bytes)", cli.output.display(), image.len());

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
