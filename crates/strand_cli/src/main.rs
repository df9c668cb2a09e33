use std::path::PathBuf;

use anyhow::{anyhow, Context as _};
use boa_engine::Source;
use clap::Parser;
use strand_core::{Runtime, RuntimeOptions};

/// An embeddable JavaScript runtime with Web-standard APIs.
#[derive(Parser)]
#[command(name = "strand", version, about)]
struct Cli {
    /// Script file to run
    script: Option<PathBuf>,

    /// Evaluate the given source instead of a file
    #[arg(short, long)]
    eval: Option<String>,

    /// Print the final value of the evaluation
    #[arg(short, long)]
    print: bool,

    /// Working directory to enter before the script runs
    #[arg(long)]
    cwd: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let mut runtime = Runtime::new(RuntimeOptions {
        working_dir: cli.cwd,
        ..Default::default()
    })
    .map_err(|err| anyhow!("failed to create runtime: {err}"))?;
    runtime.register_api(strand_api::WebApi);

    let result = match (&cli.eval, &cli.script) {
        (Some(source), _) => runtime.eval(Source::from_bytes(source)),
        (None, Some(path)) => {
            let source = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            runtime.eval(Source::from_bytes(&source))
        }
        (None, None) => return Err(anyhow!("nothing to run: pass a script or --eval")),
    };

    // Settle the top-level value, then drain timers, streams and I/O.
    let value = result
        .and_then(|value| runtime.block_on_value(&value))
        .map_err(|err| anyhow!("script failed: {err}"))?;
    runtime.run_to_completion();

    if cli.print {
        println!("{}", value.display());
    }

    Ok(())
}
