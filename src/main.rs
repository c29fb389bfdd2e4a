use std::fs::File;
use std::io::{self, BufReader};

use anyhow::{Context, Result};
use clap::Parser;

use fiber_profiler::aggregate::Aggregator;
use fiber_profiler::cli::{Cli, OutputFormat};

fn main() -> Result<()> {
    let args = Cli::parse();
    let mut aggregator = Aggregator::new();

    if args.files.is_empty() {
        let stdin = io::stdin();
        aggregator.read(stdin.lock())?;
    } else {
        for path in &args.files {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            aggregator
                .read(BufReader::new(file))
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
    }

    let summary = aggregator.summary(args.top);
    match args.format {
        OutputFormat::Text => print!("{}", summary.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(())
}
