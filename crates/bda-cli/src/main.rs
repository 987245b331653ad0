use bda_cli::cli::{Cli, Commands};
use bda_cli::{analyze, doctor};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            init_logging(args.verbose);

            let summary = analyze::run(&args)?;

            println!();
            println!("  Exported: {}", summary.exported.len());
            if !summary.skipped.is_empty() {
                println!("  Skipped:  {}", summary.skipped.len());
                for path in &summary.skipped {
                    println!("    {}", path.display());
                }
            }
            println!("  Output:   {}", args.output.display());
        }

        Commands::Doctor { verbose } => {
            init_logging(verbose);
            doctor::run();
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "bda_cli=debug,bda_pipeline=debug,bda_vlm_candle=debug"
    } else {
        "bda_cli=info,bda_pipeline=info,bda_vlm_candle=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
