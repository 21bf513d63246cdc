/// StreetRace DSL compiler
///
/// Checks and compiles `.sr` sources. Set `RUST_LOG=streetrace_dsl=debug` to
/// trace the pipeline stages.

use streetrace_dsl::cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = cli::run_cli() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
