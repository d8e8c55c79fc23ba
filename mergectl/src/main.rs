use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = mergectl::Cli::parse();
    if let Err(err) = mergectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
