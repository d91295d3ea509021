use clap::Parser;

#[tokio::main]
async fn main() {
    marcajectl::init_tracing();
    let cli = marcajectl::Cli::parse();
    if let Err(err) = marcajectl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
