use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = abrprintctl::Cli::parse();
    if let Err(err) = abrprintctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
