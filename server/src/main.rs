use clap::Parser;
use server::network::Server;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "50")]
    tick_rate: u32,
    /// Maximum simultaneous players
    #[clap(short, long, default_value = "8")]
    max_players: usize,
    /// Fixed RNG seed for reproducible piece and garbage sequences
    #[clap(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_millis(1000 / args.tick_rate.max(1) as u64);

    let mut server = Server::new(&addr, tick_duration, args.max_players, args.seed).await?;
    server.run().await
}
