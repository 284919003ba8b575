use clap::Parser;
use log::{error, info};
use server::game::GameServer;
use server::network::{Server, DEFAULT_TICK_RATE};
use server::persistence::{open_store, PERSIST_FLUSH_INTERVAL};
use shared::{TileWorld, DEFAULT_PORT};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// World file; the built-in map is used when omitted
    #[arg(short, long)]
    world: Option<PathBuf>,

    /// Player store file
    #[arg(short, long, default_value = "players.bin")]
    store: PathBuf,

    /// Roster broadcasts per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let world = match &args.world {
        Some(path) => TileWorld::load(path)?,
        None => {
            info!("No world file given, using the built-in map");
            TileWorld::builtin()
        }
    };

    let (store, worker) = open_store(&args.store, PERSIST_FLUSH_INTERVAL)?;
    let game = GameServer::new(world, store);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let mut server = Server::bind(addr, game, args.tick_rate)?;

    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let game = server.game_mut();
    game.persist_all();
    let dropped = game.store().dropped();
    if dropped > 0 {
        info!("{} persistence updates were dropped under load", dropped);
    }
    worker.stop();

    result?;
    Ok(())
}
