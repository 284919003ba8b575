use clap::Parser;
use client::input::InputManager;
use client::network::{refresh_plot_cache, spawn_network_thread, NetworkHandles, SharedPlots};
use client::peers::peer_map;
use client::prediction::{PendingMove, PredictionEngine};
use client::rendering::{Renderer, UiConfig};
use log::{error, info, warn};
use macroquad::prelude::*;
use ::rand::Rng;
use shared::clock::MonotonicClock;
use shared::{TileWorld, SPAWN_POSITION};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9999")]
    server: SocketAddr,

    /// World file; must match the server's for predictions to agree
    #[arg(short = 'w', long)]
    world: Option<PathBuf>,

    /// Movement speed in pixels per second
    #[arg(long, default_value_t = 120.0)]
    speed: f32,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Tilesync Client".to_owned(),
        window_width: 800,
        window_height: 600,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let world = match &args.world {
        Some(path) => TileWorld::load(path)?,
        None => TileWorld::builtin(),
    };

    let session_id = ::rand::thread_rng().gen_range(1..=u32::MAX);
    info!("Starting client as session {:08x}", session_id);
    info!("Connecting to: {}", args.server);
    info!("Controls: WASD or arrow keys to move, Esc to quit");

    let clock = MonotonicClock::new();
    let engine = Arc::new(PredictionEngine::new(SPAWN_POSITION));
    let (peer_publisher, mut peer_view) = peer_map(session_id);
    let plots = SharedPlots::default();
    let (move_tx, move_rx) = mpsc::unbounded_channel::<PendingMove>();
    let shutdown = Arc::new(AtomicBool::new(false));

    let network = spawn_network_thread(
        args.server,
        session_id,
        world.clone(),
        clock,
        NetworkHandles {
            engine: Arc::clone(&engine),
            peers: peer_publisher,
            plots: Arc::clone(&plots),
            moves: move_rx,
            shutdown: Arc::clone(&shutdown),
        },
    )?;

    let mut input = InputManager::new(args.speed);
    let mut renderer = Renderer::new();
    let mut plot_cache = Vec::new();
    prevent_quit();

    loop {
        if is_quit_requested() || is_key_pressed(KeyCode::Escape) {
            break;
        }

        if let Some(cmd) = input.update() {
            let (seq, _) = engine.predict(cmd, &world, clock.now_ns());
            if move_tx.send(PendingMove { seq, cmd }).is_err() {
                warn!("Network thread has stopped");
                break;
            }
        }

        refresh_plot_cache(&plots, &mut plot_cache);

        let now_ns = clock.now_ns();
        let local = engine
            .sample_interpolated(now_ns)
            .map(|pos| (pos, input.facing()));
        {
            let peers = peer_view.read();
            let config = UiConfig {
                session_id,
                pending_moves: engine.pending_count(),
                peer_count: peers.len(),
                plot_count: plot_cache.len(),
            };
            renderer.render(&world, &plot_cache, local, &peers, now_ns, config);
        }

        next_frame().await;
    }

    shutdown.store(true, Ordering::Release);
    drop(move_tx);
    if network.join().is_err() {
        error!("Network thread panicked");
    }
    info!("Client stopped");
    Ok(())
}
