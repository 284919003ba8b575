//! Player persistence provider
//!
//! The simulation thread hands `(session_id, state)` entries to a dedicated
//! persistence thread through a 256-slot SPSC ring, so queueing never takes a
//! lock or touches the disk. When the ring is full the entry is dropped and
//! counted; the store still answers loads with the last state it was handed.
//!
//! Every flush interval the worker drains the ring into a private batch,
//! merges it into its cache and rewrites the store file (bincode, written to a
//! temporary file and renamed into place).

use log::{debug, error, info, warn};
use shared::spsc::{spsc_ring, Consumer, Producer};
use shared::PlayerState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const PERSIST_QUEUE_SLOTS: usize = 256;
pub const PERSIST_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Persistence as seen by the simulation
pub trait PlayerStore {
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState>;
    /// Fire-and-forget; may silently drop under overload
    fn queue_persist(&mut self, session_id: u32, state: PlayerState);
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store file is corrupt: {0}")]
    Corrupt(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy)]
struct PersistEntry {
    session_id: u32,
    state: PlayerState,
}

type Cache = Arc<Mutex<HashMap<u32, PlayerState>>>;

fn lock(cache: &Cache) -> MutexGuard<'_, HashMap<u32, PlayerState>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer half, owned by the simulation
pub struct FileStore {
    producer: Producer<PersistEntry, PERSIST_QUEUE_SLOTS>,
    cache: Cache,
    /// Last state queued per session, ahead of the worker's flush
    latest: HashMap<u32, PlayerState>,
    dropped: u64,
}

impl FileStore {
    /// Number of entries dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PlayerStore for FileStore {
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState> {
        if let Some(state) = self.latest.get(&session_id) {
            return Some(*state);
        }
        lock(&self.cache).get(&session_id).copied()
    }

    fn queue_persist(&mut self, session_id: u32, state: PlayerState) {
        self.latest.insert(session_id, state);
        if !self.producer.enqueue(PersistEntry { session_id, state }) {
            self.dropped += 1;
            debug!(
                "Persist queue full, dropped state for session {} ({} total)",
                session_id, self.dropped
            );
        }
    }
}

/// Handle to the persistence thread
pub struct PersistenceWorker {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl PersistenceWorker {
    /// Signals the worker, waits for its final flush and joins it.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            error!("Persistence thread panicked");
        }
    }
}

/// Loads the store file (if any) and starts the persistence thread.
pub fn open_store(
    path: &Path,
    flush_interval: Duration,
) -> Result<(FileStore, PersistenceWorker), StoreError> {
    let initial = read_store_file(path)?;
    info!(
        "Loaded {} persisted players from {}",
        initial.len(),
        path.display()
    );

    let cache: Cache = Arc::new(Mutex::new(initial));
    let (producer, consumer) = spsc_ring::<PersistEntry, PERSIST_QUEUE_SLOTS>();
    let shutdown = Arc::new(AtomicBool::new(false));

    let handle = {
        let cache = Arc::clone(&cache);
        let shutdown = Arc::clone(&shutdown);
        let path = path.to_path_buf();
        thread::Builder::new()
            .name("persistence".to_string())
            .spawn(move || run_worker(consumer, cache, path, flush_interval, shutdown))?
    };

    Ok((
        FileStore {
            producer,
            cache,
            latest: HashMap::new(),
            dropped: 0,
        },
        PersistenceWorker { handle, shutdown },
    ))
}

pub fn read_store_file(path: &Path) -> Result<HashMap<u32, PlayerState>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bincode::deserialize(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_store_file(path: &Path, players: &HashMap<u32, PlayerState>) -> Result<(), StoreError> {
    let bytes = bincode::serialize(players)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn run_worker(
    mut consumer: Consumer<PersistEntry, PERSIST_QUEUE_SLOTS>,
    cache: Cache,
    path: PathBuf,
    flush_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut batch = Vec::with_capacity(PERSIST_QUEUE_SLOTS);
    let mut last_flush = Instant::now();

    loop {
        let stopping = shutdown.load(Ordering::Acquire);
        if stopping || last_flush.elapsed() >= flush_interval {
            flush(&mut consumer, &mut batch, &cache, &path);
            last_flush = Instant::now();
        }
        if stopping {
            break;
        }
        thread::sleep(SHUTDOWN_POLL.min(flush_interval));
    }

    info!("Persistence thread stopped");
}

fn flush(
    consumer: &mut Consumer<PersistEntry, PERSIST_QUEUE_SLOTS>,
    batch: &mut Vec<PersistEntry>,
    cache: &Cache,
    path: &Path,
) {
    batch.clear();
    if consumer.drain_into(batch) == 0 {
        return;
    }

    // Slots are already released; everything below works on the private copy.
    let snapshot = {
        let mut players = lock(cache);
        for entry in batch.iter() {
            players.insert(entry.session_id, entry.state);
        }
        players.clone()
    };

    match write_store_file(path, &snapshot) {
        Ok(()) => debug!("Persisted {} player updates", batch.len()),
        Err(e) => warn!("Failed to write {}: {}", path.display(), e),
    }
}
