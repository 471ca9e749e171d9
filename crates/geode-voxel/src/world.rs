//! The world manager: the single entry point external systems use to read and
//! write voxels, stream chunks around a point of interest, and persist the world.
//!
//! Resident chunks live in a map guarded, together with the load queue, by one
//! coarse mutex. Each chunk has its own reader/writer lock, always taken
//! after the map lock, never before. Loader threads populate a private chunk
//! with no lock held and then swap it into the shared handle, so readers never
//! wait on population.
//!
//! Eviction always writes the chunk to the [`ChunkStore`] before the chunk is
//! removed from the map.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use geode_config::{Config, ConfigError, StreamingConfig};
use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::chunk::{ChunkState, WorldChunk};
use crate::coords::{ChunkPos, VoxelPos, chunk_extent};
use crate::generator::ChunkGenerator;
use crate::load_queue::{LoadPriority, LoadQueue, LoadTask, LoadTicket};
use crate::loader::LoaderPool;
use crate::store::{ChunkStore, SvoStore};
use crate::svo_serial::SvoError;
use crate::voxel::Voxel;

/// Shared, lockable handle to a resident chunk.
///
/// Consumers may keep a handle after the chunk is evicted; its state then
/// reads [`ChunkState::Unloaded`]. Do not call manager methods while holding
/// one of its guards.
pub type ChunkHandle = Arc<RwLock<WorldChunk>>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors returned by the world manager.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Saving or loading the octree failed.
    #[error(transparent)]
    Svo(#[from] SvoError),
    /// A loader thread could not be started.
    #[error("failed to spawn chunk loader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// What one [`VoxelWorldManager::update_active_region`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionUpdate {
    /// New loads queued.
    pub enqueued: usize,
    /// Chunks flushed and removed.
    pub evicted: usize,
    /// Queued loads dropped because they drifted out of range.
    pub cancelled: usize,
}

/// Snapshot of manager counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldStatistics {
    /// Resident chunks that are active or dirty.
    pub active_chunks: usize,
    /// Loads completed since start.
    pub loaded_chunks: u64,
    /// Loads queued but not yet started.
    pub pending_loads: usize,
    /// Bytes used by resident chunks, as of the last [`VoxelWorldManager::update`].
    pub memory_usage: usize,
    /// Mean time to populate one chunk, in milliseconds.
    pub average_load_time_ms: f32,
    /// Fraction of voxel reads that found their chunk resident.
    pub chunk_hit_rate: f32,
}

pub(crate) struct WorldState {
    chunks: FxHashMap<ChunkPos, ChunkHandle>,
    queue: LoadQueue,
    /// Completion receivers of loads currently being populated.
    in_flight: FxHashMap<ChunkPos, Receiver<()>>,
    /// Wake channel of the current loader pool.
    wake: Option<Sender<()>>,
    streaming: StreamingConfig,
    /// Last reported point of interest.
    focus: Vec3,
}

#[derive(Default)]
struct Counters {
    loads_completed: AtomicU64,
    load_time_us: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    memory_usage: AtomicUsize,
}

/// State shared between the manager and its loader threads.
pub(crate) struct Shared {
    state: Mutex<WorldState>,
    store: Arc<dyn ChunkStore>,
    generator: Arc<dyn ChunkGenerator>,
    counters: Counters,
    voxel_size: f32,
}

/// How a writer gets hold of a resident chunk.
enum Residency {
    Ready(ChunkHandle),
    Populate(LoadTask, ChunkHandle),
    Wait(Receiver<()>),
}

// ---------------------------------------------------------------------------
// Lock helpers
// ---------------------------------------------------------------------------

fn read_chunk(handle: &ChunkHandle) -> RwLockReadGuard<'_, WorldChunk> {
    handle.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_chunk(handle: &ChunkHandle) -> RwLockWriteGuard<'_, WorldChunk> {
    handle.write().unwrap_or_else(PoisonError::into_inner)
}

fn try_write_chunk(handle: &ChunkHandle) -> Option<RwLockWriteGuard<'_, WorldChunk>> {
    match handle.try_write() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

fn loading_handle(pos: ChunkPos) -> ChunkHandle {
    let mut chunk = WorldChunk::new(pos);
    chunk.set_state(ChunkState::Loading);
    Arc::new(RwLock::new(chunk))
}

fn chunk_distance_sq(a: ChunkPos, b: ChunkPos) -> u64 {
    let dx = i64::from(a.x) - i64::from(b.x);
    let dy = i64::from(a.y) - i64::from(b.y);
    let dz = i64::from(a.z) - i64::from(b.z);
    (dx * dx + dy * dy + dz * dz) as u64
}

// ---------------------------------------------------------------------------
// Shared: loading and eviction
// ---------------------------------------------------------------------------

impl Shared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn distance_to(&self, pos: ChunkPos, poi: Vec3) -> f32 {
        pos.center(self.voxel_size).distance(poi)
    }

    /// Queues a load for a chunk that is not resident. Returns a ticket in every case.
    fn enqueue_locked(
        &self,
        state: &mut WorldState,
        pos: ChunkPos,
        priority: LoadPriority,
    ) -> LoadTicket {
        let focus = ChunkPos::from_world(state.focus, self.voxel_size);
        let dist_sq = chunk_distance_sq(pos, focus);
        if state.queue.contains(pos) {
            return state.queue.push(pos, priority, dist_sq);
        }
        if let Some(done) = state.in_flight.get(&pos) {
            return LoadTicket::from_receiver(done.clone());
        }
        if state.chunks.contains_key(&pos) {
            return LoadTicket::ready();
        }

        let ticket = state.queue.push(pos, priority, dist_sq);
        state.chunks.insert(pos, loading_handle(pos));
        if let Some(wake) = &state.wake {
            // A closed channel only means the pool is being replaced; the new
            // pool is woken for every queued task.
            let _ = wake.send(());
        }
        ticket
    }

    /// Flushes a resident chunk to the store and removes it.
    ///
    /// Returns `false` for absent chunks, chunks still loading, and chunks
    /// whose lock is currently held elsewhere.
    fn evict_locked(&self, state: &mut WorldState, pos: ChunkPos) -> bool {
        let Some(handle) = state.chunks.get(&pos) else {
            return false;
        };
        let Some(mut chunk) = try_write_chunk(handle) else {
            tracing::trace!(chunk = ?pos, "chunk busy, eviction deferred");
            return false;
        };
        if !chunk.is_active() {
            return false;
        }
        self.store.store_chunk(pos, &chunk);
        chunk.set_state(ChunkState::Unloaded);
        drop(chunk);
        state.chunks.remove(&pos);
        true
    }

    /// Pops the most urgent queued load and populates it on the calling thread.
    pub(crate) fn process_next(&self) {
        let (task, handle) = {
            let mut state = self.lock_state();
            let Some(task) = state.queue.pop() else {
                return;
            };
            state.in_flight.insert(task.pos, task.done_rx.clone());
            let handle = state
                .chunks
                .entry(task.pos)
                .or_insert_with(|| loading_handle(task.pos))
                .clone();
            (task, handle)
        };
        self.populate(task, &handle);
    }

    /// Fills a chunk from the store, or from the generator if it was never
    /// stored, and publishes it as `Active`.
    fn populate(&self, task: LoadTask, handle: &ChunkHandle) {
        let started = Instant::now();
        let pos = task.pos;

        let mut fresh = WorldChunk::new(pos);
        let from_store = self.store.load_chunk(pos, &mut fresh);
        if !from_store {
            self.generator.generate(pos, &mut fresh);
        }
        fresh.optimize_storage();
        fresh.set_state(ChunkState::Active);

        {
            // Publishing and leaving `in_flight` happen under one state lock,
            // so no other thread sees an active chunk that is still in flight.
            let mut state = self.lock_state();
            let mut chunk = write_chunk(handle);
            if chunk.state() == ChunkState::Loading {
                *chunk = fresh;
            } else {
                tracing::debug!(chunk = ?pos, state = ?chunk.state(), "discarded stale load");
            }
            // A newer load of the same position may own the entry by now.
            if state
                .in_flight
                .get(&pos)
                .is_some_and(|done| done.same_channel(&task.done_rx))
            {
                state.in_flight.remove(&pos);
            }
        }

        let elapsed = started.elapsed().as_micros() as u64;
        self.counters.loads_completed.fetch_add(1, Ordering::Relaxed);
        self.counters.load_time_us.fetch_add(elapsed, Ordering::Relaxed);
        tracing::trace!(
            chunk = ?pos,
            priority = ?task.priority,
            from_store,
            elapsed_us = elapsed,
            "chunk loaded"
        );
        // Dropping the task releases every ticket waiting on it.
        drop(task);
    }

    /// Makes `pos` resident now, for a writer.
    ///
    /// Claims the chunk's queued task, waits for its in-flight load, or loads
    /// it inline if nobody asked for it yet.
    fn ensure_resident(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        let residency = {
            let mut state = self.lock_state();
            if let Some(task) = state.queue.remove(pos) {
                state.in_flight.insert(pos, task.done_rx.clone());
                let handle = state
                    .chunks
                    .entry(pos)
                    .or_insert_with(|| loading_handle(pos))
                    .clone();
                Residency::Populate(task, handle)
            } else if let Some(done) = state.in_flight.get(&pos) {
                Residency::Wait(done.clone())
            } else if let Some(handle) = state.chunks.get(&pos) {
                Residency::Ready(handle.clone())
            } else {
                let task = LoadTask::new(pos, LoadPriority::Urgent);
                let handle = loading_handle(pos);
                state.chunks.insert(pos, handle.clone());
                state.in_flight.insert(pos, task.done_rx.clone());
                Residency::Populate(task, handle)
            }
        };
        match residency {
            Residency::Ready(handle) => Some(handle),
            Residency::Populate(task, handle) => {
                self.populate(task, &handle);
                Some(handle)
            }
            Residency::Wait(done) => {
                LoadTicket::from_receiver(done).wait();
                self.lock_state().chunks.get(&pos).cloned()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VoxelWorldManager
// ---------------------------------------------------------------------------

/// Orchestrates the resident chunk set, background loading, dirty tracking and
/// persistence of one world.
///
/// All methods take `&self`; the manager can be shared across threads.
pub struct VoxelWorldManager {
    shared: Arc<Shared>,
    pool: Mutex<LoaderPool>,
    save_file: PathBuf,
}

impl VoxelWorldManager {
    /// Creates a manager over `store` and starts the loader pool.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::Config`] if `config` fails validation and
    /// [`WorldError::Spawn`] if a loader thread cannot be started.
    pub fn new(
        config: &Config,
        store: Arc<dyn ChunkStore>,
        generator: Arc<dyn ChunkGenerator>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(WorldState {
                chunks: FxHashMap::default(),
                queue: LoadQueue::new(),
                in_flight: FxHashMap::default(),
                wake: None,
                streaming: config.streaming.clone(),
                focus: Vec3::ZERO,
            }),
            store,
            generator,
            counters: Counters::default(),
            voxel_size: config.world.voxel_size,
        });

        let threads = config.streaming.resolved_threads();
        let (pool, wake) = LoaderPool::spawn(&shared, threads)?;
        shared.lock_state().wake = Some(wake);

        tracing::info!(
            threads,
            load_distance = config.streaming.load_distance,
            unload_distance = config.streaming.unload_distance,
            svo_depth = config.world.svo_max_depth,
            "voxel world manager started"
        );
        Ok(Self {
            shared,
            pool: Mutex::new(pool),
            save_file: config.world.save_file.clone(),
        })
    }

    /// Creates a manager backed by an empty octree of the configured depth.
    pub fn with_svo_store(
        config: &Config,
        generator: Arc<dyn ChunkGenerator>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let store = Arc::new(SvoStore::new(config.world.svo_max_depth));
        Self::new(config, store, generator)
    }

    /// Configured save file.
    pub fn save_path(&self) -> &Path {
        &self.save_file
    }

    pub fn voxel_size(&self) -> f32 {
        self.shared.voxel_size
    }

    // -- Voxel access --------------------------------------------------------

    /// Returns the voxel at a global position.
    ///
    /// Chunks that are absent or still loading read as [`Voxel::AIR`]; the
    /// call never triggers a load.
    pub fn get_voxel(&self, pos: VoxelPos) -> Voxel {
        let handle = self.shared.lock_state().chunks.get(&pos.chunk()).cloned();
        let counters = &self.shared.counters;
        let Some(handle) = handle else {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            return Voxel::AIR;
        };
        let chunk = read_chunk(&handle);
        if !chunk.is_active() {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            return Voxel::AIR;
        }
        counters.hits.fetch_add(1, Ordering::Relaxed);
        chunk.get_voxel(pos.local())
    }

    /// Writes a voxel at a global position.
    ///
    /// A chunk that is not resident is loaded synchronously first. If it is
    /// evicted between the load and the write, the write is retried once and
    /// then dropped.
    pub fn set_voxel(&self, pos: VoxelPos, voxel: Voxel) {
        let chunk_pos = pos.chunk();
        for _ in 0..2 {
            let Some(handle) = self.shared.ensure_resident(chunk_pos) else {
                continue;
            };
            let mut chunk = write_chunk(&handle);
            if chunk.is_active() {
                chunk.set_voxel(pos.local(), voxel);
                return;
            }
        }
        tracing::debug!(?pos, "dropped write to chunk that could not be made resident");
    }

    pub fn has_voxel(&self, pos: VoxelPos) -> bool {
        !self.get_voxel(pos).is_air()
    }

    /// Reads many voxels, locking each chunk once per run of same-chunk positions.
    pub fn get_voxel_bulk(&self, positions: &[VoxelPos]) -> Vec<Voxel> {
        let mut out = Vec::with_capacity(positions.len());
        let mut cached: Option<(ChunkPos, Option<ChunkHandle>)> = None;
        for &pos in positions {
            let chunk_pos = pos.chunk();
            if cached.as_ref().is_none_or(|(c, _)| *c != chunk_pos) {
                let handle = self.shared.lock_state().chunks.get(&chunk_pos).cloned();
                cached = Some((chunk_pos, handle));
            }
            let voxel = match cached.as_ref().and_then(|(_, h)| h.as_ref()) {
                Some(handle) => {
                    let chunk = read_chunk(handle);
                    if chunk.is_active() {
                        chunk.get_voxel(pos.local())
                    } else {
                        Voxel::AIR
                    }
                }
                None => Voxel::AIR,
            };
            out.push(voxel);
        }
        out
    }

    /// Writes many voxels with [`set_voxel`](Self::set_voxel) semantics.
    pub fn set_voxel_bulk(&self, writes: &[(VoxelPos, Voxel)]) {
        for &(pos, voxel) in writes {
            self.set_voxel(pos, voxel);
        }
    }

    /// Handle to a resident (or loading) chunk.
    pub fn get_chunk(&self, pos: ChunkPos) -> Option<ChunkHandle> {
        self.shared.lock_state().chunks.get(&pos).cloned()
    }

    // -- Loading & eviction --------------------------------------------------

    /// Requests a chunk load.
    ///
    /// Requests for a chunk that is already queued, loading or resident do not
    /// create another task; a queued task may be raised to `priority`.
    pub fn load_chunk(&self, pos: ChunkPos, priority: LoadPriority) -> LoadTicket {
        let mut state = self.shared.lock_state();
        self.shared.enqueue_locked(&mut state, pos, priority)
    }

    /// Flushes a chunk to the store and removes it from memory.
    ///
    /// Returns `false` if the chunk is absent, still loading, or locked by
    /// another thread.
    pub fn unload_chunk(&self, pos: ChunkPos) -> bool {
        let mut state = self.shared.lock_state();
        let evicted = self.shared.evict_locked(&mut state, pos);
        if evicted {
            tracing::debug!(chunk = ?pos, "chunk unloaded");
        }
        evicted
    }

    /// Streams chunks around a point of interest.
    ///
    /// Chunks whose centre lies within `load_distance` of `poi` (searched in a
    /// cube sized from `radius`) are queued at normal priority. Resident chunks
    /// beyond `unload_distance` are evicted. With `cancel_stale_loads`, queued
    /// loads beyond `unload_distance` are dropped.
    pub fn update_active_region(&self, poi: Vec3, radius: f32) -> RegionUpdate {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        state.focus = poi;
        let streaming = state.streaming.clone();
        let mut update = RegionUpdate::default();

        for pos in self.chunk_candidates(poi, radius) {
            if shared.distance_to(pos, poi) <= streaming.load_distance
                && !state.chunks.contains_key(&pos)
            {
                shared.enqueue_locked(&mut state, pos, LoadPriority::Normal);
                if state.queue.contains(pos) {
                    update.enqueued += 1;
                }
            }
        }

        let far: Vec<ChunkPos> = state
            .chunks
            .keys()
            .copied()
            .filter(|pos| shared.distance_to(*pos, poi) > streaming.unload_distance)
            .collect();
        for pos in far {
            if shared.evict_locked(&mut state, pos) {
                update.evicted += 1;
            }
        }

        if streaming.cancel_stale_loads {
            let cancelled = state
                .queue
                .cancel_where(|pos| shared.distance_to(pos, poi) > streaming.unload_distance);
            for pos in &cancelled {
                if let Some(handle) = state.chunks.remove(pos) {
                    write_chunk(&handle).set_state(ChunkState::Unloaded);
                }
            }
            update.cancelled = cancelled.len();
        }

        tracing::debug!(
            enqueued = update.enqueued,
            evicted = update.evicted,
            cancelled = update.cancelled,
            resident = state.chunks.len(),
            "updated active region"
        );
        update
    }

    fn chunk_candidates(&self, center: Vec3, radius: f32) -> Vec<ChunkPos> {
        let extent = chunk_extent(self.shared.voxel_size);
        let reach = (radius.max(0.0) / extent).ceil() as i32 + 1;
        let origin = ChunkPos::from_world(center, self.shared.voxel_size);
        let side = (2 * reach + 1) as usize;
        let mut out = Vec::with_capacity(side * side * side);
        for dz in -reach..=reach {
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    out.push(origin.offset(dx, dy, dz));
                }
            }
        }
        out
    }

    /// Chunks whose centre lies within `radius` of `center`, resident or not.
    pub fn get_chunks_in_radius(&self, center: Vec3, radius: f32) -> Vec<ChunkPos> {
        self.chunk_candidates(center, radius)
            .into_iter()
            .filter(|pos| self.shared.distance_to(*pos, center) <= radius)
            .collect()
    }

    /// Load priority of a chunk as its centre's distance to `poi`; lower loads first.
    pub fn chunk_priority(&self, pos: ChunkPos, poi: Vec3) -> f32 {
        self.shared.distance_to(pos, poi)
    }

    /// Replaces the streaming distances and limits.
    ///
    /// `loading_threads` is ignored here; use
    /// [`set_loading_thread_count`](Self::set_loading_thread_count).
    pub fn set_streaming_config(&self, streaming: StreamingConfig) -> Result<(), WorldError> {
        streaming.validate()?;
        self.shared.lock_state().streaming = streaming;
        Ok(())
    }

    // -- Dirty tracking ------------------------------------------------------

    /// Raises a resident chunk's dirty level.
    pub fn mark_chunk_dirty(&self, pos: ChunkPos, level: ChunkState) {
        if let Some(handle) = self.get_chunk(pos) {
            write_chunk(&handle).mark_dirty(level);
        }
    }

    /// Active resident chunks whose state is at least `min_level`, sorted.
    ///
    /// `ChunkState::Active` reports every active chunk, clean or dirty.
    pub fn get_dirty_chunks(&self, min_level: ChunkState) -> Vec<ChunkPos> {
        let handles: Vec<(ChunkPos, ChunkHandle)> = {
            let state = self.shared.lock_state();
            state
                .chunks
                .iter()
                .map(|(pos, h)| (*pos, h.clone()))
                .collect()
        };
        let mut dirty: Vec<ChunkPos> = handles
            .into_iter()
            .filter(|(_, handle)| {
                let chunk = read_chunk(handle);
                chunk.is_active() && chunk.state() >= min_level
            })
            .map(|(pos, _)| pos)
            .collect();
        dirty.sort();
        dirty
    }

    /// Resets a resident chunk to `Active`.
    pub fn clear_dirty_flag(&self, pos: ChunkPos) {
        if let Some(handle) = self.get_chunk(pos) {
            let mut chunk = write_chunk(&handle);
            if chunk.is_active() {
                chunk.clear_dirty();
            }
        }
    }

    // -- Maintenance ---------------------------------------------------------

    /// Periodic housekeeping: refreshes memory statistics and evicts the
    /// farthest chunks while more than `max_active_chunks` are resident.
    pub fn update(&self, _dt: f32) {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let limit = state.streaming.max_active_chunks;

        let mut resident: Vec<(ChunkPos, f32)> = state
            .chunks
            .iter()
            .filter(|(_, h)| read_chunk(h).is_active())
            .map(|(pos, _)| (*pos, shared.distance_to(*pos, state.focus)))
            .collect();
        if resident.len() > limit {
            resident.sort_by(|a, b| b.1.total_cmp(&a.1));
            let excess = resident.len() - limit;
            let mut evicted = 0;
            for (pos, _) in resident.into_iter() {
                if evicted == excess {
                    break;
                }
                if shared.evict_locked(&mut state, pos) {
                    evicted += 1;
                }
            }
            tracing::debug!(evicted, limit, "enforced resident chunk limit");
        }

        let memory: usize = state
            .chunks
            .values()
            .map(|h| read_chunk(h).memory_usage())
            .sum();
        shared.counters.memory_usage.store(memory, Ordering::Relaxed);
    }

    /// Evicts half of the clean resident chunks, farthest from the last
    /// point of interest first. Returns the number evicted.
    pub fn garbage_collect(&self) -> usize {
        let shared = &self.shared;
        let mut state = shared.lock_state();
        let mut clean: Vec<(ChunkPos, f32)> = state
            .chunks
            .iter()
            .filter(|(_, h)| read_chunk(h).state() == ChunkState::Active)
            .map(|(pos, _)| (*pos, shared.distance_to(*pos, state.focus)))
            .collect();
        clean.sort_by(|a, b| b.1.total_cmp(&a.1));
        let target = clean.len() / 2;
        let evicted = clean
            .into_iter()
            .take(target)
            .filter(|(pos, _)| shared.evict_locked(&mut state, *pos))
            .count();
        tracing::debug!(evicted, "garbage collected chunks");
        evicted
    }

    /// Switches every clean resident chunk to sparse storage. Returns how many
    /// were dense before.
    pub fn compress_inactive_chunks(&self) -> usize {
        let state = self.shared.lock_state();
        let mut compressed = 0;
        for handle in state.chunks.values() {
            let Some(mut chunk) = try_write_chunk(handle) else {
                continue;
            };
            if chunk.state() == ChunkState::Active && chunk.is_dense() {
                chunk.compress();
                compressed += 1;
            }
        }
        compressed
    }

    /// Merges redundant structure in the backing store.
    pub fn optimize_store(&self) {
        self.shared.store.compress();
    }

    /// Current bytes used by resident chunks plus the backing store.
    pub fn memory_usage(&self) -> usize {
        let chunks: usize = {
            let state = self.shared.lock_state();
            state
                .chunks
                .values()
                .map(|h| read_chunk(h).memory_usage())
                .sum()
        };
        chunks + self.shared.store.memory_usage()
    }

    /// Restarts the loader pool with `count` threads. Zero pauses background
    /// loading; writes still load chunks on the calling thread.
    ///
    /// Queued loads survive the restart.
    pub fn set_loading_thread_count(&self, count: usize) -> Result<(), WorldError> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let (fresh, wake) = LoaderPool::spawn(&self.shared, count)?;
        pool.request_stop();
        {
            let mut state = self.shared.lock_state();
            for _ in 0..state.queue.len() {
                let _ = wake.send(());
            }
            // Replacing the sender disconnects the old pool's channel.
            state.wake = Some(wake);
        }
        let mut old = std::mem::replace(&mut *pool, fresh);
        old.join();
        tracing::info!(threads = count, "restarted chunk loader pool");
        Ok(())
    }

    pub fn loading_thread_count(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .thread_count()
    }

    // -- Persistence ---------------------------------------------------------

    /// Flushes every resident chunk to the store, then writes the store to `path`.
    pub fn save_world(&self, path: &Path) -> Result<(), WorldError> {
        let flushed = {
            let state = self.shared.lock_state();
            let mut flushed = 0;
            for (pos, handle) in &state.chunks {
                let chunk = read_chunk(handle);
                if chunk.is_active() {
                    self.shared.store.store_chunk(*pos, &chunk);
                    flushed += 1;
                }
            }
            flushed
        };
        self.shared.store.save(path)?;
        tracing::info!(path = %path.display(), flushed, "world saved");
        Ok(())
    }

    /// Replaces the store with the world saved at `path`.
    ///
    /// Resident chunks belong to the previous world: they are discarded
    /// without flushing, and queued loads are cancelled. On error nothing
    /// changes.
    pub fn load_world(&self, path: &Path) -> Result<(), WorldError> {
        let mut state = self.shared.lock_state();
        self.shared.store.load(path)?;
        let cancelled = state.queue.cancel_where(|_| true);
        // Running loads finish into detached handles; their positions may be
        // requested again straight away.
        state.in_flight.clear();
        let discarded = state.chunks.len();
        for (_, handle) in state.chunks.drain() {
            write_chunk(&handle).set_state(ChunkState::Unloaded);
        }
        tracing::info!(
            path = %path.display(),
            discarded,
            cancelled = cancelled.len(),
            "world loaded"
        );
        Ok(())
    }

    // -- Statistics & conversions ------------------------------------------

    pub fn statistics(&self) -> WorldStatistics {
        let (active_chunks, pending_loads) = {
            let state = self.shared.lock_state();
            let active = state
                .chunks
                .values()
                .filter(|h| read_chunk(h).is_active())
                .count();
            (active, state.queue.len())
        };
        let counters = &self.shared.counters;
        let loads = counters.loads_completed.load(Ordering::Relaxed);
        let load_time_us = counters.load_time_us.load(Ordering::Relaxed);
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        WorldStatistics {
            active_chunks,
            loaded_chunks: loads,
            pending_loads,
            memory_usage: counters.memory_usage.load(Ordering::Relaxed),
            average_load_time_ms: if loads == 0 {
                0.0
            } else {
                load_time_us as f32 / loads as f32 / 1000.0
            },
            chunk_hit_rate: if hits + misses == 0 {
                1.0
            } else {
                hits as f32 / (hits + misses) as f32
            },
        }
    }

    pub fn world_to_voxel(&self, world: Vec3) -> VoxelPos {
        VoxelPos::from_world(world, self.shared.voxel_size)
    }

    pub fn voxel_to_world(&self, pos: VoxelPos) -> Vec3 {
        pos.to_world(self.shared.voxel_size)
    }

    pub fn world_to_chunk(&self, world: Vec3) -> ChunkPos {
        ChunkPos::from_world(world, self.shared.voxel_size)
    }

    /// Minimum corner of a chunk in world space.
    pub fn chunk_to_world(&self, pos: ChunkPos) -> Vec3 {
        pos.to_world(self.shared.voxel_size)
    }

    pub fn chunk_center(&self, pos: ChunkPos) -> Vec3 {
        pos.center(self.shared.voxel_size)
    }
}

impl Drop for VoxelWorldManager {
    fn drop(&mut self) {
        let pool = self.pool.get_mut().unwrap_or_else(PoisonError::into_inner);
        pool.request_stop();
        self.shared.lock_state().wake = None;
        pool.join();
        tracing::debug!("voxel world manager stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "world_tests.rs"]
mod tests;
