//! Per-session concurrency: one solve at a time, newest request wins, and a
//! bounded cache of undistorted images.

use crate::config::CalibrationConfig;
use crate::error::CalibError;
use crate::ops::{self, Calibration, CalibrationFile};
use camcal_core::{
    ArtifactId, BoardGeometry, CalibrationArtifact, GrayImage, GrayImageView, ImageId,
};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Position of a solve request in its session's submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SolveTicket(u64);

/// Serializes solves and drops requests that became stale while waiting.
#[derive(Debug, Default)]
pub struct SolveCoordinator {
    generation: AtomicU64,
    running: Mutex<()>,
}

impl SolveCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request. Every earlier ticket that has not started yet
    /// is now superseded.
    pub fn ticket(&self) -> SolveTicket {
        SolveTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_latest(&self, ticket: SolveTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    /// Wait for the running solve to finish, then run `solve` unless a newer
    /// ticket was issued in the meantime.
    pub fn run<T>(
        &self,
        ticket: SolveTicket,
        solve: impl FnOnce() -> Result<T, CalibError>,
    ) -> Result<T, CalibError> {
        let _running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_latest(ticket) {
            debug!("solve {:?} superseded", ticket);
            return Err(CalibError::Superseded);
        }
        solve()
    }
}

#[derive(Debug)]
struct CacheInner<K, V> {
    entries: HashMap<K, Arc<V>>,
    order: VecDeque<K>,
}

/// Bounded cache with first-in first-out eviction.
///
/// Keys are `(image, artifact)` pairs for undistortion results, so a new
/// calibration never serves images corrected with an older one.
#[derive(Debug)]
pub struct UndistortCache<V = GrayImage, K = (ImageId, ArtifactId)> {
    capacity: usize,
    inner: Mutex<CacheInner<K, V>>,
}

impl<V, K: Clone + Eq + Hash> UndistortCache<V, K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().entries.get(key).cloned()
    }

    /// Insert `value` unless the key is already present; returns the cached value.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let mut inner = self.lock();
        if let Some(existing) = inner.entries.get(&key) {
            return Arc::clone(existing);
        }
        let value = Arc::new(value);
        if self.capacity == 0 {
            return value;
        }
        while inner.order.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, Arc::clone(&value));
        value
    }

    /// Cached value for `key`, computing it outside the lock on a miss.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        Ok(self.insert(key, value))
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// State shared by all requests of one calibration session.
///
/// Holds the latest successful artifact. A failed or superseded solve never
/// replaces it.
#[derive(Debug)]
pub struct CalibrationSession {
    config: CalibrationConfig,
    solves: SolveCoordinator,
    undistorted: UndistortCache,
    current: RwLock<Option<Arc<CalibrationArtifact>>>,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

impl CalibrationSession {
    pub fn new(config: CalibrationConfig) -> Self {
        let capacity = config.cache_capacity;
        Self {
            config,
            solves: SolveCoordinator::new(),
            undistorted: UndistortCache::new(capacity),
            current: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn solves(&self) -> &SolveCoordinator {
        &self.solves
    }

    pub fn cache(&self) -> &UndistortCache {
        &self.undistorted
    }

    pub fn current(&self) -> Option<Arc<CalibrationArtifact>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Detect and solve, superseding any request of this session still
    /// waiting for its turn.
    pub fn calibrate(
        &self,
        images: &[GrayImageView<'_>],
        board: &BoardGeometry,
        fix_k3: bool,
    ) -> Result<Calibration, CalibError> {
        let ticket = self.solves.ticket();
        let calibration = self
            .solves
            .run(ticket, || ops::calibrate(images, board, fix_k3, &self.config))?;
        self.publish(&calibration.artifact);
        Ok(calibration)
    }

    fn publish(&self, artifact: &Arc<CalibrationArtifact>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        info!("session artifact is now {}", artifact.id());
        *current = Some(Arc::clone(artifact));
    }

    /// Undistort with the current artifact, reusing earlier results.
    pub fn undistort(
        &self,
        id: &ImageId,
        image: &GrayImageView<'_>,
    ) -> Result<Arc<GrayImage>, CalibError> {
        let artifact = self.current().ok_or(CalibError::NoCalibration)?;
        let key = (id.clone(), artifact.id());
        self.undistorted.get_or_try_insert_with(key, || {
            ops::undistort_gray(image, &artifact, &self.config.undistort)
        })
    }

    pub fn calibration_file(&self) -> Result<CalibrationFile, CalibError> {
        let artifact = self.current().ok_or(CalibError::NoCalibration)?;
        Ok(ops::calibration_file(&artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn older_ticket_is_superseded() {
        let solves = SolveCoordinator::new();
        let first = solves.ticket();
        let second = solves.ticket();
        assert!(first < second);
        assert!(matches!(
            solves.run(first, || Ok(1)),
            Err(CalibError::Superseded)
        ));
        assert_eq!(solves.run(second, || Ok(2)).expect("latest runs"), 2);
    }

    #[test]
    fn waiting_request_is_superseded_by_a_newer_one() {
        let solves = Arc::new(SolveCoordinator::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let running = {
            let solves = Arc::clone(&solves);
            let ticket = solves.ticket();
            thread::spawn(move || {
                solves.run(ticket, || {
                    started_tx.send(()).expect("signal");
                    release_rx.recv().expect("release");
                    Ok("first")
                })
            })
        };
        started_rx.recv().expect("first solve started");

        let waiting = {
            let solves = Arc::clone(&solves);
            let ticket = solves.ticket();
            thread::spawn(move || solves.run(ticket, || Ok("second")))
        };
        let newest = solves.ticket();
        release_tx.send(()).expect("release");

        assert_eq!(running.join().expect("join").expect("first"), "first");
        assert!(matches!(
            waiting.join().expect("join"),
            Err(CalibError::Superseded)
        ));
        assert_eq!(solves.run(newest, || Ok("third")).expect("third"), "third");
    }

    #[test]
    fn cache_evicts_oldest_first() {
        let cache: UndistortCache<u32, &str> = UndistortCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.get(&"b").as_deref(), Some(&2));
        assert_eq!(cache.get(&"c").as_deref(), Some(&3));
    }

    #[test]
    fn cache_keeps_first_value_for_a_key() {
        let cache: UndistortCache<u32, &str> = UndistortCache::new(4);
        cache.insert("a", 1);
        assert_eq!(*cache.insert("a", 9), 1);
        let hit = cache
            .get_or_try_insert_with("a", || Err::<u32, ()>(()))
            .expect("cached");
        assert_eq!(*hit, 1);
    }

    #[test]
    fn failed_compute_is_not_cached() {
        let cache: UndistortCache<u32, &str> = UndistortCache::new(4);
        assert!(cache
            .get_or_try_insert_with("a", || Err::<u32, &str>("boom"))
            .is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_never_stores() {
        let cache: UndistortCache<u32, &str> = UndistortCache::new(0);
        assert_eq!(*cache.insert("a", 1), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn session_without_calibration() {
        let session = CalibrationSession::default();
        assert!(session.current().is_none());
        assert!(matches!(
            session.calibration_file(),
            Err(CalibError::NoCalibration)
        ));
        let img = GrayImage::new(32, 32);
        assert!(matches!(
            session.undistort(&ImageId::from("x"), &img.view()),
            Err(CalibError::NoCalibration)
        ));
    }
}
