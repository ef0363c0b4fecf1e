use siderite::buffer::buffer_pool_manager::BufferPoolManager;
use siderite::common::logger::initialize_logger;
use siderite::storage::disk::disk_manager::FileDiskManager;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Shared setup for buffer-pool-backed tests: a temp database file, the
/// disk manager over it, and a pool. The temp directory is removed when the
/// context drops.
pub struct TestContext {
    pub bpm: Arc<BufferPoolManager>,
    pub disk: Arc<FileDiskManager>,
    pub db_path: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    pub fn new(test_name: &str, pool_size: usize, replacer_k: usize) -> Self {
        initialize_logger();
        let dir = TempDir::new().expect("failed to create temp dir");
        let db_path = dir.path().join(format!("{}.db", test_name));
        let disk = Arc::new(FileDiskManager::new(&db_path).expect("failed to open db file"));
        let bpm = Arc::new(BufferPoolManager::new(
            pool_size,
            replacer_k,
            disk.clone(),
            None,
        ));
        Self {
            bpm,
            disk,
            db_path,
            _dir: dir,
        }
    }

    /// Reopens a fresh pool over the same database file, as a restart would.
    pub fn reopen(&mut self, pool_size: usize, replacer_k: usize) {
        let disk = Arc::new(FileDiskManager::new(&self.db_path).expect("failed to reopen db file"));
        self.disk = disk.clone();
        self.bpm = Arc::new(BufferPoolManager::new(
            pool_size,
            replacer_k,
            disk,
            None,
        ));
    }
}
