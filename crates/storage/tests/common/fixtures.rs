use portrait_storage::FilesystemBackend;
use std::sync::Arc;
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    data
}

/// A filesystem backend over a temporary root with one pending original.
pub struct TestStorage {
    pub backend: Arc<FilesystemBackend>,
    pub dir: TempDir,
}

impl TestStorage {
    /// Create a backend whose `pending/` holds `name` with `bytes`.
    pub async fn with_pending(name: &str, bytes: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(dir.path())
            .await
            .expect("Failed to create backend");
        std::fs::create_dir_all(dir.path().join("pending")).unwrap();
        std::fs::write(dir.path().join("pending").join(name), bytes).unwrap();
        Self {
            backend: Arc::new(backend),
            dir,
        }
    }

    /// Names of the files currently in `assigned/`.
    #[allow(dead_code)]
    pub fn assigned_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.dir.path().join("assigned")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
