use chrono::Utc;
use rand::Rng;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::shared::AppError;

/// Result of persisting one upload.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub stored_name: String,
    pub size: u64,
}

/// Persists uploaded bytes under collision-free names and retrieves or
/// deletes them. Owns the physical bytes; the registry only holds the
/// stored names.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the storage root if it does not exist yet.
    pub async fn init(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.root).await?;
        info!(root = %self.root.display(), "File storage directory ready");
        Ok(())
    }

    pub fn path_for(&self, stored_name: &str) -> PathBuf {
        self.root.join(stored_name)
    }

    /// Writes `bytes` under a unique name derived from the room code, the
    /// current time, a random disambiguator and the sanitized original name.
    /// Repeated uploads of the same filename never collide. The write is
    /// verified with a presence check before the name is returned.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn save(
        &self,
        code: &str,
        desired_name: &str,
        bytes: &[u8],
    ) -> Result<SavedFile, AppError> {
        let safe_name = match sanitize_filename(desired_name) {
            Some(name) => name,
            None => format!("file_{}", Utc::now().timestamp()),
        };

        let disambiguator: u32 = rand::rng().random_range(1000..10000);
        let stored_name = format!(
            "{}_{}_{}_{}",
            code,
            Utc::now().timestamp(),
            disambiguator,
            safe_name
        );

        let path = self.path_for(&stored_name);
        fs::write(&path, bytes).await?;

        // Presence check: the write call returning Ok is not proof the file
        // landed on a misbehaving filesystem
        let metadata = fs::metadata(&path).await?;
        info!(
            stored_name = %stored_name,
            size = metadata.len(),
            "File saved"
        );

        Ok(SavedFile {
            stored_name,
            size: metadata.len(),
        })
    }

    /// Best-effort removal. A missing file is success; other I/O errors are
    /// logged and reported but callers deleting batches keep going.
    pub async fn delete(&self, stored_name: &str) -> Result<(), AppError> {
        let path = self.path_for(stored_name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(stored_name = %stored_name, "File deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(stored_name = %stored_name, "File already gone");
                Ok(())
            }
            Err(e) => {
                warn!(stored_name = %stored_name, error = %e, "Failed to delete file");
                Err(e.into())
            }
        }
    }

    /// Deletes a batch of files, one room's worth; failures on individual
    /// files never abort their siblings. Returns how many were removed.
    pub async fn delete_all(&self, stored_names: &[String]) -> usize {
        let mut deleted = 0;
        for name in stored_names {
            if self.delete(name).await.is_ok() {
                deleted += 1;
            }
        }
        deleted
    }

    /// Opens a stored file for streaming, with its length.
    pub async fn open(&self, stored_name: &str) -> Result<(fs::File, u64), AppError> {
        let path = self.path_for(stored_name);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound("File not found".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Builds a deflate-compressed zip of the given `(stored_name,
    /// display_name)` pairs in memory. Entries missing on disk are skipped
    /// and logged rather than failing the archive; duplicate display names
    /// are allowed.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn zip_all(&self, entries: Vec<(String, String)>) -> Result<Vec<u8>, AppError> {
        let root = self.root.clone();

        // Compression is CPU-bound and reads with std::fs; keep it off the
        // async workers
        let bytes = tokio::task::spawn_blocking(move || build_zip(&root, &entries))
            .await
            .map_err(|_| AppError::Internal)??;

        Ok(bytes)
    }
}

fn build_zip(root: &Path, entries: &[(String, String)]) -> Result<Vec<u8>, AppError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (stored_name, display_name) in entries {
        let path = root.join(stored_name);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(
                    stored_name = %stored_name,
                    error = %e,
                    "File missing while building zip, skipping"
                );
                continue;
            }
        };

        writer
            .start_file(display_name.as_str(), options)
            .map_err(|e| AppError::Storage(e.to_string()))?;
        writer.write_all(&contents)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| AppError::Storage(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Reduces an untrusted client filename to a filesystem-safe form: path
/// components are stripped, whitespace becomes underscores, anything outside
/// `[A-Za-z0-9._-]` is dropped and leading dots are trimmed. Returns None
/// when nothing safe remains.
pub fn sanitize_filename(desired: &str) -> Option<String> {
    let last_component = desired
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(desired);

    let cleaned: String = last_component
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[rstest]
    #[case("report.pdf", Some("report.pdf"))]
    #[case("my notes.txt", Some("my_notes.txt"))]
    #[case("../../etc/passwd", Some("passwd"))]
    #[case("..\\..\\boot.ini", Some("boot.ini"))]
    #[case(".hidden", Some("hidden"))]
    #[case("résumé.doc", Some("rsum.doc"))]
    #[case("données/été.csv", Some("t.csv"))]
    #[case("...", None)]
    #[case("", None)]
    #[case("<>:|?*", None)]
    fn test_sanitize_filename(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(sanitize_filename(input).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_save_and_open_round_trip() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let saved = store.save("123456", "hello.txt", b"hello world").await.unwrap();
        assert_eq!(saved.size, 11);
        assert!(saved.stored_name.starts_with("123456_"));
        assert!(saved.stored_name.ends_with("_hello.txt"));

        let (_, len) = store.open(&saved.stored_name).await.unwrap();
        assert_eq!(len, 11);
        let on_disk = std::fs::read(store.path_for(&saved.stored_name)).unwrap();
        assert_eq!(on_disk, b"hello world");
    }

    #[tokio::test]
    async fn test_save_same_name_never_collides() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let a = store.save("123456", "a.txt", b"12345").await.unwrap();
        let b = store.save("123456", "a.txt", b"1234567").await.unwrap();

        assert_ne!(a.stored_name, b.stored_name);
        assert_eq!(a.size, 5);
        assert_eq!(b.size, 7);
    }

    #[tokio::test]
    async fn test_save_unsafe_name_falls_back() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let saved = store.save("123456", "<>:|", b"x").await.unwrap();
        let suffix = saved.stored_name.splitn(4, '_').nth(3).unwrap().to_string();
        assert!(suffix.starts_with("file_"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        assert!(store.delete("123456_0_0000_nope.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_all_counts() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let a = store.save("123456", "a.txt", b"a").await.unwrap();
        let b = store.save("123456", "b.txt", b"b").await.unwrap();

        let deleted = store
            .delete_all(&[a.stored_name.clone(), b.stored_name.clone()])
            .await;
        assert_eq!(deleted, 2);
        assert!(store.open(&a.stored_name).await.is_err());
        assert!(store.open(&b.stored_name).await.is_err());
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let err = store.open("123456_0_0000_nope.txt").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zip_all_with_duplicate_display_names() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let a = store.save("123456", "a.txt", b"12345").await.unwrap();
        let b = store.save("123456", "a.txt", b"1234567").await.unwrap();

        let bytes = store
            .zip_all(vec![
                (a.stored_name, "a.txt".to_string()),
                (b.stored_name, "a.txt".to_string()),
            ])
            .await
            .unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut sizes = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i).unwrap();
            assert_eq!(entry.name(), "a.txt");
            sizes.push(entry.size());
        }
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 7]);
    }

    #[tokio::test]
    async fn test_zip_all_skips_missing_files() {
        let (_dir, store) = store();
        store.init().await.unwrap();

        let a = store.save("123456", "real.txt", b"real").await.unwrap();
        let bytes = store
            .zip_all(vec![
                (a.stored_name, "real.txt".to_string()),
                ("123456_0_0000_ghost.txt".to_string(), "ghost.txt".to_string()),
            ])
            .await
            .unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
    }
}
