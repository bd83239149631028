//! Filesystem-rooted blob store for dev/tests.
//!
//! Cannot mint signed URLs, so downloads fall back to direct bytes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{sanitize_object_name, BlobError, BlobStore, RESULT_OBJECT_NAME};

pub struct LocalFsBlobStore {
    root: PathBuf,
    input_prefix: String,
    output_prefix: String,
}

impl LocalFsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        input_prefix: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            input_prefix: input_prefix.into(),
            output_prefix: output_prefix.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    fn io_err(e: std::io::Error) -> BlobError {
        BlobError::Io(e.to_string())
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    fn enabled(&self) -> bool {
        true
    }

    fn input_key(&self, job_id: &str, which: &str, original_name: &str) -> String {
        let name = sanitize_object_name(original_name);
        format!("{}/{}/{}_{}", self.input_prefix, job_id.trim(), which, name)
    }

    fn result_key(&self, job_id: &str) -> String {
        format!("{}/{}/{}", self.output_prefix, job_id.trim(), RESULT_OBJECT_NAME)
    }

    async fn put_file(
        &self,
        key: &str,
        local_path: &Path,
        _content_type: &str,
    ) -> Result<(), BlobError> {
        let dst = self.object_path(key);
        if let Some(dir) = dst.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(Self::io_err)?;
        }
        tokio::fs::copy(local_path, &dst)
            .await
            .map_err(Self::io_err)?;
        Ok(())
    }

    async fn get_to_file(&self, key: &str, local_path: &Path) -> Result<(), BlobError> {
        let src = self.object_path(key);
        if !src.exists() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        if let Some(dir) = local_path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(Self::io_err)?;
        }
        tokio::fs::copy(&src, local_path)
            .await
            .map_err(Self::io_err)?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let src = self.object_path(key);
        if !src.exists() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        tokio::fs::read(&src).await.map_err(Self::io_err)
    }

    async fn sign_download_url(
        &self,
        _key: &str,
        _download_filename: &str,
    ) -> Result<Option<String>, BlobError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path(), "compare-inputs", "compare-results");

        let src = dir.path().join("src.bin");
        tokio::fs::write(&src, b"payload").await.unwrap();

        let key = store.input_key("job_1", "file1", "../a b.xlsx");
        assert_eq!(key, "compare-inputs/job_1/file1_a b.xlsx");
        store
            .put_file(&key, &src, "application/octet-stream")
            .await
            .unwrap();

        let out = dir.path().join("out.bin");
        store.get_to_file(&key, &out).await.unwrap();
        assert_eq!(tokio::fs::read(&out).await.unwrap(), b"payload");
        assert_eq!(store.read(&key).await.unwrap(), b"payload");

        assert!(matches!(
            store.read("compare-inputs/missing").await,
            Err(BlobError::NotFound(_))
        ));
        assert!(store
            .sign_download_url(&key, "比对结果.xlsx")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn result_key_layout() {
        let store = LocalFsBlobStore::new("/tmp/x", "in", "out");
        assert_eq!(store.result_key("job_9"), "out/job_9/compare.xlsx");
    }
}
