//! Blob storage contract.
//!
//! The object-store SDK is an external collaborator; the pipeline only
//! depends on this trait. Key layout: inputs at
//! `<inputPrefix>/<jobId>/{file1|file2}_<name>`, artifacts at
//! `<outputPrefix>/<jobId>/compare.xlsx`.

mod local;

pub use local::LocalFsBlobStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub const RESULT_OBJECT_NAME: &str = "compare.xlsx";

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob store not enabled")]
    Disabled,

    #[error("blob object not found: {0}")]
    NotFound(String),

    #[error("blob io error: {0}")]
    Io(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    fn enabled(&self) -> bool;

    /// `<inputPrefix>/<jobId>/<which>_<sanitized-name>`
    fn input_key(&self, job_id: &str, which: &str, original_name: &str) -> String;

    /// `<outputPrefix>/<jobId>/compare.xlsx`
    fn result_key(&self, job_id: &str) -> String;

    async fn put_file(
        &self,
        key: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), BlobError>;

    async fn get_to_file(&self, key: &str, local_path: &Path) -> Result<(), BlobError>;

    /// Whole-object read for the direct-download fallback.
    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Short-lived signed URL carrying a `Content-Disposition` for
    /// `download_filename`. `Ok(None)` when the backend cannot sign; callers
    /// fall back to serving the bytes directly.
    async fn sign_download_url(
        &self,
        key: &str,
        download_filename: &str,
    ) -> Result<Option<String>, BlobError>;
}

#[async_trait]
impl<B> BlobStore for Arc<B>
where
    B: BlobStore + ?Sized,
{
    fn enabled(&self) -> bool {
        (**self).enabled()
    }

    fn input_key(&self, job_id: &str, which: &str, original_name: &str) -> String {
        (**self).input_key(job_id, which, original_name)
    }

    fn result_key(&self, job_id: &str) -> String {
        (**self).result_key(job_id)
    }

    async fn put_file(
        &self,
        key: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), BlobError> {
        (**self).put_file(key, local_path, content_type).await
    }

    async fn get_to_file(&self, key: &str, local_path: &Path) -> Result<(), BlobError> {
        (**self).get_to_file(key, local_path).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        (**self).read(key).await
    }

    async fn sign_download_url(
        &self,
        key: &str,
        download_filename: &str,
    ) -> Result<Option<String>, BlobError> {
        (**self).sign_download_url(key, download_filename).await
    }
}

/// Strip path components from an upload name; empty names fall back to
/// `upload`.
pub fn sanitize_object_name(original_name: &str) -> String {
    let name = original_name.trim().replace('\\', "/");
    let base = name.rsplit('/').next().unwrap_or("").trim();
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

/// Spreadsheet content type by extension.
pub fn spreadsheet_content_type(name: &str) -> &'static str {
    let lower = name.trim().to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "xls" => "application/vnd.ms-excel",
        "xlsx" | "xlsm" | "xltx" | "xltm" => {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        }
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_sanitized() {
        assert_eq!(sanitize_object_name("a.xlsx"), "a.xlsx");
        assert_eq!(sanitize_object_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_object_name("dir\\evil.xlsx"), "evil.xlsx");
        assert_eq!(sanitize_object_name("  "), "upload");
    }

    #[test]
    fn content_types_match_extensions() {
        assert_eq!(spreadsheet_content_type("a.xls"), "application/vnd.ms-excel");
        assert_eq!(
            spreadsheet_content_type("A.XLSX"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(spreadsheet_content_type("a.bin"), "application/octet-stream");
    }
}
