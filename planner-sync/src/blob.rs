//! Blob storage for PDF attachments.
//!
//! Uploads land under `rooms/<room>/pdfs/<id>/<sanitized name>`; the
//! document only ever stores the returned URL and storage path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use planner_core::calendar::now_iso;
use planner_core::model::{PdfAttachment, DEFAULT_PDF_MIME};
use planner_core::pdf_total::extract_requested_total;

use crate::protocol::RoomId;

/// Location of an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub id: String,
    /// Directly fetchable URL
    pub url: String,
    pub storage_path: String,
}

/// Blob errors.
#[derive(Debug, Clone)]
pub enum BlobError {
    /// No blob backend configured
    Unavailable(String),
    Io(String),
    InvalidPath(String),
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Blob storage unavailable: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidPath(e) => write!(f, "Invalid blob path: {e}"),
        }
    }
}

impl std::error::Error for BlobError {}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        BlobError::Io(e.to_string())
    }
}

pub trait BlobStore: Send + Sync {
    fn upload(
        &self,
        room: &RoomId,
        file_name: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<UploadedBlob, BlobError>> + Send;
}

/// Replace runs of characters outside `[A-Za-z0-9_.\-() ]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-() ]+").expect("static pattern"));
    re.replace_all(name, "_").into_owned()
}

pub fn storage_path(room: &RoomId, id: &str, file_name: &str) -> String {
    format!("rooms/{room}/pdfs/{id}/{}", sanitize_file_name(file_name))
}

/// Blobs as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    /// Public prefix for URLs; `file://` URLs when unset
    base_url: Option<url::Url>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: None,
        }
    }

    /// Serve URLs as `base_url` joined with the storage path.
    pub fn with_base_url(root: impl Into<PathBuf>, base_url: &str) -> Result<Self, BlobError> {
        let mut base = url::Url::parse(base_url)
            .map_err(|e| BlobError::InvalidPath(format!("{base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            root: root.into(),
            base_url: Some(base),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, storage_path: &str, file: &Path) -> Result<String, BlobError> {
        let url = match &self.base_url {
            Some(base) => base
                .join(storage_path)
                .map_err(|e| BlobError::InvalidPath(e.to_string()))?,
            None => url::Url::from_file_path(file)
                .map_err(|_| BlobError::InvalidPath(file.display().to_string()))?,
        };
        Ok(url.to_string())
    }
}

impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        room: &RoomId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadedBlob, BlobError> {
        let id = Uuid::new_v4().to_string();
        let storage_path = storage_path(room, &id, file_name);
        let file = self.root.join(&storage_path);

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, bytes).await?;
        let file = tokio::fs::canonicalize(&file).await?;

        let url = self.url_for(&storage_path, &file)?;
        log::info!("Stored {} byte(s) at {storage_path}", bytes.len());
        Ok(UploadedBlob {
            id,
            url,
            storage_path,
        })
    }
}

/// Backend for deployments without blob storage: every upload is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBlobStore;

impl BlobStore for UnavailableBlobStore {
    async fn upload(
        &self,
        _room: &RoomId,
        _file_name: &str,
        _bytes: &[u8],
    ) -> Result<UploadedBlob, BlobError> {
        Err(BlobError::Unavailable(
            "blob storage is not configured for this deployment".into(),
        ))
    }
}

/// Build the PDF wall entry for an uploaded file.
///
/// The title is the file name without its `.pdf` suffix. When extracted
/// text is available the requested total is parsed from it.
pub fn attach_pdf(
    blob: UploadedBlob,
    file_name: &str,
    mime: Option<&str>,
    extracted_text: Option<&str>,
) -> PdfAttachment {
    static PDF_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let suffix = PDF_SUFFIX.get_or_init(|| Regex::new(r"(?i)\.pdf$").expect("static pattern"));

    PdfAttachment {
        id: blob.id,
        title: suffix.replace(file_name, "").into_owned(),
        file_name: file_name.to_string(),
        mime: Some(
            mime.filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_PDF_MIME)
                .to_string(),
        ),
        url: blob.url,
        storage_path: blob.storage_path,
        extracted_total: extracted_text.and_then(extract_requested_total),
        manual_total: None,
        added_at_iso: now_iso(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Budget (v2).pdf"), "Budget (v2).pdf");
        assert_eq!(sanitize_file_name("a/b\\c?.pdf"), "a_b_c_.pdf");
        assert_eq!(sanitize_file_name("café#&menu.pdf"), "caf_menu.pdf");
    }

    #[test]
    fn test_storage_path_layout() {
        let path = storage_path(&RoomId::new("SGA"), "abc", "Flyer #1.pdf");
        assert_eq!(path, "rooms/SGA/pdfs/abc/Flyer _1.pdf");
    }

    #[tokio::test]
    async fn test_fs_upload_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let blob = store
            .upload(&RoomId::default(), "Panther Games.pdf", b"%PDF-1.4")
            .await
            .unwrap();

        assert!(blob.storage_path.starts_with("rooms/default/pdfs/"));
        assert!(blob.storage_path.ends_with("/Panther Games.pdf"));
        assert!(blob.url.starts_with("file://"));
        let stored = std::fs::read(dir.path().join(&blob.storage_path)).unwrap();
        assert_eq!(stored, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_fs_upload_with_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::with_base_url(dir.path(), "https://files.example.org/blobs").unwrap();

        let blob = store
            .upload(&RoomId::new("SGA"), "menu.pdf", b"x")
            .await
            .unwrap();
        assert!(blob.url.starts_with("https://files.example.org/blobs/rooms/SGA/pdfs/"));
        assert!(blob.url.ends_with("/menu.pdf"));
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects() {
        let result = UnavailableBlobStore
            .upload(&RoomId::default(), "a.pdf", b"x")
            .await;
        assert!(matches!(result, Err(BlobError::Unavailable(_))));
    }

    #[test]
    fn test_attach_pdf() {
        let blob = UploadedBlob {
            id: "blob-1".into(),
            url: "https://files.example.org/x.pdf".into(),
            storage_path: "rooms/default/pdfs/blob-1/Gala.PDF".into(),
        };
        let pdf = attach_pdf(blob, "Gala.PDF", None, Some("Total Requested Amount $2,400.00"));

        assert_eq!(pdf.id, "blob-1");
        assert_eq!(pdf.title, "Gala");
        assert_eq!(pdf.mime.as_deref(), Some(DEFAULT_PDF_MIME));
        assert_eq!(pdf.extracted_total, Some(2400.0));
        assert_eq!(pdf.display_total(), 2400.0);
    }
}
