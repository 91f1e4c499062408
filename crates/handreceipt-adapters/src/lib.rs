//! Capability-trait adapters for HandReceipt's external collaborators:
//! blob storage for photos/generated documents, and the OCR/AI pipeline
//! for scanning paper hand-receipt forms. Both are out of core scope per
//! spec §1 — the core depends only on the trait, never a concrete
//! provider SDK.

#![deny(unsafe_code)]

use async_trait::async_trait;
use handreceipt_core::error::HandReceiptError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;

/// `UploadFile`/`DownloadFile`/`GetPresignedUrl`/`ListFiles`, exactly the
/// surface spec §9's "dynamic dispatch" note allows the core to depend on.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn upload_file(&self, key: &str, bytes: Vec<u8>) -> Result<(), HandReceiptError>;
    async fn download_file(&self, key: &str) -> Result<Vec<u8>, HandReceiptError>;
    async fn get_presigned_url(&self, key: &str) -> Result<String, HandReceiptError>;
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, HandReceiptError>;
}

/// Local-filesystem storage backend for self-hosted deployments and local
/// development — no vendor blob SDK is vendored here, per spec §1.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, HandReceiptError> {
        if key.contains("..") {
            return Err(HandReceiptError::InvalidInput(
                "storage key must not contain '..'".to_string(),
            ));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageService for LocalFileStorage {
    async fn upload_file(&self, key: &str, bytes: Vec<u8>) -> Result<(), HandReceiptError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HandReceiptError::DatabaseUnavailable(format!("storage io: {e}")))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| HandReceiptError::DatabaseUnavailable(format!("storage io: {e}")))
    }

    async fn download_file(&self, key: &str) -> Result<Vec<u8>, HandReceiptError> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .map_err(|_| HandReceiptError::PropertyNotFound(format!("no such file: {key}")))
    }

    async fn get_presigned_url(&self, key: &str) -> Result<String, HandReceiptError> {
        let path = self.resolve(key)?;
        Ok(format!("file://{}", path.display()))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, HandReceiptError> {
        let dir = self.resolve(prefix).unwrap_or_else(|_| self.root.clone());
        let mut entries = Vec::new();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(_) => return Ok(entries),
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }
}

/// In-memory, no-op storage for tests and CI, mirroring the grounding
/// project's deterministic mock-connector pattern.
#[derive(Default)]
pub struct NoOpStorage {
    files: tokio::sync::Mutex<BTreeMap<String, Vec<u8>>>,
}

#[async_trait]
impl StorageService for NoOpStorage {
    async fn upload_file(&self, key: &str, bytes: Vec<u8>) -> Result<(), HandReceiptError> {
        self.files.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download_file(&self, key: &str) -> Result<Vec<u8>, HandReceiptError> {
        self.files
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| HandReceiptError::PropertyNotFound(format!("no such file: {key}")))
    }

    async fn get_presigned_url(&self, key: &str) -> Result<String, HandReceiptError> {
        Ok(format!("memory://{key}"))
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, HandReceiptError> {
        Ok(self
            .files
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Result of an OCR pass over a scanned paper hand-receipt form.
#[derive(Debug, Clone)]
pub struct OcrResult {
    pub extracted_text: String,
    pub confidence: f32,
}

/// The OCR/AI pipeline is an external collaborator (spec §1); this core
/// depends only on this trait.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn scan(&self, image_bytes: &[u8]) -> Result<OcrResult, HandReceiptError>;
}

/// Always reports "not configured" — the real pipeline is wired in by the
/// deployment, never vendored into this workspace.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredOcrService;

#[async_trait]
impl OcrService for UnconfiguredOcrService {
    async fn scan(&self, _image_bytes: &[u8]) -> Result<OcrResult, HandReceiptError> {
        Err(HandReceiptError::InvalidInput(
            "OCR pipeline is not configured for this deployment".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_storage_round_trips() {
        let storage = NoOpStorage::default();
        storage.upload_file("docs/a.png", vec![1, 2, 3]).await.unwrap();
        let bytes = storage.download_file("docs/a.png").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        let listed = storage.list_files("docs/").await.unwrap();
        assert_eq!(listed, vec!["docs/a.png".to_string()]);
    }

    #[tokio::test]
    async fn local_storage_rejects_path_traversal() {
        let dir = std::env::temp_dir().join("handreceipt-adapters-test");
        let storage = LocalFileStorage::new(&dir);
        let err = storage.upload_file("../escape", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[tokio::test]
    async fn unconfigured_ocr_always_fails() {
        let ocr = UnconfiguredOcrService;
        let err = ocr.scan(&[]).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
