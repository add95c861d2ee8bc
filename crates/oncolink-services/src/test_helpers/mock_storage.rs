//! In-memory storage with call recording and failure injection.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use oncolink_core::ByteReader;
use oncolink_storage::{Storage, StorageBackend, StorageError, StorageResult};
use tokio::io::AsyncReadExt;

#[derive(Default)]
pub struct MockStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    saves: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
    stalled_deletes: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn save_calls(&self) -> Vec<String> {
        self.saves.lock().unwrap().clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Number of `delete` calls for one path.
    pub fn deletes_of(&self, path: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// The next `count` deletes record the call and then never complete.
    pub fn stall_deletes(&self, count: usize) {
        self.stalled_deletes.store(count, Ordering::SeqCst);
    }

    /// Flip one byte of a stored object.
    pub fn corrupt(&self, path: &str, offset: usize) {
        if let Some(data) = self.objects.lock().unwrap().get_mut(path) {
            data[offset] ^= 0x01;
        }
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn save(&self, key: &str, _content_type: &str, mut reader: ByteReader) -> StorageResult<String> {
        self.saves.lock().unwrap().push(key.to_string());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected save failure".to_string()));
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.put(key, data);
        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> StorageResult<ByteReader> {
        let data = self
            .object(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.deletes.lock().unwrap().push(path.to_string());
        let stalled = self
            .stalled_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed("injected delete failure".to_string()));
        }
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.contains(path))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
