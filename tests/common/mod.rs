#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use course_downloader::common::models::{BlockKind, CourseBlock, EncodedVideos, VideoEncoding};
use course_downloader::config::DownloaderConfig;
use course_downloader::downloader::{
    DownloadError, DownloadEvent, DownloadManager, DownloadState, DownloadTask, TransferClient,
    TransferError, TransferHandle, TransferOutcome, TransferUpdate, UpdateSender,
};
use course_downloader::network::{LifecycleSignals, SharedConnectivity};
use course_downloader::store::{MemoryTaskStore, StoreError, TaskStore};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(String),
    Resume(Vec<u8>),
    Cancel(u64),
    Suspend(u64),
}

struct FakeTransfer {
    source: String,
    destination: PathBuf,
    updates: UpdateSender,
}

/// 由测试手动推进的传输客户端
#[derive(Default)]
pub struct FakeClient {
    next_id: AtomicU64,
    transfers: Mutex<HashMap<u64, FakeTransfer>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeClient {
    pub fn resume_token(source: &str) -> Vec<u8> {
        format!("resume:{}", source).into_bytes()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Start(_) | Call::Resume(_)))
            .count()
    }

    pub fn active(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.transfers.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn last_handle(&self) -> u64 {
        *self.active().last().expect("没有正在进行的传输")
    }

    pub fn progress(&self, id: u64, fraction: f64) {
        let transfers = self.transfers.lock().unwrap();
        let transfer = transfers.get(&id).expect("传输不存在");
        transfer
            .updates
            .send(TransferUpdate::Progress(fraction))
            .unwrap();
    }

    // 写出文件后报告完成
    pub fn complete(&self, id: u64) {
        let transfer = self.transfers.lock().unwrap().remove(&id).expect("传输不存在");
        std::fs::create_dir_all(transfer.destination.parent().unwrap()).unwrap();
        std::fs::write(&transfer.destination, b"video bytes").unwrap();
        transfer
            .updates
            .send(TransferUpdate::Finished(TransferOutcome::Completed))
            .unwrap();
    }

    pub fn fail(&self, id: u64, error: TransferError) {
        let transfer = self.transfers.lock().unwrap().remove(&id).expect("传输不存在");
        let resume_data = error
            .is_connectivity()
            .then(|| Self::resume_token(&transfer.source));
        transfer
            .updates
            .send(TransferUpdate::Finished(TransferOutcome::Failed { error, resume_data }))
            .unwrap();
    }

    fn register(&self, source: String, destination: PathBuf, updates: UpdateSender) -> TransferHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.transfers.lock().unwrap().insert(
            id,
            FakeTransfer {
                source,
                destination,
                updates,
            },
        );
        TransferHandle { id }
    }

    fn interrupt(&self, id: u64) -> Option<FakeTransfer> {
        let transfer = self.transfers.lock().unwrap().remove(&id)?;
        let _ = transfer
            .updates
            .send(TransferUpdate::Finished(TransferOutcome::Interrupted));
        Some(transfer)
    }
}

#[async_trait]
impl TransferClient for FakeClient {
    async fn start(
        &self,
        url: &str,
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError> {
        self.calls.lock().unwrap().push(Call::Start(url.to_string()));
        Ok(self.register(url.to_string(), destination, updates))
    }

    async fn resume(
        &self,
        resume_data: &[u8],
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError> {
        self.calls.lock().unwrap().push(Call::Resume(resume_data.to_vec()));
        let source = String::from_utf8_lossy(resume_data)
            .trim_start_matches("resume:")
            .to_string();
        Ok(self.register(source, destination, updates))
    }

    async fn cancel(&self, handle: &TransferHandle) {
        self.calls.lock().unwrap().push(Call::Cancel(handle.id));
        self.interrupt(handle.id);
    }

    async fn suspend(&self, handle: &TransferHandle) -> Option<Vec<u8>> {
        self.calls.lock().unwrap().push(Call::Suspend(handle.id));
        self.interrupt(handle.id)
            .map(|transfer| Self::resume_token(&transfer.source))
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: DownloaderConfig,
    pub store: Arc<MemoryTaskStore>,
    pub client: Arc<FakeClient>,
    pub connectivity: Arc<SharedConnectivity>,
    pub lifecycle: LifecycleSignals,
    pub manager: DownloadManager,
}

pub fn test_config(dir: &tempfile::TempDir) -> DownloaderConfig {
    DownloaderConfig {
        root_dir: dir.path().to_path_buf(),
        user_id: "alice".to_string(),
        wifi_only: true,
        max_attempts: 2,
        ..DownloaderConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(MemoryTaskStore::new()), false).await
}

pub async fn harness_with(store: Arc<MemoryTaskStore>, metered: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let client = Arc::new(FakeClient::default());
    let connectivity = Arc::new(SharedConnectivity::new(true, metered));
    let lifecycle = LifecycleSignals::new();
    let manager = DownloadManager::new(
        &config,
        store.clone(),
        client.clone(),
        connectivity.clone(),
        &lifecycle,
    )
    .await;

    Harness {
        dir,
        config,
        store,
        client,
        connectivity,
        lifecycle,
        manager,
    }
}

/// 可以让状态写入失败的存储
pub struct FailingStore {
    inner: Arc<MemoryTaskStore>,
    in_progress: AtomicBool,
    finished: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryTaskStore>) -> Self {
        Self {
            inner,
            in_progress: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn fail_in_progress(&self, fail: bool) {
        self.in_progress.store(fail, Ordering::SeqCst);
    }

    pub fn fail_finished(&self, fail: bool) {
        self.finished.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for FailingStore {
    async fn set_active_user(&self, user_id: &str) {
        self.inner.set_active_user(user_id).await
    }

    async fn all_tasks(&self, user_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        self.inner.all_tasks(user_id).await
    }

    async fn tasks_for_course(&self, course_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        self.inner.tasks_for_course(course_id).await
    }

    async fn task_for_block(&self, block_id: &str) -> Result<Option<DownloadTask>, StoreError> {
        self.inner.task_for_block(block_id).await
    }

    async fn upsert_tasks(&self, tasks: &[DownloadTask]) -> Result<(), StoreError> {
        self.inner.upsert_tasks(tasks).await
    }

    async fn update_state(
        &self,
        id: &str,
        state: DownloadState,
        resume_data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let fail = match state {
            DownloadState::InProgress => self.in_progress.load(Ordering::SeqCst),
            DownloadState::Finished => self.finished.load(Ordering::SeqCst),
            DownloadState::Waiting => false,
        };
        if fail {
            return Err(StoreError::Io(std::io::Error::other("磁盘已满")));
        }
        self.inner.update_state(id, state, resume_data).await
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), StoreError> {
        self.inner.delete_tasks(ids).await
    }
}

pub struct FailingHarness {
    pub dir: tempfile::TempDir,
    pub store: Arc<MemoryTaskStore>,
    pub failures: Arc<FailingStore>,
    pub client: Arc<FakeClient>,
    pub lifecycle: LifecycleSignals,
    pub manager: DownloadManager,
}

pub async fn failing_harness() -> FailingHarness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(MemoryTaskStore::new());
    let failures = Arc::new(FailingStore::new(store.clone()));
    let client = Arc::new(FakeClient::default());
    let connectivity = Arc::new(SharedConnectivity::new(true, false));
    let lifecycle = LifecycleSignals::new();
    let manager = DownloadManager::new(
        &config,
        failures.clone(),
        client.clone(),
        connectivity,
        &lifecycle,
    )
    .await;

    FailingHarness {
        dir,
        store,
        failures,
        client,
        lifecycle,
        manager,
    }
}

pub const MIB: u64 = 1024 * 1024;

pub fn video_block(course_id: &str, id: &str, size: u64) -> CourseBlock {
    CourseBlock {
        id: id.to_string(),
        course_id: course_id.to_string(),
        display_name: format!("视频 {}", id),
        kind: BlockKind::Video,
        encoded_videos: EncodedVideos {
            mobile_high: Some(VideoEncoding {
                url: format!("https://cdn.example.com/{}/{}.mp4", course_id, id),
                file_size: Some(size),
            }),
            ..EncodedVideos::default()
        },
    }
}

pub fn blocks(course_id: &str, ids: &[&str]) -> Vec<CourseBlock> {
    ids.iter().map(|id| video_block(course_id, id, 10 * MIB)).collect()
}

pub fn drain(rx: &mut broadcast::Receiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn wait_for<F>(rx: &mut broadcast::Receiver<DownloadEvent>, mut predicate: F) -> DownloadEvent
where
    F: FnMut(&DownloadEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("事件流中断: {:?}", e),
            }
        }
    })
    .await
    .expect("等待事件超时")
}
