use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use indexmap::IndexMap;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::events::DownloadEvent;
use super::storage::VideoStorage;
use super::task::{DownloadState, DownloadTask};
use super::transfer::{TransferClient, TransferHandle, TransferOutcome, TransferUpdate};
use crate::common::models::{CourseBlock, VideoQuality};
use crate::common::utils::BYTES_PER_GB;
use crate::config::DownloaderConfig;
use crate::network::{ConnectivityMonitor, LifecycleEvent, LifecycleSource, Reachability};
use crate::store::TaskStore;

// 超过这个总大小时调用方应先向用户确认
pub const LARGE_DOWNLOAD_THRESHOLD: u64 = BYTES_PER_GB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Downloading,
    Paused, // 断网或进入后台
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadSettings {
    pub wifi_only: bool,
    pub video_quality: VideoQuality,
}

struct ActiveTransfer {
    task_id: String,
    handle: TransferHandle,
}

// 队列、状态和当前传输共用一把锁
struct QueueState {
    user_id: String,
    queue: IndexMap<String, DownloadTask>,
    state: ManagerState,
    current: Option<ActiveTransfer>,
    hydrated: bool,
    failures: HashMap<String, u32>, // 非网络原因的连续失败次数
}

impl QueueState {
    fn is_current(&self, handle: &TransferHandle) -> bool {
        self.current.as_ref().is_some_and(|active| &active.handle == handle)
    }
}

struct ManagerInner {
    self_ref: Weak<ManagerInner>,
    queue: Mutex<QueueState>,
    store: Arc<dyn TaskStore>,
    client: Arc<dyn TransferClient>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    storage: VideoStorage,
    settings: RwLock<DownloadSettings>,
    max_attempts: u32,
    events: broadcast::Sender<DownloadEvent>,
    queue_len: watch::Sender<usize>,
    subscriptions: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// 后台下载管理器
///
/// 同一时刻最多只有一个传输在进行。所有公开操作都可以并发调用，
/// 它们对队列和状态的修改在同一把锁内完成。
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    pub async fn new(
        config: &DownloaderConfig,
        store: Arc<dyn TaskStore>,
        client: Arc<dyn TransferClient>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        lifecycle: &dyn LifecycleSource,
    ) -> Self {
        store.set_active_user(&config.user_id).await;

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (queue_len, _) = watch::channel(0);
        let reachability = connectivity.subscribe();
        let lifecycle_rx = lifecycle.subscribe();

        let inner = Arc::new_cyclic(|weak| ManagerInner {
            self_ref: weak.clone(),
            queue: Mutex::new(QueueState {
                user_id: config.user_id.clone(),
                queue: IndexMap::new(),
                state: ManagerState::Idle,
                current: None,
                hydrated: false,
                failures: HashMap::new(),
            }),
            store,
            client,
            connectivity,
            storage: VideoStorage::new(&config.root_dir),
            settings: RwLock::new(DownloadSettings {
                wifi_only: config.wifi_only,
                video_quality: config.video_quality,
            }),
            max_attempts: config.max_attempts.max(1),
            events,
            queue_len,
            subscriptions: std::sync::Mutex::new(Vec::new()),
        });

        let handles = vec![
            spawn_reachability_listener(Arc::downgrade(&inner), reachability),
            spawn_lifecycle_listener(Arc::downgrade(&inner), lifecycle_rx),
        ];
        if let Ok(mut subscriptions) = inner.subscriptions.lock() {
            subscriptions.extend(handles);
        }

        info!("下载管理器已启动, 用户: {}", config.user_id);
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.events.subscribe()
    }

    // 队列长度变化通知
    pub fn queue_len(&self) -> watch::Receiver<usize> {
        self.inner.queue_len.subscribe()
    }

    pub async fn state(&self) -> ManagerState {
        self.inner.queue.lock().await.state
    }

    pub fn settings(&self) -> DownloadSettings {
        self.inner.settings()
    }

    pub fn set_wifi_only(&self, wifi_only: bool) {
        self.inner.update_settings(|s| s.wifi_only = wifi_only);
    }

    pub fn set_video_quality(&self, quality: VideoQuality) {
        self.inner.update_settings(|s| s.video_quality = quality);
    }

    pub fn storage(&self) -> &VideoStorage {
        &self.inner.storage
    }

    // 当前网络是否允许下载
    pub fn user_can_download(&self) -> bool {
        self.inner.user_can_download()
    }

    pub async fn enqueue(&self, blocks: &[CourseBlock]) -> Result<(), DownloadError> {
        self.inner.enqueue(blocks).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<DownloadTask>, DownloadError> {
        let mut st = self.inner.queue.lock().await;
        self.inner.ensure_hydrated(&mut st).await?;
        Ok(st.queue.values().cloned().collect())
    }

    pub async fn list_tasks_for_course(
        &self,
        course_id: &str,
    ) -> Result<Vec<DownloadTask>, DownloadError> {
        let mut st = self.inner.queue.lock().await;
        self.inner.ensure_hydrated(&mut st).await?;
        Ok(st
            .queue
            .values()
            .filter(|t| t.course_id == course_id)
            .cloned()
            .collect())
    }

    pub async fn cancel(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let removed = inner.remove_tasks(&mut st, &[task.id.clone()]).await?;
        info!("已取消任务: {}", task.display_name);
        inner.emit(DownloadEvent::Canceled(removed));
        inner.advance_quietly(&mut st).await;
        Ok(())
    }

    // 取消某课程中指定的内容块
    pub async fn cancel_for_course_blocks(
        &self,
        course_id: &str,
        blocks: &[CourseBlock],
    ) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let ids: Vec<String> = st
            .queue
            .values()
            .filter(|t| t.course_id == course_id && blocks.iter().any(|b| b.id == t.block_id))
            .map(|t| t.id.clone())
            .collect();
        let removed = inner.remove_tasks(&mut st, &ids).await?;
        let block_ids: Vec<String> = removed.iter().map(|t| t.block_id.clone()).collect();
        info!("课程 {} 取消了 {} 个任务", course_id, block_ids.len());
        inner.emit(DownloadEvent::DeletedFile(block_ids));
        inner.advance_quietly(&mut st).await;
        Ok(())
    }

    // 移除某课程的全部任务，包括已完成的文件
    pub async fn cancel_for_course(&self, course_id: &str) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let ids: Vec<String> = st
            .queue
            .values()
            .filter(|t| t.course_id == course_id)
            .map(|t| t.id.clone())
            .collect();
        let removed = inner.remove_tasks(&mut st, &ids).await?;
        info!("课程 {} 取消了 {} 个任务", course_id, removed.len());
        inner.emit(DownloadEvent::CourseCanceled(course_id.to_string()));
        inner.advance_quietly(&mut st).await;
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let ids: Vec<String> = st
            .queue
            .values()
            .filter(|t| !t.is_finished())
            .map(|t| t.id.clone())
            .collect();
        let removed = inner.remove_tasks(&mut st, &ids).await?;
        info!("已取消全部 {} 个未完成任务", removed.len());
        inner.emit(DownloadEvent::AllCanceled);
        inner.advance_quietly(&mut st).await;
        Ok(())
    }

    // 删除已下载或排队中的内容
    pub async fn delete(&self, blocks: &[CourseBlock], course_id: &str) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let ids: Vec<String> = st
            .queue
            .values()
            .filter(|t| t.course_id == course_id && blocks.iter().any(|b| b.id == t.block_id))
            .map(|t| t.id.clone())
            .collect();
        let removed = inner.remove_tasks(&mut st, &ids).await?;
        let block_ids: Vec<String> = removed.iter().map(|t| t.block_id.clone()).collect();
        info!("已删除 {} 个文件", block_ids.len());
        inner.emit(DownloadEvent::DeletedFile(block_ids));
        inner.advance_quietly(&mut st).await;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        inner.ensure_hydrated(&mut st).await?;

        let ids: Vec<String> = st.queue.keys().cloned().collect();
        let removed = inner.remove_tasks(&mut st, &ids).await?;
        info!("已清空全部 {} 个任务", removed.len());
        inner.emit(DownloadEvent::ClearedAll);
        Ok(())
    }

    pub async fn resume_downloading(&self) -> Result<(), DownloadError> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        if matches!(st.state, ManagerState::Downloading | ManagerState::Paused) {
            debug!("当前状态 {:?}，忽略恢复请求", st.state);
            return Ok(());
        }
        if !inner.connectivity.is_internet_available() {
            debug!("网络不可用，忽略恢复请求");
            return Ok(());
        }

        // 用户主动重试，重新计算失败次数
        st.failures.clear();
        inner.ensure_hydrated(&mut st).await?;
        inner.new_download(&mut st).await
    }

    // 只有已完成的任务才返回本地文件路径
    pub async fn file_url(&self, block_id: &str) -> Option<std::path::PathBuf> {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        if let Err(e) = inner.ensure_hydrated(&mut st).await {
            error!("加载下载记录失败: {}", e);
            return None;
        }
        st.queue
            .values()
            .find(|t| t.block_id == block_id && t.is_finished())
            .map(|t| inner.storage.file_path(t))
    }

    pub fn is_large_videos_size(&self, blocks: &[CourseBlock]) -> bool {
        let quality = self.inner.settings().video_quality;
        let total: u64 = blocks.iter().map(|b| b.projected_size(quality)).sum();
        debug!("预计下载大小: {} 字节", total);
        total > LARGE_DOWNLOAD_THRESHOLD
    }

    pub async fn remove_app_support_directory_unused_content(&self) -> usize {
        self.inner.storage.remove_unused_content().await
    }

    // 断网或进入后台时挂起所有下载
    pub async fn waiting_all(&self) {
        self.inner.waiting_all().await;
    }

    // 切换账号：挂起当前传输，清空内存队列，之后按新用户重新加载
    pub async fn set_active_user(&self, user_id: &str) {
        let inner = &self.inner;
        let mut st = inner.queue.lock().await;
        if st.user_id == user_id {
            return;
        }

        inner.suspend_active(&mut st).await;
        inner.store.set_active_user(user_id).await;
        st.user_id = user_id.to_string();
        st.queue.clear();
        st.failures.clear();
        st.hydrated = false;
        if st.state == ManagerState::Downloading {
            st.state = ManagerState::Idle;
        }
        inner.publish_len(&st);
        info!("已切换到用户: {}", user_id);
        inner.emit(DownloadEvent::Added);
    }

    // 取消信号订阅并挂起当前传输，续传数据会被保存
    pub async fn shutdown(&self) {
        self.inner.abort_subscriptions();
        self.inner.waiting_all().await;
        info!("下载管理器已停止");
    }
}

impl ManagerInner {
    fn emit(&self, event: DownloadEvent) {
        debug!("事件: {}", event.name());
        // 没有订阅者时发送失败
        let _ = self.events.send(event);
    }

    fn publish_len(&self, st: &QueueState) {
        self.queue_len.send_replace(st.queue.len());
    }

    fn settings(&self) -> DownloadSettings {
        match self.settings.read() {
            Ok(settings) => *settings,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update_settings(&self, update: impl FnOnce(&mut DownloadSettings)) {
        let mut settings = match self.settings.write() {
            Ok(settings) => settings,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut *settings);
        debug!("下载设置已更新: {:?}", *settings);
    }

    fn user_can_download(&self) -> bool {
        if !self.connectivity.is_internet_available() {
            return false;
        }
        !(self.settings().wifi_only && self.connectivity.is_metered_connection())
    }

    fn abort_subscriptions(&self) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for handle in subscriptions.drain(..) {
                handle.abort();
            }
        }
    }

    // 首次访问时从存储加载队列
    async fn ensure_hydrated(&self, st: &mut QueueState) -> Result<(), DownloadError> {
        if st.hydrated {
            return Ok(());
        }

        let tasks = self.store.all_tasks(&st.user_id).await?;
        debug!("从存储加载了 {} 个任务", tasks.len());

        let mut recovered = Vec::new();
        for mut task in tasks {
            // 上次进程在传输中退出
            if task.state == DownloadState::InProgress {
                task.state = DownloadState::Waiting;
                recovered.push((task.id.clone(), task.resume_data.clone()));
            }
            st.queue.insert(task.id.clone(), task);
        }
        for (id, resume_data) in recovered {
            warn!("恢复中断的任务: {}", id);
            self.store
                .update_state(&id, DownloadState::Waiting, resume_data)
                .await?;
        }

        st.hydrated = true;
        self.publish_len(st);
        Ok(())
    }

    async fn enqueue(&self, blocks: &[CourseBlock]) -> Result<(), DownloadError> {
        if !self.user_can_download() {
            warn!("当前网络不允许下载，拒绝加入队列");
            return Err(DownloadError::NoNetworkAccess);
        }

        let quality = self.settings().video_quality;
        let mut st = self.queue.lock().await;
        self.ensure_hydrated(&mut st).await?;

        let mut new_tasks: Vec<DownloadTask> = Vec::new();
        for block in blocks {
            let Some(task) = DownloadTask::from_block(block, quality, &st.user_id) else {
                warn!("内容块 {} 在 {} 清晰度下没有可下载的视频源，已跳过", block.id, quality);
                continue;
            };
            if st.queue.contains_key(&task.id) || new_tasks.iter().any(|t| t.id == task.id) {
                debug!("内容块 {} 已在队列中", block.id);
                continue;
            }
            new_tasks.push(task);
        }

        if !new_tasks.is_empty() {
            self.store.upsert_tasks(&new_tasks).await?;
            info!("新增 {} 个下载任务", new_tasks.len());
            for task in new_tasks {
                st.queue.insert(task.id.clone(), task);
            }
            self.publish_len(&st);
            self.emit(DownloadEvent::Added);
        }

        self.new_download(&mut st).await
    }

    // 选出下一个任务并开始下载，调用方必须持有队列锁
    async fn new_download(&self, st: &mut QueueState) -> Result<(), DownloadError> {
        loop {
            if st.state == ManagerState::Paused {
                debug!("管理器已暂停，不启动新下载");
                return Ok(());
            }
            if !self.user_can_download() {
                return Err(DownloadError::NoNetworkAccess);
            }
            if st.current.is_some() {
                return Ok(());
            }

            let next = st
                .queue
                .values()
                .find(|t| {
                    !t.is_finished()
                        && st.failures.get(&t.id).copied().unwrap_or(0) < self.max_attempts
                })
                .map(|t| t.id.clone());

            let Some(task_id) = next else {
                debug!("没有待下载的任务");
                st.current = None;
                st.state = ManagerState::Idle;
                return Ok(());
            };

            if self.start_transfer(st, &task_id).await? {
                return Ok(());
            }
        }
    }

    // 返回 false 表示启动失败，应继续尝试下一个任务
    async fn start_transfer(
        &self,
        st: &mut QueueState,
        task_id: &str,
    ) -> Result<bool, DownloadError> {
        let Some(folder) = self.storage.videos_folder(&st.user_id).await else {
            // 目录不可用，任务保持等待
            st.state = ManagerState::Idle;
            return Ok(true);
        };

        if !st.queue.contains_key(task_id) {
            return Ok(false);
        }
        // 先写存储，失败时内存中的任务仍保持等待并保留续传数据
        if let Err(e) = self
            .store
            .update_state(task_id, DownloadState::InProgress, None)
            .await
        {
            error!("保存任务状态失败，暂不启动下载: {}, 错误: {}", task_id, e);
            st.state = ManagerState::Idle;
            return Err(e.into());
        }

        let Some(task) = st.queue.get_mut(task_id) else {
            return Ok(false);
        };
        task.state = DownloadState::InProgress;
        let resume_data = task.resume_data.take();
        let url = task.url.clone();
        let destination = folder.join(&task.file_name);
        let snapshot = task.clone();
        st.state = ManagerState::Downloading;
        info!("开始下载: {} -> {}", snapshot.display_name, destination.display());
        self.emit(DownloadEvent::Started(snapshot));

        let (tx, rx) = mpsc::unbounded_channel();
        let started = match resume_data {
            Some(data) => match self.client.resume(&data, destination.clone(), tx.clone()).await {
                Ok(handle) => Ok(handle),
                Err(e) => {
                    warn!("续传失败，重新开始下载: {}", e);
                    self.client.start(&url, destination, tx).await
                }
            },
            None => self.client.start(&url, destination, tx).await,
        };

        match started {
            Ok(handle) => {
                st.current = Some(ActiveTransfer {
                    task_id: task_id.to_string(),
                    handle: handle.clone(),
                });
                self.spawn_driver(task_id.to_string(), handle, rx);
                Ok(true)
            }
            Err(e) => {
                error!("启动下载失败: {}, 错误: {}", task_id, e);
                st.state = ManagerState::Idle;
                self.record_failure(st, task_id, e.to_string()).await;
                Ok(false)
            }
        }
    }

    // 每个传输一个驱动任务，把客户端的更新串行地应用到队列上
    fn spawn_driver(
        &self,
        task_id: String,
        handle: TransferHandle,
        mut updates: mpsc::UnboundedReceiver<TransferUpdate>,
    ) {
        let weak = self.self_ref.clone();
        tokio::spawn(async move {
            let mut finished = false;
            while let Some(update) = updates.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match update {
                    TransferUpdate::Progress(fraction) => {
                        inner.on_progress(&task_id, &handle, fraction).await;
                    }
                    TransferUpdate::Finished(outcome) => {
                        inner.on_finished(&task_id, &handle, outcome).await;
                        finished = true;
                        break;
                    }
                }
            }

            if !finished {
                if let Some(inner) = weak.upgrade() {
                    let outcome = TransferOutcome::Failed {
                        error: super::error::TransferError::other("传输意外结束"),
                        resume_data: None,
                    };
                    inner.on_finished(&task_id, &handle, outcome).await;
                }
            }
        });
    }

    async fn on_progress(&self, task_id: &str, handle: &TransferHandle, fraction: f64) {
        let mut st = self.queue.lock().await;
        if !st.is_current(handle) {
            return;
        }
        let Some(task) = st.queue.get_mut(task_id) else {
            return;
        };
        // 进度只保存在内存中
        task.progress = fraction.clamp(0.0, 1.0);
        let snapshot = task.clone();
        self.emit(DownloadEvent::Progress {
            fraction: snapshot.progress,
            task: snapshot,
        });
    }

    async fn on_finished(&self, task_id: &str, handle: &TransferHandle, outcome: TransferOutcome) {
        let mut st = self.queue.lock().await;
        if !st.is_current(handle) {
            debug!("忽略已失效传输的结果: {}", task_id);
            return;
        }
        st.current = None;
        st.state = ManagerState::Idle;

        match outcome {
            TransferOutcome::Completed => {
                st.failures.remove(task_id);
                let Some(task) = st.queue.get_mut(task_id) else {
                    return;
                };
                task.state = DownloadState::Finished;
                task.progress = 1.0;
                task.resume_data = None;
                let snapshot = task.clone();
                self.persist_state(task_id, DownloadState::Finished, None).await;
                info!("下载完成: {}", snapshot.display_name);
                self.emit(DownloadEvent::Finished(snapshot));
                self.advance_quietly(&mut st).await;
            }
            TransferOutcome::Failed { error, resume_data }
                if error.is_connectivity() || !self.connectivity.is_internet_available() =>
            {
                let Some(task) = st.queue.get_mut(task_id) else {
                    return;
                };
                task.state = DownloadState::Waiting;
                task.resume_data = resume_data.clone();
                let snapshot = task.clone();
                self.persist_state(task_id, DownloadState::Waiting, resume_data).await;
                warn!("网络中断，下载已暂停: {}, 原因: {}", snapshot.display_name, error);
                self.emit(DownloadEvent::Paused(snapshot));
            }
            TransferOutcome::Failed { error, .. } => {
                error!("下载失败: {}, 错误: {}", task_id, error);
                self.record_failure(&mut st, task_id, error.to_string()).await;
                self.advance_quietly(&mut st).await;
            }
            TransferOutcome::Interrupted => {
                // 不是由管理器发起的中断，按暂停处理
                if let Some(task) = st.queue.get_mut(task_id) {
                    task.state = DownloadState::Waiting;
                    let snapshot = task.clone();
                    self.persist_state(task_id, DownloadState::Waiting, snapshot.resume_data.clone())
                        .await;
                    self.emit(DownloadEvent::Paused(snapshot));
                }
            }
        }
    }

    // 非网络原因失败：回到等待状态，失败次数加一
    async fn record_failure(&self, st: &mut QueueState, task_id: &str, reason: String) {
        let attempts = {
            let counter = st.failures.entry(task_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let Some(task) = st.queue.get_mut(task_id) else {
            return;
        };
        task.state = DownloadState::Waiting;
        task.resume_data = None;
        let snapshot = task.clone();
        self.persist_state(task_id, DownloadState::Waiting, None).await;
        if attempts >= self.max_attempts {
            warn!("任务 {} 已连续失败 {} 次，暂停自动重试", snapshot.display_name, attempts);
        }
        self.emit(DownloadEvent::Failed {
            task: snapshot,
            reason,
        });
    }

    async fn persist_state(&self, task_id: &str, state: DownloadState, resume_data: Option<Vec<u8>>) {
        if let Err(e) = self.store.update_state(task_id, state, resume_data).await {
            error!("保存任务状态失败: {}, 错误: {}", task_id, e);
        }
    }

    async fn advance_quietly(&self, st: &mut QueueState) {
        if let Err(e) = self.new_download(st).await {
            warn!("无法继续下载队列: {}", e);
        }
    }

    // 从队列、存储和磁盘上移除任务；正在下载的任务会被强制取消
    async fn remove_tasks(
        &self,
        st: &mut QueueState,
        ids: &[String],
    ) -> Result<Vec<DownloadTask>, DownloadError> {
        if st
            .current
            .as_ref()
            .is_some_and(|active| ids.contains(&active.task_id))
        {
            if let Some(active) = st.current.take() {
                debug!("强制取消正在进行的传输: {}", active.task_id);
                self.client.cancel(&active.handle).await;
                if st.state == ManagerState::Downloading {
                    st.state = ManagerState::Idle;
                }
            }
        }

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.delete_tasks(ids).await?;

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = st.queue.shift_remove(id) {
                self.storage.remove_file(&task).await;
                st.failures.remove(id);
                removed.push(task);
            }
        }
        self.publish_len(st);
        Ok(removed)
    }

    // 挂起当前传输，把续传数据保存到任务上
    async fn suspend_active(&self, st: &mut QueueState) {
        let Some(active) = st.current.take() else {
            return;
        };
        let resume_data = self.client.suspend(&active.handle).await;
        debug!(
            "已挂起传输: {}, 续传数据: {} 字节",
            active.task_id,
            resume_data.as_ref().map_or(0, |d| d.len())
        );
        if let Some(task) = st.queue.get_mut(&active.task_id) {
            task.state = DownloadState::Waiting;
            task.resume_data = resume_data.clone();
            self.persist_state(&active.task_id, DownloadState::Waiting, resume_data)
                .await;
        }
    }

    async fn waiting_all(&self) {
        let mut st = self.queue.lock().await;
        if st.state == ManagerState::Paused {
            return;
        }

        self.suspend_active(&mut st).await;

        let mut changed = Vec::new();
        for task in st.queue.values_mut() {
            if task.state == DownloadState::InProgress {
                task.state = DownloadState::Waiting;
                changed.push((task.id.clone(), task.resume_data.clone()));
            }
        }
        for (id, resume_data) in changed {
            self.persist_state(&id, DownloadState::Waiting, resume_data).await;
        }

        info!("下载已全部暂停");
        self.emit(DownloadEvent::Added);
        st.state = ManagerState::Paused;
    }

    // 网络恢复或回到前台
    async fn resume_after_pause(&self) {
        let mut st = self.queue.lock().await;
        if st.state != ManagerState::Paused {
            return;
        }
        if !self.user_can_download() {
            info!("网络仍不允许下载，保持暂停");
            return;
        }

        st.state = ManagerState::Idle;
        info!("恢复下载队列");
        if let Err(e) = self.ensure_hydrated(&mut st).await {
            error!("加载下载记录失败: {}", e);
            return;
        }
        self.advance_quietly(&mut st).await;
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.abort_subscriptions();
    }
}

fn spawn_reachability_listener(
    weak: Weak<ManagerInner>,
    mut transitions: broadcast::Receiver<Reachability>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let transition = match transitions.recv().await {
                Ok(transition) => transition,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("网络状态事件丢失 {} 条", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match transition {
                Reachability::Unreachable => inner.waiting_all().await,
                Reachability::Reachable => inner.resume_after_pause().await,
            }
        }
    })
}

fn spawn_lifecycle_listener(
    weak: Weak<ManagerInner>,
    mut signals: broadcast::Receiver<LifecycleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match signals.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("生命周期事件丢失 {} 条", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match event {
                LifecycleEvent::EnteredBackground => inner.waiting_all().await,
                LifecycleEvent::BecameActive => inner.resume_after_pause().await,
            }
        }
    })
}
