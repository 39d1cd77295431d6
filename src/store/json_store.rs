use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{StoreError, TaskStore};
use crate::downloader::task::{DownloadRecord, DownloadState, DownloadTask};

#[derive(Debug, Default)]
struct JsonStoreState {
    active_user: Option<String>,
    records: Vec<DownloadRecord>,
}

/// 以单个 JSON 文件保存全部记录，每次修改后通过临时文件 + 重命名整体写回
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    state: Mutex<JsonStoreState>,
}

impl JsonTaskStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(data) if data.iter().all(|b| b.is_ascii_whitespace()) => Vec::new(),
            Ok(data) => serde_json::from_slice::<Vec<DownloadRecord>>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("状态文件不存在，将在首次写入时创建: {}", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!("从 {} 加载了 {} 条下载记录", path.display(), records.len());

        Ok(Self {
            path,
            state: Mutex::new(JsonStoreState {
                active_user: None,
                records,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, records: &[DownloadRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_vec_pretty(records)?;
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    fn scoped<'a>(
        state: &'a JsonStoreState,
    ) -> impl Iterator<Item = &'a DownloadRecord> + 'a {
        let user = state.active_user.clone();
        state
            .records
            .iter()
            .filter(move |r| user.as_deref().is_none_or(|u| r.user_id == u))
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn set_active_user(&self, user_id: &str) {
        self.state.lock().await.active_user = Some(user_id.to_string());
    }

    async fn all_tasks(&self, user_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .map(DownloadTask::from_record)
            .collect())
    }

    async fn tasks_for_course(&self, course_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(Self::scoped(&state)
            .filter(|r| r.course_id == course_id)
            .cloned()
            .map(DownloadTask::from_record)
            .collect())
    }

    async fn task_for_block(&self, block_id: &str) -> Result<Option<DownloadTask>, StoreError> {
        let state = self.state.lock().await;
        Ok(Self::scoped(&state)
            .find(|r| r.block_id == block_id)
            .cloned()
            .map(DownloadTask::from_record))
    }

    async fn upsert_tasks(&self, tasks: &[DownloadTask]) -> Result<(), StoreError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        for task in tasks {
            let record = task.to_record();
            match state.records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => state.records.push(record),
            }
        }
        self.save(&state.records).await
    }

    async fn update_state(
        &self,
        id: &str,
        download_state: DownloadState,
        resume_data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.iter_mut().find(|r| r.id == id) else {
            debug!("更新状态时记录不存在: {}", id);
            return Ok(());
        };
        record.state = download_state;
        record.resume_data = resume_data;
        if download_state == DownloadState::Finished {
            record.progress = 1.0;
        }
        self.save(&state.records).await
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|r| !ids.contains(&r.id));
        if state.records.len() == before {
            return Ok(());
        }
        self.save(&state.records).await
    }
}
