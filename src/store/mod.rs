//! 下载任务的持久化存储
//!
//! 存储层保存每个任务的一条记录，是进程重启之后的唯一可信来源。
//! 记录按用户隔离，`set_active_user` 决定按课程 / 内容块查询时的作用域。

pub mod json_store;
pub mod memory_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::models::{CourseBlock, VideoQuality};
use crate::downloader::task::{DownloadState, DownloadTask};

pub use json_store::JsonTaskStore;
pub use memory_store::MemoryTaskStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO操作失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn set_active_user(&self, user_id: &str);

    // 按插入顺序返回该用户的全部任务
    async fn all_tasks(&self, user_id: &str) -> Result<Vec<DownloadTask>, StoreError>;

    async fn tasks_for_course(&self, course_id: &str) -> Result<Vec<DownloadTask>, StoreError>;

    async fn task_for_block(&self, block_id: &str) -> Result<Option<DownloadTask>, StoreError>;

    // 已存在的 id 覆盖原记录，但保留原来的顺序
    async fn upsert_tasks(&self, tasks: &[DownloadTask]) -> Result<(), StoreError>;

    async fn update_state(
        &self,
        id: &str,
        state: DownloadState,
        resume_data: Option<Vec<u8>>,
    ) -> Result<(), StoreError>;

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), StoreError>;

    async fn upsert_tasks_from_blocks(
        &self,
        user_id: &str,
        blocks: &[CourseBlock],
        quality: VideoQuality,
    ) -> Result<Vec<DownloadTask>, StoreError> {
        let tasks: Vec<DownloadTask> = blocks
            .iter()
            .filter_map(|block| DownloadTask::from_block(block, quality, user_id))
            .collect();
        self.upsert_tasks(&tasks).await?;
        Ok(tasks)
    }
}
