use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::common::models::{CourseBlock, VideoQuality};
use crate::common::utils::{bytes_to_mb, format_size, unique_file_stem};

// 单个任务的状态：Waiting -> InProgress -> {Finished | Waiting}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Waiting,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadKind {
    #[default]
    Video,
}

// 持久化记录（存储层的数据格式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadRecord {
    pub id: String,
    pub course_id: String,
    pub block_id: String,
    pub user_id: String,
    pub url: String,
    pub file_name: String,
    pub display_name: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub resume_data: Option<Vec<u8>>,
    #[serde(default)]
    pub state: DownloadState,
    #[serde(rename = "type", default)]
    pub kind: DownloadKind,
    #[serde(default)]
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// 一个可下载单元：绑定用户与课程内容块
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub id: String,
    pub course_id: String,
    pub block_id: String,
    pub user_id: String,
    pub url: String,
    pub file_name: String,
    pub display_name: String,
    pub file_size: u64,
    pub kind: DownloadKind,
    pub progress: f64,
    pub state: DownloadState,
    pub resume_data: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl DownloadTask {
    /// 同一个用户的同一个内容块总是得到同一个 id，重复入队即幂等
    pub fn make_id(user_id: &str, block_id: &str) -> String {
        let name = format!("{}:{}", user_id, block_id);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    pub fn from_record(record: DownloadRecord) -> Self {
        Self {
            id: record.id,
            course_id: record.course_id,
            block_id: record.block_id,
            user_id: record.user_id,
            url: record.url,
            file_name: record.file_name,
            display_name: record.display_name,
            file_size: record.file_size,
            kind: record.kind,
            progress: record.progress.clamp(0.0, 1.0),
            state: record.state,
            resume_data: record.resume_data,
            created_at: record.created_at,
        }
    }

    // 视频块在该清晰度下没有可下载源，或者无法解析出扩展名时返回 None
    pub fn from_block(block: &CourseBlock, quality: VideoQuality, user_id: &str) -> Option<Self> {
        let encoding = block.downloadable_video(quality)?;
        let extension = file_extension(&encoding.url)?;

        let file_name = format!("{}.{}", unique_file_stem(&block.id), extension);
        debug!("内容块 {} 解析为文件 {}", block.id, file_name);

        Some(Self {
            id: Self::make_id(user_id, &block.id),
            course_id: block.course_id.clone(),
            block_id: block.id.clone(),
            user_id: user_id.to_string(),
            url: encoding.url.clone(),
            file_name,
            display_name: block.display_name.clone(),
            file_size: encoding.file_size.unwrap_or(0),
            kind: DownloadKind::Video,
            progress: 0.0,
            state: DownloadState::Waiting,
            resume_data: None,
            created_at: Utc::now(),
        })
    }

    pub fn to_record(&self) -> DownloadRecord {
        DownloadRecord {
            id: self.id.clone(),
            course_id: self.course_id.clone(),
            block_id: self.block_id.clone(),
            user_id: self.user_id.clone(),
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            display_name: self.display_name.clone(),
            progress: self.progress,
            resume_data: self.resume_data.clone(),
            state: self.state,
            kind: self.kind,
            file_size: self.file_size,
            created_at: self.created_at,
        }
    }

    pub fn file_size_mb(&self) -> f64 {
        bytes_to_mb(self.file_size)
    }

    pub fn formatted_file_size(&self) -> String {
        format_size(self.file_size)
    }

    pub fn is_finished(&self) -> bool {
        self.state == DownloadState::Finished
    }
}

// 从 URL 路径中提取文件扩展名（忽略查询参数）
fn file_extension(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (stem, extension) = last_segment.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}
