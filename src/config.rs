use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::models::VideoQuality;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置文件格式错误: {0}")]
    Parse(#[from] serde_json::Error),
}

// 下载管理器配置，所有字段都有默认值，配置文件中可以只写需要修改的部分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloaderConfig {
    pub root_dir: PathBuf,           // 应用数据目录，视频目录和旧缓存都在这里
    pub state_file: Option<PathBuf>, // 任务记录文件，默认为 root_dir/downloads.json
    pub user_id: String,
    pub wifi_only: bool,
    pub video_quality: VideoQuality,
    pub max_attempts: u32, // 非网络原因连续失败多少次之后不再自动重试
    pub event_capacity: usize,
    pub request_timeout_secs: u64, // 建立连接的超时时间
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./course_data"),
            state_file: None,
            user_id: "default".to_string(),
            wifi_only: true,
            video_quality: VideoQuality::Auto,
            max_attempts: 3,
            event_capacity: 256,
            request_timeout_secs: 30,
        }
    }
}

impl DownloaderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        info!("已加载配置文件: {}", path.display());
        debug!("配置内容: {:?}", config);
        Ok(config)
    }

    // 配置文件不存在时使用默认配置
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("配置文件不存在，使用默认配置: {}", path.display());
            Ok(Self::default())
        }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.root_dir.join("downloads.json"))
    }
}
