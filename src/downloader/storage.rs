use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use super::task::DownloadTask;

/// 管理应用数据目录下的视频文件
#[derive(Debug, Clone)]
pub struct VideoStorage {
    root: PathBuf,
}

impl VideoStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // 每个用户一个独立目录，目录名由用户 id 的哈希得到
    pub fn folder_name(user_id: &str) -> String {
        let digest = Sha256::digest(user_id.as_bytes());
        format!("videos_{:x}", digest)
    }

    pub fn folder_path(&self, user_id: &str) -> PathBuf {
        self.root.join(Self::folder_name(user_id))
    }

    // 按需创建用户视频目录，失败时返回 None
    pub async fn videos_folder(&self, user_id: &str) -> Option<PathBuf> {
        let folder = self.folder_path(user_id);
        match tokio::fs::create_dir_all(&folder).await {
            Ok(()) => Some(folder),
            Err(e) => {
                error!("创建视频目录失败: {}, 错误: {}", folder.display(), e);
                None
            }
        }
    }

    pub fn file_path(&self, task: &DownloadTask) -> PathBuf {
        self.folder_path(&task.user_id).join(&task.file_name)
    }

    // 删除任务对应的文件，文件不存在不算错误
    pub async fn remove_file(&self, task: &DownloadTask) {
        let path = self.file_path(task);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("已删除文件: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除文件失败: {}, 错误: {}", path.display(), e),
        }
    }

    /// 清理旧版本遗留的缓存目录（目录名为 32 位十六进制）
    pub async fn remove_unused_content(&self) -> usize {
        lazy_static! {
            static ref LEGACY_FOLDER: Regex = Regex::new(r"^[0-9a-fA-F]{32}$").unwrap();
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                error!("读取应用数据目录失败: {}, 错误: {}", self.root.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("遍历应用数据目录出错: {}", e);
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !LEGACY_FOLDER.is_match(name) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    debug!("已删除旧缓存目录: {}", name);
                }
                Err(e) => warn!("删除旧缓存目录失败: {}, 错误: {}", name, e),
            }
        }

        if removed > 0 {
            info!("清理了 {} 个旧缓存目录", removed);
        }
        removed
    }
}
