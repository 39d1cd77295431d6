use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::{DownloadError, TransferError};

// 一次传输的句柄，id 在同一个客户端内唯一
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferHandle {
    pub id: u64,
}

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed,
    Failed {
        error: TransferError,
        resume_data: Option<Vec<u8>>,
    },
    // 被 cancel 或 suspend 主动终止
    Interrupted,
}

// 传输过程中发回给管理器的更新
#[derive(Debug, Clone)]
pub enum TransferUpdate {
    Progress(f64),
    Finished(TransferOutcome),
}

pub type UpdateSender = mpsc::UnboundedSender<TransferUpdate>;

/// 执行实际字节传输的客户端
///
/// `start` / `resume` 只负责启动，传输在后台进行，进度和结果通过 `updates` 回传。
/// 每次传输最多发送一次 `TransferUpdate::Finished`。
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn start(
        &self,
        url: &str,
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError>;

    async fn resume(
        &self,
        resume_data: &[u8],
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError>;

    // 强制取消，丢弃续传数据
    async fn cancel(&self, handle: &TransferHandle);

    // 挂起传输，返回可用于 resume 的续传数据
    async fn suspend(&self, handle: &TransferHandle) -> Option<Vec<u8>>;
}
