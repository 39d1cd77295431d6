use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DownloadError {
    // 网络不可用，或开启了"仅 Wi-Fi 下载"但当前为计费网络
    #[error("当前网络不允许下载")]
    NoNetworkAccess,

    #[error("存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无效的续传数据: {0}")]
    InvalidResumeData(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    // 连接断开、超时等，可以用续传数据恢复
    Connectivity,
    Other,
}

// 传输层的失败，不会直接抛给调用方，由管理器转换为任务状态
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub message: String,
}

impl TransferError {
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self {
            kind: TransferErrorKind::Connectivity,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransferErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        self.kind == TransferErrorKind::Connectivity
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() || error.is_body() || error.is_request() {
            TransferError::connectivity(format!("网络中断: {}", error))
        } else {
            TransferError::other(format!("HTTP错误: {}", error))
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(error: std::io::Error) -> Self {
        TransferError::other(format!("IO错误: {}", error))
    }
}
