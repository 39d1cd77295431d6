pub mod core;
pub mod error;
pub mod events;
pub mod manager;
pub mod progress;
pub mod storage;
pub mod task;
pub mod transfer;

pub use core::{HttpTransferClient, ResumeToken};
pub use error::{DownloadError, TransferError, TransferErrorKind};
pub use events::DownloadEvent;
pub use manager::{DownloadManager, DownloadSettings, LARGE_DOWNLOAD_THRESHOLD, ManagerState};
pub use progress::DownloadProgress;
pub use storage::VideoStorage;
pub use task::{DownloadKind, DownloadRecord, DownloadState, DownloadTask};
pub use transfer::{TransferClient, TransferHandle, TransferOutcome, TransferUpdate, UpdateSender};
