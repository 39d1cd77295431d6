pub mod common;
pub mod config;
pub mod downloader;
pub mod network;
pub mod store;

pub use config::DownloaderConfig;
pub use downloader::{DownloadError, DownloadEvent, DownloadManager, DownloadTask};
