use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{DownloadError, TransferError};
use super::transfer::{TransferClient, TransferHandle, TransferOutcome, TransferUpdate, UpdateSender};

// 进度变化超过 1% 才上报
const PROGRESS_STEP: f64 = 0.01;

/// 续传数据：记录已写入磁盘的字节数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeToken {
    pub url: String,
    pub offset: u64,
    pub total: Option<u64>,
}

impl ResumeToken {
    pub fn encode(&self) -> Option<Vec<u8>> {
        match bincode::serde::encode_to_vec(self, bincode::config::standard()) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("编码续传数据失败: {}", e);
                None
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, DownloadError> {
        bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map(|(token, _)| token)
            .map_err(|e| DownloadError::InvalidResumeData(e.to_string()))
    }
}

struct TransferEntry {
    url: String,
    cancel: CancellationToken,
    done: CancellationToken, // 传输任务退出后触发
    written: Arc<AtomicU64>,
    total: Arc<AtomicU64>, // 0 表示未知
}

/// 基于 reqwest 的流式下载客户端，支持 Range 续传
#[derive(Clone)]
pub struct HttpTransferClient {
    client: reqwest::Client,
    transfers: Arc<DashMap<u64, TransferEntry>>,
    next_id: Arc<AtomicU64>,
}

impl HttpTransferClient {
    pub fn new(connect_timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("coursedl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            transfers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    // 正在进行的传输数量
    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }

    fn spawn(
        &self,
        url: String,
        destination: PathBuf,
        offset: u64,
        updates: UpdateSender,
    ) -> TransferHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = TransferEntry {
            url: url.clone(),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            written: Arc::new(AtomicU64::new(offset)),
            total: Arc::new(AtomicU64::new(0)),
        };
        let job = TransferJob {
            client: self.client.clone(),
            url,
            destination,
            offset,
            cancel: entry.cancel.clone(),
            written: Arc::clone(&entry.written),
            total: Arc::clone(&entry.total),
            updates,
        };
        let done = entry.done.clone();
        self.transfers.insert(id, entry);

        let transfers = Arc::clone(&self.transfers);
        tokio::spawn(async move {
            job.run().await;
            transfers.remove(&id);
            done.cancel();
        });

        TransferHandle { id }
    }

    // 通知传输停止，并等待文件句柄关闭
    async fn stop(&self, handle: &TransferHandle) -> Option<TransferEntry> {
        let (_, entry) = self.transfers.remove(&handle.id)?;
        entry.cancel.cancel();
        entry.done.cancelled().await;
        Some(entry)
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn start(
        &self,
        url: &str,
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError> {
        debug!("开始传输: {} -> {}", url, destination.display());
        Ok(self.spawn(url.to_string(), destination, 0, updates))
    }

    async fn resume(
        &self,
        resume_data: &[u8],
        destination: PathBuf,
        updates: UpdateSender,
    ) -> Result<TransferHandle, DownloadError> {
        let token = ResumeToken::decode(resume_data)?;

        // 以磁盘上实际存在的字节为准
        let offset = match tokio::fs::metadata(&destination).await {
            Ok(meta) => meta.len().min(token.offset),
            Err(_) => 0,
        };
        info!("从 {} 字节处继续传输: {}", offset, token.url);
        Ok(self.spawn(token.url, destination, offset, updates))
    }

    async fn cancel(&self, handle: &TransferHandle) {
        if self.stop(handle).await.is_some() {
            debug!("传输已取消: {}", handle.id);
        }
    }

    async fn suspend(&self, handle: &TransferHandle) -> Option<Vec<u8>> {
        let entry = self.stop(handle).await?;
        let total = entry.total.load(Ordering::SeqCst);
        let token = ResumeToken {
            url: entry.url,
            offset: entry.written.load(Ordering::SeqCst),
            total: (total > 0).then_some(total),
        };
        debug!("传输已挂起: {}, 已写入 {} 字节", handle.id, token.offset);
        token.encode()
    }
}

struct TransferJob {
    client: reqwest::Client,
    url: String,
    destination: PathBuf,
    offset: u64,
    cancel: CancellationToken,
    written: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    updates: UpdateSender,
}

impl TransferJob {
    async fn run(self) {
        let outcome = match self.transfer().await {
            Ok(true) => TransferOutcome::Completed,
            Ok(false) => TransferOutcome::Interrupted,
            Err(error) => {
                // 网络中断时保留已下载部分
                let resume_data = if error.is_connectivity() {
                    let total = self.total.load(Ordering::SeqCst);
                    ResumeToken {
                        url: self.url.clone(),
                        offset: self.written.load(Ordering::SeqCst),
                        total: (total > 0).then_some(total),
                    }
                    .encode()
                } else {
                    None
                };
                error!("传输失败: {}, 错误: {}", self.url, error);
                TransferOutcome::Failed { error, resume_data }
            }
        };
        let _ = self.updates.send(TransferUpdate::Finished(outcome));
    }

    // 返回 false 表示被取消或挂起
    async fn transfer(&self) -> Result<bool, TransferError> {
        let Some((response, start)) = self.open_response().await? else {
            return Ok(false);
        };

        let total_size = response.content_length().map(|len| len + start);
        self.written.store(start, Ordering::SeqCst);
        self.total.store(total_size.unwrap_or(0), Ordering::SeqCst);

        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = open_destination(&self.destination, start).await?;

        let mut stream = Box::pin(response.bytes_stream());
        let result = self.copy_body(&mut stream, &mut file, total_size).await;
        // 无论结果如何都要把已写入的数据刷到磁盘，续传依赖这个长度
        if let Err(e) = file.flush().await {
            warn!("刷新文件失败: {}, 错误: {}", self.destination.display(), e);
        }
        let completed = result?;
        if !completed {
            return Ok(false);
        }
        file.sync_all().await?;

        let downloaded = self.written.load(Ordering::SeqCst);
        if let Some(total) = total_size {
            if downloaded < total {
                return Err(TransferError::connectivity(format!(
                    "连接提前关闭，已接收 {}/{} 字节",
                    downloaded, total
                )));
            }
        }

        let _ = self.updates.send(TransferUpdate::Progress(1.0));
        debug!("传输完成: {}, 共 {} 字节", self.url, downloaded);
        Ok(true)
    }

    // 发起请求；续传区间不被接受时退回到完整下载
    async fn open_response(&self) -> Result<Option<(reqwest::Response, u64)>, TransferError> {
        let mut offset = self.offset;
        loop {
            let mut request = self.client.get(&self.url);
            if offset > 0 {
                request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
            }

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                response = request.send() => response?,
            };

            let status = response.status();
            if offset > 0 && status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
                warn!("服务器拒绝续传区间，重新下载: {}", self.url);
                offset = 0;
                continue;
            }
            check_response_status(&response, &self.url)?;

            // 206 表示服务器接受了续传，否则从头写入
            let start = if offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT {
                offset
            } else {
                if offset > 0 {
                    debug!("服务器不支持 Range，重新下载: {}", self.url);
                }
                0
            };
            return Ok(Some((response, start)));
        }
    }

    async fn copy_body<S, B>(
        &self,
        stream: &mut S,
        file: &mut tokio::fs::File,
        total_size: Option<u64>,
    ) -> Result<bool, TransferError>
    where
        S: futures::Stream<Item = reqwest::Result<B>> + Unpin,
        B: AsRef<[u8]>,
    {
        let mut last_reported = -1.0_f64;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else {
                return Ok(true);
            };
            let chunk = chunk?;
            let chunk = chunk.as_ref();

            file.write_all(chunk).await?;
            let len = chunk.len() as u64;
            let downloaded = self.written.fetch_add(len, Ordering::SeqCst) + len;

            if let Some(total) = total_size.filter(|t| *t > 0) {
                let fraction = (downloaded as f64 / total as f64).min(1.0);
                if fraction - last_reported >= PROGRESS_STEP {
                    last_reported = fraction;
                    let _ = self.updates.send(TransferUpdate::Progress(fraction));
                }
            }
        }
    }
}

async fn open_destination(path: &Path, start: u64) -> Result<tokio::fs::File, TransferError> {
    if start == 0 {
        return Ok(tokio::fs::File::create(path).await?);
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    // 丢弃续传点之后的残留数据
    file.set_len(start).await?;
    file.seek(SeekFrom::End(0)).await?;
    Ok(file)
}

// 检查响应状态，非成功状态都不是网络问题，不能靠续传恢复
fn check_response_status(response: &reqwest::Response, url: &str) -> Result<(), TransferError> {
    let status = response.status();
    debug!("Response Status: {}", status);

    match status {
        status if status.is_success() => Ok(()),
        reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => {
            warn!("🚫 访问被拒绝 ({})，可能需要重新登录", status);
            Err(TransferError::other(format!("访问被拒绝 ({})，URL: {}", status, url)))
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            warn!("⚠️ 请求过于频繁");
            Err(TransferError::other(format!("请求过于频繁 (429)，URL: {}", url)))
        }
        _ => {
            warn!("❌ 非成功状态码: {}", status);
            Err(TransferError::other(format!(
                "HTTP 请求失败，状态码: {}，URL: {}",
                status, url
            )))
        }
    }
}
