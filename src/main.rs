use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use course_downloader::common::logger::PrettyLogger;
use course_downloader::common::models::{BlockKind, CourseBlock, EncodedVideos};
use course_downloader::common::utils::format_size;
use course_downloader::config::DownloaderConfig;
use course_downloader::downloader::{
    DownloadEvent, DownloadManager, DownloadProgress, DownloadTask, HttpTransferClient, ManagerState,
};
use course_downloader::network::{LifecycleEvent, LifecycleSignals, SharedConnectivity};
use course_downloader::store::JsonTaskStore;

mod cli;

use cli::Command;

/// 合并配置文件和命令行参数
fn build_config(args: &cli::Cli) -> Result<DownloaderConfig> {
    let mut config = match &args.config {
        Some(path) => DownloaderConfig::load(path)
            .with_context(|| format!("无法加载配置文件: {}", path.display()))?,
        None => DownloaderConfig::load_or_default("coursedl.json").context("无法加载默认配置文件")?,
    };

    if let Some(root_dir) = &args.root_dir {
        config.root_dir = root_dir.clone();
    }
    if let Some(user) = &args.user {
        config.user_id = user.clone();
    }
    if let Some(quality) = args.quality {
        config.video_quality = quality;
    }
    if args.allow_metered {
        config.wifi_only = false;
    }

    debug!("最终配置: {:?}", config);
    Ok(config)
}

async fn load_catalog(path: &Path, block_ids: &[String]) -> Result<Vec<CourseBlock>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取课程目录: {}", path.display()))?;
    let blocks: Vec<CourseBlock> =
        serde_json::from_str(&content).with_context(|| format!("课程目录格式错误: {}", path.display()))?;

    if block_ids.is_empty() {
        return Ok(blocks);
    }
    Ok(blocks
        .into_iter()
        .filter(|block| block_ids.contains(&block.id))
        .collect())
}

// 取消 / 删除只需要内容块 id，从已有任务中还原
fn blocks_from_tasks(tasks: &[DownloadTask], block_ids: &[String]) -> Vec<CourseBlock> {
    tasks
        .iter()
        .filter(|task| block_ids.is_empty() || block_ids.contains(&task.block_id))
        .map(|task| CourseBlock {
            id: task.block_id.clone(),
            course_id: task.course_id.clone(),
            display_name: task.display_name.clone(),
            kind: BlockKind::Video,
            encoded_videos: EncodedVideos::default(),
        })
        .collect()
}

/// 显示进度直到队列空闲；Ctrl-C 时挂起当前下载
async fn run_until_idle(
    manager: &DownloadManager,
    lifecycle: &LifecycleSignals,
    mut events: broadcast::Receiver<DownloadEvent>,
) -> Result<()> {
    let mut progress = DownloadProgress::new();
    let mut finished = Vec::new();

    if manager.state().await != ManagerState::Downloading {
        PrettyLogger::info("没有需要下载的任务");
        return Ok(());
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                lifecycle.emit(LifecycleEvent::EnteredBackground);
                manager.shutdown().await;
                progress.clear();
                PrettyLogger::warning("下载已暂停，运行 `coursedl resume` 继续");
                return Ok(());
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("进度事件丢失 {} 条", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                progress.handle(&event);

                let settled = match &event {
                    DownloadEvent::Finished(task) => {
                        finished.push(task.display_name.clone());
                        true
                    }
                    DownloadEvent::Paused(task) => {
                        PrettyLogger::warning(format!("网络中断: {}", task.display_name));
                        true
                    }
                    DownloadEvent::Failed { task, reason } => {
                        PrettyLogger::error(format!("{}: {}", task.display_name, reason));
                        true
                    }
                    _ => false,
                };
                if settled && manager.state().await != ManagerState::Downloading {
                    break;
                }
            }
        }
    }

    manager.shutdown().await;
    if !finished.is_empty() {
        PrettyLogger::completion_summary(finished);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config = build_config(&args)?;
    tokio::fs::create_dir_all(&config.root_dir)
        .await
        .with_context(|| format!("无法创建数据目录: {}", config.root_dir.display()))?;

    let store = Arc::new(
        JsonTaskStore::open(config.state_file_path())
            .await
            .context("无法打开任务记录文件")?,
    );
    let connectivity = Arc::new(SharedConnectivity::new(true, args.metered));
    let lifecycle = LifecycleSignals::new();
    let client = Arc::new(HttpTransferClient::new(Duration::from_secs(
        config.request_timeout_secs,
    ))?);

    let manager = DownloadManager::new(&config, store, client, connectivity, &lifecycle).await;

    match args.command {
        Command::Add { catalog, blocks, yes } => {
            let blocks = load_catalog(&catalog, &blocks).await?;
            if blocks.is_empty() {
                bail!("课程目录中没有匹配的内容块");
            }
            if manager.is_large_videos_size(&blocks) && !yes {
                let total: u64 = blocks
                    .iter()
                    .map(|b| b.projected_size(config.video_quality))
                    .sum();
                PrettyLogger::warning(format!(
                    "预计下载 {}，确认后请加上 --yes 重新运行",
                    format_size(total)
                ));
                return Ok(());
            }

            let events = manager.subscribe();
            manager
                .enqueue(&blocks)
                .await
                .context("当前网络不允许下载，可以使用 --allow-metered")?;
            info!("已加入队列: {} 个内容块", blocks.len());
            run_until_idle(&manager, &lifecycle, events).await?;
        }
        Command::Resume => {
            let events = manager.subscribe();
            manager.resume_downloading().await?;
            run_until_idle(&manager, &lifecycle, events).await?;
        }
        Command::List { course } => {
            let tasks = match &course {
                Some(course_id) => manager.list_tasks_for_course(course_id).await?,
                None => manager.list_tasks().await?,
            };
            PrettyLogger::title(format!("{} 个任务", tasks.len()));
            for task in &tasks {
                PrettyLogger::task_line(task);
            }
            let total: u64 = tasks.iter().map(|t| t.file_size).sum();
            PrettyLogger::separator();
            println!("总计: {}", format_size(total).bold());
        }
        Command::Cancel { course, blocks, all } => {
            if all {
                manager.cancel_all().await?;
                PrettyLogger::success("已取消全部未完成的任务");
            } else if let Some(course_id) = course {
                if blocks.is_empty() {
                    manager.cancel_for_course(&course_id).await?;
                } else {
                    let tasks = manager.list_tasks_for_course(&course_id).await?;
                    let targets = blocks_from_tasks(&tasks, &blocks);
                    manager.cancel_for_course_blocks(&course_id, &targets).await?;
                }
                PrettyLogger::success(format!("已取消课程 {} 的下载", course_id));
            } else if !blocks.is_empty() {
                let tasks = manager.list_tasks().await?;
                for task in tasks.iter().filter(|t| blocks.contains(&t.block_id)) {
                    manager.cancel(task).await?;
                    PrettyLogger::success(format!("已取消: {}", task.display_name));
                }
            } else {
                bail!("请指定 --all、--course 或 --block");
            }
        }
        Command::Delete { course, blocks, all } => {
            if all {
                manager.delete_all().await?;
                PrettyLogger::success("已删除全部任务和文件");
            } else if let Some(course_id) = course {
                let tasks = manager.list_tasks_for_course(&course_id).await?;
                let targets = blocks_from_tasks(&tasks, &blocks);
                manager.delete(&targets, &course_id).await?;
                PrettyLogger::success(format!("已删除 {} 个文件", targets.len()));
            } else {
                bail!("请指定 --all 或 --course");
            }
        }
        Command::Path { block } => match manager.file_url(&block).await {
            Some(path) => PrettyLogger::file_info(&block, path.display().to_string()),
            None => {
                warn!("内容块 {} 尚未下载完成", block);
                PrettyLogger::warning("该内容块没有已完成的下载");
            }
        },
        Command::Size { catalog, blocks } => {
            let blocks = load_catalog(&catalog, &blocks).await?;
            let total: u64 = blocks
                .iter()
                .map(|b| b.projected_size(config.video_quality))
                .sum();
            PrettyLogger::info(format!(
                "{} 个内容块，预计 {} ({})",
                blocks.len(),
                format_size(total),
                config.video_quality
            ));
            if manager.is_large_videos_size(&blocks) {
                PrettyLogger::warning("超过 1 GB，建议在 Wi-Fi 下载");
            }
        }
        Command::Cleanup => {
            let removed = manager.remove_app_support_directory_unused_content().await;
            PrettyLogger::success(format!("清理了 {} 个旧缓存目录", removed));
        }
    }

    manager.shutdown().await;
    Ok(())
}
