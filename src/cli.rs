use clap::{Parser, Subcommand};
use std::path::PathBuf;

use course_downloader::common::models::VideoQuality;

/// 课程视频下载器
#[derive(Parser, Debug)]
#[command(name = "coursedl")]
#[command(version, author = "rpeng252@gmail.com")]
#[command(about = "课程视频后台下载工具：顺序下载、断点续传", long_about = None)]
pub struct Cli {
    /// 配置文件 (JSON)
    #[arg(long, value_name = "FILE", global = true)]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// 应用数据目录
    #[arg(long, value_name = "DIR", global = true)]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub root_dir: Option<PathBuf>,

    /// 当前用户
    #[arg(long, value_name = "USER", global = true)]
    pub user: Option<String>,

    /// 视频质量
    #[arg(long, value_name = "QUALITY", global = true)]
    #[arg(help = "视频质量: auto, 360p, 540p, 720p")]
    pub quality: Option<VideoQuality>,

    /// 当前是计费网络
    #[arg(long, global = true)]
    pub metered: bool,

    /// 允许在计费网络下下载
    #[arg(long, global = true)]
    pub allow_metered: bool,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 从课程目录文件添加视频并开始下载
    Add {
        /// 课程目录文件 (CourseBlock 数组)
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        /// 只下载指定的内容块，可以重复
        #[arg(long = "block", value_name = "BLOCK_ID")]
        blocks: Vec<String>,

        /// 总大小超过 1 GB 时不再确认
        #[arg(long)]
        yes: bool,
    },

    /// 继续下载队列中未完成的任务
    Resume,

    /// 列出下载任务
    List {
        #[arg(long, value_name = "COURSE_ID")]
        course: Option<String>,
    },

    /// 取消下载
    Cancel {
        #[arg(long, value_name = "COURSE_ID")]
        course: Option<String>,

        #[arg(long = "block", value_name = "BLOCK_ID")]
        blocks: Vec<String>,

        /// 取消所有未完成的任务
        #[arg(long)]
        all: bool,
    },

    /// 删除已下载的文件和记录
    Delete {
        #[arg(long, value_name = "COURSE_ID")]
        course: Option<String>,

        #[arg(long = "block", value_name = "BLOCK_ID")]
        blocks: Vec<String>,

        /// 删除所有任务
        #[arg(long)]
        all: bool,
    },

    /// 输出已完成内容块的本地路径
    Path {
        #[arg(value_name = "BLOCK_ID")]
        block: String,
    },

    /// 计算课程目录中视频的总大小
    Size {
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        #[arg(long = "block", value_name = "BLOCK_ID")]
        blocks: Vec<String>,
    },

    /// 清理旧版本遗留的缓存目录
    Cleanup,
}
