use super::task::DownloadTask;

/// 管理器对外广播的事件，按产生顺序投递
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    // 队列内容发生变化（新增任务或全部转为等待）
    Added,
    Started(DownloadTask),
    Progress { fraction: f64, task: DownloadTask },
    Paused(DownloadTask),
    Canceled(Vec<DownloadTask>),
    CourseCanceled(String),
    AllCanceled,
    Finished(DownloadTask),
    // 非网络原因失败，任务回到等待状态
    Failed { task: DownloadTask, reason: String },
    DeletedFile(Vec<String>),
    ClearedAll,
}

impl DownloadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Started(_) => "started",
            Self::Progress { .. } => "progress",
            Self::Paused(_) => "paused",
            Self::Canceled(_) => "canceled",
            Self::CourseCanceled(_) => "course_canceled",
            Self::AllCanceled => "all_canceled",
            Self::Finished(_) => "finished",
            Self::Failed { .. } => "failed",
            Self::DeletedFile(_) => "deleted_file",
            Self::ClearedAll => "cleared_all",
        }
    }
}
