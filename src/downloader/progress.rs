use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::events::DownloadEvent;
use super::task::DownloadTask;

const BAR_LENGTH: u64 = 1000;

/// 命令行下的下载进度显示，每个任务一条进度条
pub struct DownloadProgress {
    multi_pb: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {wide_bar:.cyan/blue} {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        Self {
            multi_pb: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    fn bar(&mut self, task: &DownloadTask) -> &ProgressBar {
        self.bars.entry(task.id.clone()).or_insert_with(|| {
            let pb = self.multi_pb.add(ProgressBar::new(BAR_LENGTH));
            pb.set_style(self.style.clone());
            pb.set_message(task.display_name.clone());
            pb
        })
    }

    fn position(fraction: f64) -> u64 {
        (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64) as u64
    }

    pub fn handle(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started(task) => {
                let pb = self.bar(task);
                pb.set_position(Self::position(task.progress));
            }
            DownloadEvent::Progress { fraction, task } => {
                self.bar(task).set_position(Self::position(*fraction));
            }
            DownloadEvent::Paused(task) => {
                let pb = self.bar(task);
                pb.set_message(format!("{} (已暂停)", task.display_name));
            }
            DownloadEvent::Finished(task) => {
                if let Some(pb) = self.bars.remove(&task.id) {
                    pb.set_position(BAR_LENGTH);
                    pb.finish_with_message(format!("{} ✓", task.display_name));
                }
            }
            DownloadEvent::Failed { task, reason } => {
                if let Some(pb) = self.bars.remove(&task.id) {
                    pb.abandon_with_message(format!("{} ✗ {}", task.display_name, reason));
                }
            }
            DownloadEvent::Canceled(tasks) => {
                for task in tasks {
                    if let Some(pb) = self.bars.remove(&task.id) {
                        pb.abandon_with_message(format!("{} (已取消)", task.display_name));
                    }
                }
            }
            DownloadEvent::AllCanceled | DownloadEvent::ClearedAll => self.clear(),
            _ => {}
        }
    }

    pub fn clear(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.abandon();
        }
    }
}
