use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StoreError, TaskStore};
use crate::downloader::task::{DownloadRecord, DownloadState, DownloadTask};

/// 进程内存储，不落盘。适合嵌入测试或临时会话
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: DashMap<String, (u64, DownloadRecord)>, // id -> (插入序号, 记录)
    sequence: AtomicU64,
    active_user: RwLock<Option<String>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // 直接读取一条原始记录
    pub fn record(&self, id: &str) -> Option<DownloadRecord> {
        self.records.get(id).map(|entry| entry.value().1.clone())
    }

    fn collect<F>(&self, filter: F) -> Vec<DownloadTask>
    where
        F: Fn(&DownloadRecord) -> bool,
    {
        let mut matched: Vec<(u64, DownloadRecord)> = self
            .records
            .iter()
            .filter(|entry| filter(&entry.value().1))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(|(seq, _)| *seq);
        matched
            .into_iter()
            .map(|(_, record)| DownloadTask::from_record(record))
            .collect()
    }

    fn in_scope(&self, record: &DownloadRecord) -> bool {
        match self.active_user.read() {
            Ok(user) => user.as_deref().is_none_or(|u| record.user_id == u),
            Err(_) => true,
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn set_active_user(&self, user_id: &str) {
        if let Ok(mut user) = self.active_user.write() {
            *user = Some(user_id.to_string());
        }
    }

    async fn all_tasks(&self, user_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        Ok(self.collect(|r| r.user_id == user_id))
    }

    async fn tasks_for_course(&self, course_id: &str) -> Result<Vec<DownloadTask>, StoreError> {
        Ok(self.collect(|r| r.course_id == course_id && self.in_scope(r)))
    }

    async fn task_for_block(&self, block_id: &str) -> Result<Option<DownloadTask>, StoreError> {
        Ok(self
            .collect(|r| r.block_id == block_id && self.in_scope(r))
            .into_iter()
            .next())
    }

    async fn upsert_tasks(&self, tasks: &[DownloadTask]) -> Result<(), StoreError> {
        for task in tasks {
            let record = task.to_record();
            match self.records.get_mut(&task.id) {
                Some(mut entry) => entry.value_mut().1 = record,
                None => {
                    let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
                    self.records.insert(task.id.clone(), (seq, record));
                }
            }
        }
        Ok(())
    }

    async fn update_state(
        &self,
        id: &str,
        state: DownloadState,
        resume_data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        if let Some(mut entry) = self.records.get_mut(id) {
            let record = &mut entry.value_mut().1;
            record.state = state;
            record.resume_data = resume_data;
            if state == DownloadState::Finished {
                record.progress = 1.0;
            }
        }
        Ok(())
    }

    async fn delete_tasks(&self, ids: &[String]) -> Result<(), StoreError> {
        for id in ids {
            self.records.remove(id);
        }
        Ok(())
    }
}
