use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

pub trait ConnectivityMonitor: Send + Sync {
    fn is_internet_available(&self) -> bool;

    // 计费网络（蜂窝数据等）
    fn is_metered_connection(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<Reachability>;
}

/// 由宿主程序更新的网络状态，只有可达性真正变化时才广播
#[derive(Debug)]
pub struct SharedConnectivity {
    reachable: AtomicBool,
    metered: AtomicBool,
    transitions: broadcast::Sender<Reachability>,
}

impl SharedConnectivity {
    pub fn new(reachable: bool, metered: bool) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            reachable: AtomicBool::new(reachable),
            metered: AtomicBool::new(metered),
            transitions,
        }
    }

    pub fn online() -> Self {
        Self::new(true, false)
    }

    pub fn set_reachable(&self, reachable: bool) {
        let previous = self.reachable.swap(reachable, Ordering::SeqCst);
        if previous == reachable {
            return;
        }
        let transition = if reachable {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        };
        info!("网络状态变化: {:?}", transition);
        // 没有订阅者时发送失败是正常的
        let _ = self.transitions.send(transition);
    }

    pub fn set_metered(&self, metered: bool) {
        self.metered.store(metered, Ordering::SeqCst);
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl ConnectivityMonitor for SharedConnectivity {
    fn is_internet_available(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn is_metered_connection(&self) -> bool {
        self.metered.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<Reachability> {
        self.transitions.subscribe()
    }
}
