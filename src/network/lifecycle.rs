use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    EnteredBackground,
    BecameActive,
}

pub trait LifecycleSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

// 前后台切换信号
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleSignals {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        debug!("应用生命周期事件: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for LifecycleSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSource for LifecycleSignals {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}
