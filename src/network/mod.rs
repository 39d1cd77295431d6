//! 网络状态与应用前后台信号
//!
//! 两者都以广播流的形式提供给下载管理器，由宿主程序负责驱动。

pub mod connectivity;
pub mod lifecycle;

pub use connectivity::{ConnectivityMonitor, Reachability, SharedConnectivity};
pub use lifecycle::{LifecycleEvent, LifecycleSignals, LifecycleSource};
