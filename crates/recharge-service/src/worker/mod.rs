//! 后台任务
//!
//! 两个循环都观察同一个 `watch` 关闭信号，在两次迭代之间退出。

mod recharge_worker;
mod retry_worker;

pub use recharge_worker::RechargeWorker;
pub use retry_worker::{RetryTickStats, RetryWorker};
