//! 充值 worker
//!
//! 单个轮询循环：从充值队列取任务，交给 `DispatchService::process_recharge_task`。
//! 队列至少投递一次，同一任务可能被处理多次；订单不在待充值状态的任务直接确认丢弃。
//! 认领之后的失败归重试服务，认领之前的瞬时失败延迟重投。

use std::sync::Arc;
use std::time::Duration;

use recharge_shared::observability::metrics;
use recharge_shared::queue::{Queue, QueueExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::service::{DispatchService, RechargeTask};

/// 队列读取失败后的退避
const POP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct RechargeWorker {
    dispatch: Arc<DispatchService>,
    queue: Arc<dyn Queue>,
    queue_name: String,
    pop_timeout: Duration,
}

impl RechargeWorker {
    pub fn new(
        dispatch: Arc<DispatchService>,
        queue: Arc<dyn Queue>,
        queue_name: impl Into<String>,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            dispatch,
            queue,
            queue_name: queue_name.into(),
            pop_timeout,
        }
    }

    /// 运行直到收到关闭信号；正在处理的任务会先完成
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue_name, "充值 worker 已启动");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                popped = self.queue.pop_json::<RechargeTask>(&self.queue_name, self.pop_timeout) => {
                    match popped {
                        Ok(Some(task)) => self.handle(task).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "读取充值队列失败");
                            tokio::time::sleep(POP_ERROR_BACKOFF).await;
                        }
                    }
                    metrics::set_worker_last_run("recharge_worker");
                }
            }
        }

        info!("充值 worker 已停止");
    }

    /// 处理一个任务；错误在这里收口
    pub async fn handle(&self, task: RechargeTask) {
        debug!(order_id = task.order_id, order_number = %task.order_number, "收到充值任务");

        match self.dispatch.process_recharge_task(task.order_id).await {
            Ok(status) => {
                info!(order_number = %task.order_number, status = %status, "充值任务处理完成");
            }
            Err(e) if e.is_retryable() => {
                warn!(order_number = %task.order_number, error = %e, "认领订单失败");
                self.dispatch.requeue(&task).await;
            }
            Err(e) => {
                warn!(order_number = %task.order_number, error = %e, "充值任务无法处理，已丢弃");
            }
        }
    }
}
