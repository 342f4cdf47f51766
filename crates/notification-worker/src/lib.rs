//! 充值结果通知 worker
//!
//! 订单进入最终状态后，充值服务写入通知记录并推入通知队列；
//! 这里按合作方渠道渲染报文、签名并推送，失败时经延迟队列退避重推。

pub mod error;
pub mod sender;
pub mod task;
pub mod templates;
