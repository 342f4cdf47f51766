//! 共享库
//!
//! 包含充值服务与通知 worker 共用的配置、错误处理、数据库连接、缓存、异步队列等基础设施代码。

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod queue;
pub mod retry;
