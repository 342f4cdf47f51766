//! 话费充值履约服务
//!
//! 接收合作方订单，经平台适配器派发到上游充值平台，处理回调与主动查单，
//! 失败时按退避重试，终态后扣款/退回并推送结果通知。
//!
//! ## 模块结构
//!
//! - `api`: HTTP 接口（合作方下单、上游回调、运营退款）
//! - `service`: 状态机、派单、重试、结算与通知入队
//! - `worker`: 充值队列消费与重试扫描
//! - `platform`: 上游平台适配器与回调解析
//! - `repository`: PostgreSQL 仓储
//! - `lock`: 分布式锁
//! - `signature`: 各平台 MD5 签名
//! - `models`: 实体与枚举
//! - `error`: 错误类型

pub mod api;
pub mod error;
pub mod lock;
pub mod models;
pub mod platform;
pub mod repository;
pub mod service;
pub mod signature;
pub mod worker;

pub use error::{ErrorKind, RechargeError, Result};
pub use models::{Order, OrderClient, OrderStatus};
pub use service::{Repositories, Services};
