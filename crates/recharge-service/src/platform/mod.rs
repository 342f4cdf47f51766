//! 上游充值平台
//!
//! | 平台 | 编码 | 协议 |
//! |------|------|------|
//! | 客客帮 | kekebang | JSON |
//! | 大猿人 | dayuanren | form + JSON 应答 |
//! | 充值平台 | chongzhi | form + XML 应答 |
//! | 秘史 | mishi | form + JSON 应答 |
//! | 闲赚侠 | xianzhuanxia | JSON，Auth_Token 请求头 |

pub mod adapter;
pub mod chongzhi;
pub mod dayuanren;
mod http;
pub mod kekebang;
pub mod mishi;
pub mod registry;
pub mod xianzhuanxia;

pub use adapter::{
    CallbackParser, CallbackReply, DispatchMode, NormalizedCallback, PlatformAdapter,
    SubmitOutcome,
};
pub use registry::PlatformRegistry;

#[cfg(test)]
pub use adapter::{MockCallbackParser, MockPlatformAdapter};
