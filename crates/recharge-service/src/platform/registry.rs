//! 平台注册表
//!
//! 启动时根据配置构建，以平台编码索引下单适配器与回调解析器。
//! 注册表是显式对象，由调用方持有并传入服务层。

use std::collections::HashMap;
use std::sync::Arc;

use recharge_shared::config::PlatformConfig;
use tracing::{debug, info, warn};

use super::adapter::{CallbackParser, PlatformAdapter};
use super::{chongzhi, dayuanren, kekebang, mishi, xianzhuanxia};
use crate::error::{RechargeError, Result};

#[derive(Default)]
pub struct PlatformRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    parsers: HashMap<String, Arc<dyn CallbackParser>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册平台；相同编码会被替换
    pub fn register(
        &mut self,
        adapter: Arc<dyn PlatformAdapter>,
        parser: Arc<dyn CallbackParser>,
    ) -> &mut Self {
        let code = adapter.code().to_string();
        debug!(platform = %code, mode = ?adapter.dispatch_mode(), "注册充值平台");
        self.adapters.insert(code.clone(), adapter);
        self.parsers.insert(code, parser);
        self
    }

    /// 只注册下单能力（测试替身等不接收回调的平台）
    pub fn register_adapter(&mut self, adapter: Arc<dyn PlatformAdapter>) -> &mut Self {
        self.adapters.insert(adapter.code().to_string(), adapter);
        self
    }

    pub fn adapter(&self, code: &str) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(code)
            .cloned()
            .ok_or_else(|| RechargeError::PlatformNotFound(code.to_string()))
    }

    pub fn parser(&self, code: &str) -> Result<Arc<dyn CallbackParser>> {
        self.parsers
            .get(code)
            .cloned()
            .ok_or_else(|| RechargeError::PlatformNotFound(code.to_string()))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.adapters.contains_key(code)
    }

    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.adapters.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// 按配置构建注册表；未知平台编码只记录警告
    pub fn from_config(platforms: &[PlatformConfig]) -> Result<Self> {
        let mut registry = Self::new();

        for config in platforms {
            match config.code.as_str() {
                kekebang::CODE => {
                    let platform = Arc::new(kekebang::KekebangPlatform::new(config.clone())?);
                    registry.register(platform.clone(), platform);
                }
                dayuanren::CODE => {
                    let platform = Arc::new(dayuanren::DayuanrenPlatform::new(config.clone())?);
                    registry.register(platform.clone(), platform);
                }
                chongzhi::CODE => {
                    let platform = Arc::new(chongzhi::ChongzhiPlatform::new(config.clone())?);
                    registry.register(platform.clone(), platform);
                }
                mishi::CODE => {
                    let platform = Arc::new(mishi::MishiPlatform::new(config.clone())?);
                    registry.register(platform.clone(), platform);
                }
                xianzhuanxia::CODE => {
                    let platform =
                        Arc::new(xianzhuanxia::XianzhuanxiaPlatform::new(config.clone())?);
                    registry.register(platform.clone(), platform);
                }
                other => {
                    warn!(platform = %other, "未知平台编码，已跳过");
                }
            }
        }

        info!(count = registry.len(), platforms = ?registry.codes(), "充值平台注册完成");
        Ok(registry)
    }
}
