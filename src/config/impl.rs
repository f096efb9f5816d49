use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use super::StaticConfig;

static CONFIG: OnceLock<ArcSwap<StaticConfig>> = OnceLock::new();

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 获取全局配置
///
/// 返回 Arc 指针，克隆开销很小，不持有任何锁
pub fn get_config() -> Arc<StaticConfig> {
    CONFIG
        .get()
        .expect("Config not initialized. Call init_config() first.")
        .load_full()
}

/// 尝试获取全局配置，未初始化时返回 None
pub fn try_get_config() -> Option<Arc<StaticConfig>> {
    CONFIG.get().map(|c| c.load_full())
}

/// 从指定路径初始化全局配置
///
/// 文件不存在时使用默认值，环境变量（LS__*）始终生效
pub fn init_config(path: &str) {
    CONFIG.get_or_init(|| ArcSwap::from_pointee(StaticConfig::load(path)));
}

/// 用现成的配置初始化全局配置
///
/// 已初始化时替换为新配置，用于测试和嵌入式场景
pub fn init_config_with(config: StaticConfig) {
    let config = Arc::new(config);
    let slot = CONFIG.get_or_init(|| ArcSwap::new(config.clone()));
    slot.store(config);
}
