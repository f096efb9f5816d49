//! 配置值验证模块
//!
//! 启动前检查静态配置，返回所有问题而不是遇到第一个就停止。

use super::{BackendKind, StaticConfig};

/// 时区偏移允许范围（秒），与 chrono::FixedOffset 一致
const MAX_UTC_OFFSET_SECS: u32 = 86_399;

/// 验证静态配置
///
/// 返回 Err 时包含所有不合法字段的说明
pub fn validate_config(config: &StaticConfig) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    if config.stream.key.trim().is_empty() {
        problems.push("stream.key must not be empty".to_string());
    }
    if config.stream.group.trim().is_empty() {
        problems.push("stream.group must not be empty".to_string());
    }
    if config.stream.batch_size == 0 {
        problems.push("stream.batch_size must be greater than 0".to_string());
    }
    if config.stream.block_ms == 0 {
        problems.push("stream.block_ms must be greater than 0".to_string());
    }

    if config.idempotency.processing_ttl_secs == 0 {
        problems.push("idempotency.processing_ttl_secs must be greater than 0".to_string());
    }
    if config.idempotency.accomplished_ttl_secs < config.idempotency.processing_ttl_secs {
        problems.push(
            "idempotency.accomplished_ttl_secs must not be shorter than processing_ttl_secs"
                .to_string(),
        );
    }

    if config.stats.utc_offset_secs.unsigned_abs() > MAX_UTC_OFFSET_SECS {
        problems.push(format!(
            "stats.utc_offset_secs out of range: {} (allowed ±{})",
            config.stats.utc_offset_secs, MAX_UTC_OFFSET_SECS
        ));
    }
    if config.stats.hll_ttl_secs == 0 {
        problems.push("stats.hll_ttl_secs must be greater than 0".to_string());
    }

    if config.recovery.enabled {
        if config.recovery.interval_secs == 0 {
            problems.push("recovery.interval_secs must be greater than 0".to_string());
        }
        if config.recovery.claim_count == 0 {
            problems.push("recovery.claim_count must be greater than 0".to_string());
        }
        if config.recovery.claimant.trim().is_empty() {
            problems.push("recovery.claimant must not be empty".to_string());
        }
        // 读取阻塞期间投递的消息不能被巡检当作空闲消息认领
        if config.stream.block_ms >= config.recovery.min_idle_ms {
            problems.push(format!(
                "stream.block_ms ({}) must be shorter than recovery.min_idle_ms ({})",
                config.stream.block_ms, config.recovery.min_idle_ms
            ));
        }
    }

    if config.retention.enabled && config.retention.interval_secs == 0 {
        problems.push("retention.interval_secs must be greater than 0".to_string());
    }

    if config.stream.backend == BackendKind::Redis && config.redis.url.trim().is_empty() {
        problems.push("redis.url is required when stream.backend = \"redis\"".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&StaticConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_problems() {
        let mut config = StaticConfig::default();
        config.stream.batch_size = 0;
        config.stats.utc_offset_secs = 90_000;
        config.idempotency.accomplished_ttl_secs = 10;

        let problems = validate_config(&config).unwrap_err();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("batch_size")));
        assert!(problems.iter().any(|p| p.contains("utc_offset_secs")));
    }

    #[test]
    fn test_extreme_utc_offset_is_rejected() {
        let mut config = StaticConfig::default();
        config.stats.utc_offset_secs = i32::MIN;
        let problems = validate_config(&config).unwrap_err();
        assert!(problems.iter().any(|p| p.contains("utc_offset_secs")));

        config.stats.utc_offset_secs = -(MAX_UTC_OFFSET_SECS as i32);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_block_must_be_shorter_than_min_idle() {
        let mut config = StaticConfig::default();
        config.stream.block_ms = 5_000;
        config.recovery.min_idle_ms = 5_000;
        let problems = validate_config(&config).unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("block_ms"));

        config.recovery.min_idle_ms = 5_001;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_disabled_tasks_skip_checks() {
        let mut config = StaticConfig::default();
        config.recovery.enabled = false;
        config.recovery.interval_secs = 0;
        config.retention.enabled = false;
        config.retention.interval_secs = 0;
        assert!(validate_config(&config).is_ok());
    }
}
