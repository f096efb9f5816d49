use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumMessage};

/// 流、幂等标记、计数器和锁所使用的后端
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, EnumIter, AsRefStr, EnumMessage,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[strum(message = "Redis Stream + Lua scripts, required for multi-instance deployments")]
    Redis,
    #[strum(message = "In-process state, single instance only, lost on restart")]
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Invalid backend: '{}'. Valid: redis, memory", s)),
        }
    }
}

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 包含：
/// - database: 统计库连接配置
/// - redis: Redis 连接与 key 前缀
/// - logging: 日志配置
/// - stream: 消费组、消费者数量与 worker 池
/// - idempotency: 幂等标记 TTL
/// - stats: 统计写入相关参数
/// - recovery / retention: 两个定时任务
/// - analytics: GeoIP 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：LS，分隔符：__
    /// 示例：LS__REDIS__URL=redis://10.0.0.2:6379/
    pub fn load(path: &str) -> Self {
        use config::{Config, Environment, File};

        let builder = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖，前缀 LS，分隔符 __
            .add_source(
                Environment::with_prefix("LS")
                    .separator("__")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

/// 消费端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Stream key（不含前缀）
    #[serde(default = "default_stream_key")]
    pub key: String,
    #[serde(default = "default_stream_group")]
    pub group: String,
    /// 并行消费者数量，0 表示按 CPU 数 × 1.5 推算
    #[serde(default)]
    pub consumer_count: usize,
    /// 单次 XREADGROUP 拉取条数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// XREADGROUP BLOCK 超时（毫秒），同时决定关闭信号的检查间隔
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// worker 池大小，0 表示与消费者数量相同
    #[serde(default)]
    pub max_workers: usize,
    /// 吞吐量日志间隔（秒）
    #[serde(default = "default_throughput_log_interval")]
    pub throughput_log_interval_secs: u64,
}

/// 幂等标记配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// 处理中标记 TTL（秒）
    #[serde(default = "default_processing_ttl")]
    pub processing_ttl_secs: u64,
    /// 已完成标记 TTL（秒）
    #[serde(default = "default_accomplished_ttl")]
    pub accomplished_ttl_secs: u64,
}

/// 统计写入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// 日期分桶所用时区偏移（秒），默认 +08:00
    #[serde(default = "default_utc_offset")]
    pub utc_offset_secs: i32,
    /// UV/UIP HyperLogLog 的 TTL（秒）
    #[serde(default = "default_hll_ttl")]
    pub hll_ttl_secs: u64,
    #[serde(default = "default_gid_cache_capacity")]
    pub gid_cache_capacity: u64,
    #[serde(default = "default_gid_cache_ttl")]
    pub gid_cache_ttl_secs: u64,
    /// 等待 gid 读锁的最长时间（毫秒）
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// 读锁租约（毫秒），持有者崩溃后自动过期
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,
}

/// PEL 巡检任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_recovery_interval")]
    pub interval_secs: u64,
    /// 超过该空闲时间的 Pending 消息才会被认领（毫秒）
    #[serde(default = "default_min_idle_ms")]
    pub min_idle_ms: u64,
    #[serde(default = "default_claim_count")]
    pub claim_count: usize,
    #[serde(default = "default_claimant")]
    pub claimant: String,
    /// 游标 key（不含前缀）
    #[serde(default = "default_cursor_key")]
    pub cursor_key: String,
}

/// Stream 清理任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
    /// 保留的已消费消息缓冲
    #[serde(default = "default_keep_count")]
    pub keep_count: u64,
}

/// 分析统计配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// 是否查询 IP 地理位置
    #[serde(default = "default_true")]
    pub enable_geo_lookup: bool,

    /// MaxMindDB 文件路径 (GeoLite2-City.mmdb)
    /// 如果配置且文件可读，使用本地解析；否则 fallback 到外部 API
    #[serde(default)]
    pub maxminddb_path: Option<String>,

    /// 外部 GeoIP API URL (fallback)
    /// 使用 {ip} 作为占位符
    #[serde(default = "default_geoip_api_url")]
    pub geoip_api_url: String,
}

// ============================================================
// Default value functions
// ============================================================

fn default_true() -> bool {
    true
}

fn default_database_url() -> String {
    "linkstats.db".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key_prefix() -> String {
    "short-link:".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

fn default_stream_key() -> String {
    "stats-stream".to_string()
}

fn default_stream_group() -> String {
    "stats-group".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_block_ms() -> u64 {
    500
}

fn default_throughput_log_interval() -> u64 {
    300
}

fn default_processing_ttl() -> u64 {
    120
}

fn default_accomplished_ttl() -> u64 {
    86_400
}

fn default_utc_offset() -> i32 {
    8 * 3600
}

fn default_hll_ttl() -> u64 {
    86_400
}

fn default_gid_cache_capacity() -> u64 {
    10_000
}

fn default_gid_cache_ttl() -> u64 {
    600
}

fn default_lock_wait_ms() -> u64 {
    3000
}

fn default_lock_lease_ms() -> u64 {
    30_000
}

fn default_recovery_interval() -> u64 {
    30
}

fn default_min_idle_ms() -> u64 {
    120_000
}

fn default_claim_count() -> usize {
    200
}

fn default_claimant() -> String {
    "stats-recoverer".to_string()
}

fn default_cursor_key() -> String {
    "stats-stream:recover-cursor".to_string()
}

fn default_retention_interval() -> u64 {
    300
}

fn default_keep_count() -> u64 {
    3000
}

fn default_geoip_api_url() -> String {
    "http://ip-api.com/json/{ip}?fields=status,countryCode,regionName,city,isp".to_string()
}

// ============================================================
// Default implementations
// ============================================================

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            key: default_stream_key(),
            group: default_stream_group(),
            consumer_count: 0,
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            max_workers: 0,
            throughput_log_interval_secs: default_throughput_log_interval(),
        }
    }
}

impl StreamConfig {
    /// 实际消费者数量：每 CPU ≈1.5 个，向下取整，至少 1 个
    pub fn effective_consumer_count(&self) -> usize {
        if self.consumer_count > 0 {
            return self.consumer_count;
        }
        (num_cpus::get() * 3 / 2).max(1)
    }

    /// 实际 worker 池大小
    pub fn effective_max_workers(&self) -> usize {
        if self.max_workers > 0 {
            self.max_workers
        } else {
            self.effective_consumer_count()
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            processing_ttl_secs: default_processing_ttl(),
            accomplished_ttl_secs: default_accomplished_ttl(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            utc_offset_secs: default_utc_offset(),
            hll_ttl_secs: default_hll_ttl(),
            gid_cache_capacity: default_gid_cache_capacity(),
            gid_cache_ttl_secs: default_gid_cache_ttl(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_lease_ms: default_lock_lease_ms(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_recovery_interval(),
            min_idle_ms: default_min_idle_ms(),
            claim_count: default_claim_count(),
            claimant: default_claimant(),
            cursor_key: default_cursor_key(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_retention_interval(),
            keep_count: default_keep_count(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enable_geo_lookup: true,
            maxminddb_path: None,
            geoip_api_url: default_geoip_api_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("redis".parse::<BackendKind>(), Ok(BackendKind::Redis));
        assert_eq!("MEMORY".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert!("kafka".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Memory.to_string(), "memory");
    }

    #[test]
    fn test_effective_consumer_count() {
        let mut stream = StreamConfig::default();
        assert!(stream.effective_consumer_count() >= 1);
        assert_eq!(
            stream.effective_max_workers(),
            stream.effective_consumer_count()
        );

        stream.consumer_count = 3;
        stream.max_workers = 8;
        assert_eq!(stream.effective_consumer_count(), 3);
        assert_eq!(stream.effective_max_workers(), 8);
    }

    #[test]
    fn test_sample_config_round_trip() {
        let sample = StaticConfig::generate_sample_config();
        let parsed: StaticConfig = toml::from_str(&sample).expect("sample config should parse");
        assert_eq!(parsed.stream.batch_size, 100);
        assert_eq!(parsed.retention.keep_count, 3000);
        assert_eq!(parsed.recovery.claimant, "stats-recoverer");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("linkstats.toml");
        std::fs::write(
            &path,
            "[stream]\nbackend = \"memory\"\nbatch_size = 10\n\n[retention]\nkeep_count = 5\n",
        )
        .unwrap();

        let config = StaticConfig::load(path.to_str().unwrap());
        assert_eq!(config.stream.backend, BackendKind::Memory);
        assert_eq!(config.stream.batch_size, 10);
        assert_eq!(config.retention.keep_count, 5);
        // 未配置的字段使用默认值
        assert_eq!(config.stats.utc_offset_secs, 8 * 3600);
    }
}
