use std::fmt;

#[derive(Debug, Clone)]
pub enum StatsError {
    CacheConnection(String),
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    StreamOperation(String),
    Script(String),
    Idempotency(String),
    /// 同一消息的另一次处理尚未完成，需要消息队列重试
    InFlight(String),
    Lock(String),
    Decode(String),
    Serialization(String),
    Validation(String),
    NotFound(String),
    FileOperation(String),
}

impl StatsError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            StatsError::CacheConnection(_) => "E001",
            StatsError::DatabaseConfig(_) => "E002",
            StatsError::DatabaseConnection(_) => "E003",
            StatsError::DatabaseOperation(_) => "E004",
            StatsError::StreamOperation(_) => "E005",
            StatsError::Script(_) => "E006",
            StatsError::Idempotency(_) => "E007",
            StatsError::InFlight(_) => "E008",
            StatsError::Lock(_) => "E009",
            StatsError::Decode(_) => "E010",
            StatsError::Serialization(_) => "E011",
            StatsError::Validation(_) => "E012",
            StatsError::NotFound(_) => "E013",
            StatsError::FileOperation(_) => "E014",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            StatsError::CacheConnection(_) => "Cache Connection Error",
            StatsError::DatabaseConfig(_) => "Database Configuration Error",
            StatsError::DatabaseConnection(_) => "Database Connection Error",
            StatsError::DatabaseOperation(_) => "Database Operation Error",
            StatsError::StreamOperation(_) => "Stream Operation Error",
            StatsError::Script(_) => "Script Execution Error",
            StatsError::Idempotency(_) => "Idempotency Marker Error",
            StatsError::InFlight(_) => "Message In Flight",
            StatsError::Lock(_) => "Lock Error",
            StatsError::Decode(_) => "Payload Decode Error",
            StatsError::Serialization(_) => "Serialization Error",
            StatsError::Validation(_) => "Validation Error",
            StatsError::NotFound(_) => "Resource Not Found",
            StatsError::FileOperation(_) => "File Operation Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            StatsError::CacheConnection(msg)
            | StatsError::DatabaseConfig(msg)
            | StatsError::DatabaseConnection(msg)
            | StatsError::DatabaseOperation(msg)
            | StatsError::StreamOperation(msg)
            | StatsError::Script(msg)
            | StatsError::Idempotency(msg)
            | StatsError::InFlight(msg)
            | StatsError::Lock(msg)
            | StatsError::Decode(msg)
            | StatsError::Serialization(msg)
            | StatsError::Validation(msg)
            | StatsError::NotFound(msg)
            | StatsError::FileOperation(msg) => msg,
        }
    }

    /// 是否为"处理中冲突"：消息应留在 PEL 中等待重投或认领
    pub fn is_in_flight(&self) -> bool {
        matches!(self, StatsError::InFlight(_))
    }

    /// 格式化为彩色输出（用于启动失败时的终端提示）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for StatsError {}

// 便捷的构造函数
impl StatsError {
    pub fn cache_connection<T: Into<String>>(msg: T) -> Self {
        StatsError::CacheConnection(msg.into())
    }

    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        StatsError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        StatsError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        StatsError::DatabaseOperation(msg.into())
    }

    pub fn stream_operation<T: Into<String>>(msg: T) -> Self {
        StatsError::StreamOperation(msg.into())
    }

    pub fn script<T: Into<String>>(msg: T) -> Self {
        StatsError::Script(msg.into())
    }

    pub fn idempotency<T: Into<String>>(msg: T) -> Self {
        StatsError::Idempotency(msg.into())
    }

    pub fn in_flight<T: Into<String>>(msg: T) -> Self {
        StatsError::InFlight(msg.into())
    }

    pub fn lock<T: Into<String>>(msg: T) -> Self {
        StatsError::Lock(msg.into())
    }

    pub fn decode<T: Into<String>>(msg: T) -> Self {
        StatsError::Decode(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        StatsError::Serialization(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        StatsError::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        StatsError::NotFound(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        StatsError::FileOperation(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for StatsError {
    fn from(err: sea_orm::DbErr) -> Self {
        StatsError::DatabaseOperation(err.to_string())
    }
}

impl From<redis::RedisError> for StatsError {
    fn from(err: redis::RedisError) -> Self {
        StatsError::CacheConnection(err.to_string())
    }
}

impl From<std::io::Error> for StatsError {
    fn from(err: std::io::Error) -> Self {
        StatsError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(err: serde_json::Error) -> Self {
        StatsError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            StatsError::cache_connection("a"),
            StatsError::database_config("a"),
            StatsError::database_connection("a"),
            StatsError::database_operation("a"),
            StatsError::stream_operation("a"),
            StatsError::script("a"),
            StatsError::idempotency("a"),
            StatsError::in_flight("a"),
            StatsError::lock("a"),
            StatsError::decode("a"),
            StatsError::serialization("a"),
            StatsError::validation("a"),
            StatsError::not_found("a"),
            StatsError::file_operation("a"),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_in_flight_detection() {
        assert!(StatsError::in_flight("1-0").is_in_flight());
        assert!(!StatsError::database_operation("boom").is_in_flight());
    }

    #[test]
    fn test_format_simple() {
        let err = StatsError::decode("missing fullShortUrl");
        assert_eq!(
            err.format_simple(),
            "Payload Decode Error: missing fullShortUrl"
        );
        assert_eq!(err.to_string(), err.format_simple());
    }

    #[test]
    fn test_format_colored_keeps_code_and_message() {
        let err = StatsError::file_operation("cannot open logs/linkstats.log");
        let text = err.format_colored();
        assert!(text.contains("[ERROR]"));
        assert!(text.contains(err.code()));
        assert!(text.contains(err.error_type()));
        assert!(text.contains("cannot open logs/linkstats.log"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: StatsError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), "E011");
    }
}
