//! 统计写入
//!
//! 一条访问事件在一个数据库事务里落成：首次访问判定、访问日志、
//! 五个维度汇总、小时访问汇总，以及链接聚合累加。
//!
//! - `record`: 事件载荷
//! - `bucket`: 本地日期 / 小时 / 星期 / 单双日桶
//! - `aggregate`: gid 缓存 + 读锁兜底的链接聚合更新
//! - `writer`: 事务编排

pub mod aggregate;
pub mod bucket;
pub mod record;
pub mod writer;

use std::fmt;

use sea_orm::DbErr;

use crate::errors::StatsError;
use crate::storage::backend::retry::Transient;

pub use aggregate::{AggregateDelta, AggregateOutcome, LinkAggregator};
pub use bucket::TimeBucket;
pub use record::{STATS_RECORD_FIELD, StatsRecord};
pub use writer::{SaveOutcome, StatsWriter};

/// 缺失维度在汇总表里的取值
pub const UNKNOWN_DIMENSION: &str = "unknown";

/// 事务内的错误
///
/// 保留原始 `DbErr`，重试器据此判断死锁、锁超时等瞬时错误
#[derive(Debug)]
pub enum WriteError {
    Db(DbErr),
    Stats(StatsError),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Db(e) => write!(f, "{}", e),
            WriteError::Stats(e) => write!(f, "{}", e),
        }
    }
}

impl Transient for WriteError {
    fn is_transient(&self) -> bool {
        match self {
            WriteError::Db(e) => e.is_transient(),
            WriteError::Stats(_) => false,
        }
    }
}

impl From<DbErr> for WriteError {
    fn from(err: DbErr) -> Self {
        WriteError::Db(err)
    }
}

impl From<StatsError> for WriteError {
    fn from(err: StatsError) -> Self {
        WriteError::Stats(err)
    }
}

impl From<WriteError> for StatsError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Db(e) => e.into(),
            WriteError::Stats(e) => e,
        }
    }
}

/// 维度取值：空白归为 `unknown`
pub(crate) fn dimension(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_DIMENSION)
        .to_string()
}
