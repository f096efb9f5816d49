//! 统计消息消费
//!
//! - `handler`: 单条消息的幂等处理
//! - `pool`: caller-runs 有界工作池
//! - `dispatcher`: 多消费者读取循环与吞吐统计

pub mod dispatcher;
pub mod handler;
pub mod pool;

pub use dispatcher::{Dispatcher, DispatcherSnapshot, DispatcherStats};
pub use handler::{HandleOutcome, MessageHandler};
pub use pool::{Submission, WorkerPool};
