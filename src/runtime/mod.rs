//! 生命周期与运行模式
//!
//! - `lifetime`: 启动装配与优雅关闭
//! - `modes`: 消费服务与事件发布

pub mod lifetime;
pub mod modes;
