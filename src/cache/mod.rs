//! Redis 连接与返回值解析

pub mod redis;

pub use self::redis::RedisStore;
