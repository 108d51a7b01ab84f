//! # 检验数据存储模块
//!
//! 定义医嘱仓储接口（乐观锁更新、按日原子序号），并提供内存实现和 PostgreSQL 实现。

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod repository;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryRepository;
pub use postgres::PgRepository;
pub use repository::{OrderRepository, PriorValue};
