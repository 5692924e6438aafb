//! 凭证池模块。
//!
//! 目标：把同一提供商的多个密钥组织成一个池，按"当日占比最低"挑选
//! 承载请求的凭证，并把静态配置与落盘的运行时状态合并成一份视图。

mod manager;
mod selector;

pub use manager::{LoadSummary, PoolEntry, PoolManager};
pub use selector::rank;
