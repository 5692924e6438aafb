//! 凭证模块：单个密钥的配额/有效性状态、持久化网关与后台落盘任务。

pub mod flush_task;
pub mod store;
pub mod types;
