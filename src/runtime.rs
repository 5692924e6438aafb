//! 装配入口：按配置把池、持久化网关、执行器组装成一套运行时。
//!
//! 所有组件都显式接收依赖（Arc 注入），库内部不读任何全局状态；
//! 进程级的 OnceLock 持有器只是给嵌入方的薄便利层，测试各自组装
//! 各自的运行时，互不串扰。

use chrono::Utc;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::config::Config;
use crate::credential::flush_task;
use crate::credential::store::UsageStore;
use crate::executor::Executor;
use crate::pool::{LoadSummary, PoolEntry, PoolManager};

/// 一套装配完成的凭证池运行时。
#[derive(Clone)]
pub struct PoolRuntime {
    pub config: Config,
    pub pool: Arc<PoolManager>,
    pub store: Arc<UsageStore>,
    pub executor: Executor,
}

/// 按配置装配运行时：读取存储行恢复状态、装载凭证池、启动周期落盘。
///
/// 存储读取失败只告警不中断，持久化从来不是正确性依赖；配置条目
/// 全部无效时同样照常启动（池为空，所有执行拿到 ExhaustedPool）。
pub async fn bootstrap(config: Config) -> PoolRuntime {
    let store = Arc::new(UsageStore::new(&config.data_dir));
    let rows = match store.load().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("读取用量存储失败（以空状态启动）：{e:#}");
            Vec::new()
        }
    };

    let pool = Arc::new(PoolManager::new());
    let summary = pool.load(&config.pool_keys, &rows, Utc::now());
    if summary.added == 0 && summary.restored == 0 {
        tracing::warn!("凭证池为空：POOL_KEYS 未配置或条目全部被丢弃");
    }

    flush_task::spawn_flush_task(
        pool.clone(),
        store.clone(),
        Duration::from_secs(config.flush_interval_secs),
    );

    // chrono 的时长以 i64 毫秒为界，秒数按毫秒上限收紧，配置再大也不越界。
    let ttl_secs = config.validate_ttl_secs.min((i64::MAX / 1_000) as u64) as i64;
    let executor = Executor::new(pool.clone())
        .with_persistence(store.clone())
        .with_validate_ttl(chrono::Duration::seconds(ttl_secs));

    PoolRuntime {
        config,
        pool,
        store,
        executor,
    }
}

impl PoolRuntime {
    /// 按需刷新：把新一批配置条目合并进池。
    ///
    /// 刻意不重读存储行：磁盘快照落后于内存，拿它覆盖会吃掉运行中的
    /// 用量。存储行只在 [`bootstrap`] 时参与装载。
    pub fn refresh(&self, entries: &[PoolEntry]) -> LoadSummary {
        self.pool.load(entries, &[], Utc::now())
    }

    /// 优雅退出前的最终落盘。
    pub async fn shutdown_flush(&self) {
        let rows = self.pool.snapshot();
        if let Err(e) = self.store.flush(&rows).await {
            tracing::warn!("退出前落盘失败：{e:#}");
        }
    }
}

/// 进程级持有器。
static RUNTIME: OnceLock<PoolRuntime> = OnceLock::new();

/// 注册进程级运行时（应用入口装配后调用一次，重复调用是空操作）。
pub fn init_global(runtime: PoolRuntime) {
    let _ = RUNTIME.set(runtime);
}

/// 获取进程级运行时。未注册时返回 None；库内部从不调用它。
pub fn global() -> Option<&'static PoolRuntime> {
    RUNTIME.get()
}
