//! 后台落盘任务：周期性把池内凭证状态写入备份存储。

use std::sync::Arc;
use std::time::Duration;

use crate::credential::store::UsageStore;
use crate::pool::PoolManager;

/// 启动周期落盘任务。interval 为 0 时不启动，由调用方自行安排落盘
/// 时机（例如只依赖显著变更后的机会性落盘）。
pub fn spawn_flush_task(pool: Arc<PoolManager>, store: Arc<UsageStore>, interval: Duration) {
    if interval.is_zero() {
        tracing::info!("周期落盘任务未启动（间隔为 0）");
        return;
    }
    // 间隔夹在 [1 秒, 30 分钟]，极端配置既不空转也不长期不落盘。
    let interval = interval.clamp(Duration::from_secs(1), Duration::from_secs(30 * 60));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let rows = pool.snapshot();
            match store.flush(&rows).await {
                Ok(()) => {
                    tracing::debug!(credentials = rows.len(), "周期落盘完成");
                }
                Err(e) => {
                    tracing::warn!("周期落盘失败（下一轮重试）：{e:#}");
                }
            }
        }
    });
}
