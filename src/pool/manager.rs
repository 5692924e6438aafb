use anyhow::anyhow;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::credential::types::{Credential, CredentialStatus, StoredCredential};
use crate::provider::Provider;

/// 待装载的静态配置条目。provider 保留原始字符串：未知名称在装载时
/// 丢弃并告警，而不是在解析配置时让整个启动失败。
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub provider: String,
    pub secret: String,
    pub model: Option<String>,
    pub max_per_minute: Option<u64>,
    pub max_per_day: Option<u64>,
}

/// 一次装载/刷新的统计，进日志也供测试断言。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// 新建的凭证数。
    pub added: usize,
    /// 已存在、仅刷新限额的凭证数。
    pub updated: usize,
    /// 从存储行恢复了运行时状态的凭证数。
    pub restored: usize,
    /// 因提供商未知或条目残缺而丢弃的条目数。
    pub dropped: usize,
}

/// 凭证池：按提供商持有凭证列表。
///
/// 列表保持插入顺序（只作并列时的稳定次序）；凭证本身以 Arc 共享，
/// 任何持有者对状态的变更全池立即可见。外层读写锁只保护映射结构，
/// 凭证状态由各自内部的锁保护；加锁顺序固定为先池锁后凭证锁（装载
/// 与快照在持有池锁期间逐个短暂取凭证锁），凭证代码从不反向取池锁。
pub struct PoolManager {
    inner: RwLock<HashMap<Provider, Vec<Arc<Credential>>>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// 合并静态配置与存储行。幂等，可重复调用实现按需刷新。
    ///
    /// 去重键为 (provider, secret)。限额冲突时配置优先（限额是静态
    /// 事实）；用量与开关位以存储为准（它们是运行时状态）。只存在于
    /// 存储中的凭证照常进池，装载从不删除凭证。
    pub fn load(
        &self,
        entries: &[PoolEntry],
        rows: &[StoredCredential],
        now: DateTime<Utc>,
    ) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let mut inner = self.inner.write();

        for entry in entries {
            let secret = entry.secret.trim();
            if secret.is_empty() {
                summary.dropped += 1;
                tracing::warn!(provider = %entry.provider, "忽略密钥为空的配置条目");
                continue;
            }
            let Some(provider) = Provider::parse(&entry.provider) else {
                summary.dropped += 1;
                tracing::warn!(provider = %entry.provider, "忽略提供商未知的配置条目");
                continue;
            };

            let (default_minute, default_day) = provider.default_limits();
            let max_per_minute = entry.max_per_minute.unwrap_or(default_minute);
            let max_per_day = entry.max_per_day.unwrap_or(default_day);

            let list = inner.entry(provider).or_default();
            if let Some(existing) = list.iter().find(|c| c.secret() == secret) {
                existing.update_limits(max_per_minute, max_per_day);
                summary.updated += 1;
                continue;
            }
            list.push(Arc::new(Credential::new(
                provider,
                secret.to_string(),
                entry.model.clone(),
                max_per_minute,
                max_per_day,
                now,
            )));
            summary.added += 1;
        }

        for row in rows {
            let Some(provider) = Provider::parse(&row.provider) else {
                summary.dropped += 1;
                tracing::warn!(provider = %row.provider, "忽略提供商未知的存储行");
                continue;
            };
            // 存储文件允许手工编辑，密钥先去空白再参与去重，
            // 免得空白差异凭空造出第二个凭证。
            let secret = row.secret.trim();
            if secret.is_empty() {
                summary.dropped += 1;
                continue;
            }

            let list = inner.entry(provider).or_default();
            if let Some(existing) = list.iter().find(|c| c.secret() == secret) {
                existing.restore(row);
                summary.restored += 1;
            } else {
                list.push(Arc::new(Credential::from_stored(provider, row)));
                summary.added += 1;
            }
        }

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            restored = summary.restored,
            dropped = summary.dropped,
            "凭证池装载完成"
        );
        summary
    }

    /// 该提供商的凭证句柄列表（浅拷贝，持有期间不占池锁）。
    pub fn credentials_for(&self, provider: Provider) -> Vec<Arc<Credential>> {
        let inner = self.inner.read();
        inner.get(&provider).cloned().unwrap_or_default()
    }

    pub fn credential_count(&self, provider: Provider) -> usize {
        let inner = self.inner.read();
        inner.get(&provider).map_or(0, Vec::len)
    }

    /// 全池持久化快照。逐凭证短暂加锁复制，输出按提供商名排序，
    /// 文件内容稳定便于人工查看。
    pub fn snapshot(&self) -> Vec<StoredCredential> {
        let inner = self.inner.read();
        let mut providers: Vec<Provider> = inner.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());

        let mut rows = Vec::new();
        for provider in providers {
            if let Some(list) = inner.get(&provider) {
                rows.extend(list.iter().map(|c| c.snapshot()));
            }
        }
        rows
    }

    /// 管理接口：该提供商所有凭证的状态视图。
    pub fn status(&self, provider: Provider, now: DateTime<Utc>) -> Vec<CredentialStatus> {
        self.credentials_for(provider)
            .iter()
            .map(|c| c.status_view(now))
            .collect()
    }

    /// 管理接口：按密钥摘要重新启用凭证。
    ///
    /// 只翻转 active。valid=false 的凭证需要运维确认密钥确实恢复后
    /// 直接修正存储文件并重新装载，这里不提供捷径。
    pub fn reactivate(&self, provider: Provider, preview: &str) -> anyhow::Result<()> {
        let preview = preview.trim();
        if preview.is_empty() {
            return Err(anyhow!("密钥摘要为空"));
        }

        let credentials = self.credentials_for(provider);
        let Some(cred) = credentials.iter().find(|c| c.preview() == preview) else {
            return Err(anyhow!("未找到摘要为 {preview} 的凭证（提供商 {provider}）"));
        };

        cred.reactivate();
        if !cred.is_usable() {
            tracing::warn!(
                credential = %cred.id(),
                provider = %provider,
                "凭证已标记失效，重新启用不会让它重新入选"
            );
        } else {
            tracing::info!(credential = %cred.id(), provider = %provider, "凭证已重新启用");
        }
        Ok(())
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}
