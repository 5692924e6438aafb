use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::credential::types::StoredCredential;

/// 用量持久化网关：把全池凭证状态整体落盘为一个 JSON 文件，进程重启后
/// 配额窗口得以延续。
///
/// 只负责磁盘 IO，不持有任何内存状态：内存里的池永远是唯一事实，落盘
/// 是尽力而为的备份，任何 IO 失败都不影响池的正确性。
#[derive(Debug)]
pub struct UsageStore {
    file_path: PathBuf,
}

impl UsageStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: data_dir.as_ref().join("credential_usage.json"),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// 读取全部存储行。文件尚不存在视为空集（首次启动）；文件损坏时
    /// 返回错误，由调用方决定是否以空状态继续。
    pub async fn load(&self) -> anyhow::Result<Vec<StoredCredential>> {
        let data = match tokio::fs::read(&self.file_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("读取 credential_usage.json 失败"),
        };
        sonic_rs::from_slice(&data).context("解析 credential_usage.json 失败")
    }

    /// 覆盖写入全部行（快照式，文件内容始终是某一时刻的完整池状态）。
    pub async fn flush(&self, rows: &[StoredCredential]) -> anyhow::Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let data = sonic_rs::to_vec_pretty(rows).context("序列化 credential_usage.json 失败")?;
        tokio::fs::write(&self.file_path, data)
            .await
            .context("写入 credential_usage.json 失败")
    }
}

async fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(dir)
        .await
        .context("创建数据目录失败")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::types::Credential;
    use crate::provider::Provider;
    use chrono::Utc;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("keypool-store-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let store = UsageStore::new(temp_dir());
        let rows = store.load().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn flush_then_load_round_trips_rows() {
        let dir = temp_dir();
        let store = UsageStore::new(&dir);

        let now = Utc::now();
        let cred = Credential::new(
            Provider::Tavily,
            "tvly-abc".to_string(),
            None,
            100,
            1_000,
            now,
        );
        assert!(cred.try_reserve(42, now).is_some());
        cred.deactivate("限流避让");

        store.flush(&[cred.snapshot()]).await.unwrap();

        let rows = store.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "tavily");
        assert_eq!(rows[0].secret, "tvly-abc");
        assert_eq!(rows[0].used_today, 42);
        assert!(!rows[0].active);
        assert!(rows[0].valid);
        assert_eq!(rows[0].disabled_reason.as_deref(), Some("限流避让"));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn flush_overwrites_previous_snapshot() {
        let dir = temp_dir();
        let store = UsageStore::new(&dir);
        let now = Utc::now();

        let a = Credential::new(Provider::Gemini, "k1".to_string(), None, 10, 100, now);
        let b = Credential::new(Provider::Gemini, "k2".to_string(), None, 10, 100, now);
        store.flush(&[a.snapshot(), b.snapshot()]).await.unwrap();
        store.flush(&[a.snapshot()]).await.unwrap();

        let rows = store.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].secret, "k1");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn corrupted_file_surfaces_parse_error() {
        let dir = temp_dir();
        let store = UsageStore::new(&dir);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(store.file_path(), b"{definitely not json")
            .await
            .unwrap();

        assert!(store.load().await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
