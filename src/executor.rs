//! 执行器：驱动"排序 → 预留 → 调用 → 归类 → 轮转"的循环。
//!
//! 提供商 SDK 的实际调用以闭包形式由调用方传入，执行器对请求内容保持
//! 无知：它只负责挑凭证、记账、按错误类别决定换键还是终止。池的全部
//! 记账都在无挂起点的临界区内完成，IO 只发生在调用方闭包里。

use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;

use crate::credential::store::UsageStore;
use crate::credential::types::{Credential, ReserveToken};
use crate::error::{AttemptFailure, ExecuteError, FailureKind, OperationError};
use crate::pool::{self, PoolManager};
use crate::provider::Provider;

/// 操作闭包看到的凭证视图。完整密钥只在这里离开池，拿到后即与池内
/// 状态解耦。
#[derive(Clone)]
pub struct Attempt {
    pub secret: String,
    pub model: Option<String>,
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attempt")
            .field("secret", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// 操作闭包的返回值：结果 + 实际消耗的容量单位（None 表示按预估记账）。
pub type OperationOutcome<T> = Result<(T, Option<u64>), OperationError>;

/// 探活默认新鲜度：每个凭证至多一小时验证一次。
const DEFAULT_VALIDATE_TTL_SECS: i64 = 60 * 60;

/// 不带探活回调时 run 内部的占位闭包类型。
type NoProbe = fn(Attempt) -> std::future::Ready<Result<(), OperationError>>;

/// 凭证执行器。
///
/// 持有池与可选的持久化网关：凭证失效/停用这类显著状态变更后会在
/// 后台机会性落盘，绝不阻塞请求路径。克隆成本是两个 Arc。
#[derive(Clone)]
pub struct Executor {
    pool: Arc<PoolManager>,
    persistence: Option<Arc<UsageStore>>,
    validate_ttl: Duration,
}

impl Executor {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self {
            pool,
            persistence: None,
            validate_ttl: Duration::seconds(DEFAULT_VALIDATE_TTL_SECS),
        }
    }

    /// 挂接持久化网关。
    pub fn with_persistence(mut self, store: Arc<UsageStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// 覆盖探活新鲜度阈值。
    pub fn with_validate_ttl(mut self, ttl: Duration) -> Self {
        self.validate_ttl = ttl;
        self
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// 以 capacity 个容量单位执行一次操作，失败时按错误类别在池内轮转。
    ///
    /// 候选按当日占比升序逐个尝试：预留成功才调用闭包；闭包报
    /// InvalidCredential 则标记失效换下一个，QuotaExceeded 则暂时停用
    /// 换下一个，NonRecoverable 立即终止。成功时按闭包上报的实际消耗
    /// 校正预留。
    pub async fn execute<T, F, Fut>(
        &self,
        provider: Provider,
        capacity: u64,
        op: F,
    ) -> Result<T, ExecuteError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = OperationOutcome<T>>,
    {
        self.run(provider, capacity, None::<NoProbe>, op).await
    }

    /// 同 [`Self::execute`]，但在把长期未验证的凭证交给操作之前先用
    /// probe 闭包探活一次。探活失败的凭证按失效处理并跳过，不消耗
    /// 配额；探活成功的在 TTL 内不再重复探活。
    pub async fn execute_validated<T, V, VFut, F, Fut>(
        &self,
        provider: Provider,
        capacity: u64,
        probe: V,
        op: F,
    ) -> Result<T, ExecuteError>
    where
        V: FnMut(Attempt) -> VFut,
        VFut: Future<Output = Result<(), OperationError>>,
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = OperationOutcome<T>>,
    {
        self.run(provider, capacity, Some(probe), op).await
    }

    async fn run<T, V, VFut, F, Fut>(
        &self,
        provider: Provider,
        capacity: u64,
        mut probe: Option<V>,
        mut op: F,
    ) -> Result<T, ExecuteError>
    where
        V: FnMut(Attempt) -> VFut,
        VFut: Future<Output = Result<(), OperationError>>,
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = OperationOutcome<T>>,
    {
        let configured = self.pool.credential_count(provider);
        let ranked = pool::rank(&self.pool.credentials_for(provider), capacity, Utc::now());
        if ranked.is_empty() {
            tracing::warn!(
                provider = %provider,
                capacity,
                configured,
                "没有能承载本次请求的凭证"
            );
            return Err(ExecuteError::ExhaustedPool {
                provider,
                configured,
            });
        }

        let mut failures: Vec<AttemptFailure> = Vec::new();

        for cred in ranked {
            let now = Utc::now();

            if let Some(probe_fn) = probe.as_mut()
                && cred.needs_validation(self.validate_ttl, now)
            {
                match probe_fn(attempt_view(&cred)).await {
                    Ok(()) => cred.mark_validated(now),
                    Err(err) => {
                        tracing::warn!(
                            credential = %cred.id(),
                            provider = %provider,
                            error = %err,
                            "探活失败，凭证标记为失效"
                        );
                        cred.mark_invalid(format!("探活失败: {err}"), now);
                        self.spawn_flush("probe_failed");
                        failures.push(AttemptFailure {
                            credential: cred.preview().to_string(),
                            kind: FailureKind::InvalidCredential,
                            message: err.to_string(),
                        });
                        continue;
                    }
                }
            }

            // 排序只是参考：余量可能已被并发请求拿走，预留锁内的判定才算数。
            let Some(token) = cred.try_reserve(capacity, now) else {
                tracing::debug!(
                    credential = %cred.id(),
                    provider = %provider,
                    "预留失败（余量已被并发请求占用），跳过"
                );
                continue;
            };
            let mut reservation = Reservation::new(cred.clone(), token, capacity);

            match op(attempt_view(&cred)).await {
                Ok((value, consumed)) => {
                    reservation.settle(consumed, Utc::now());
                    cred.mark_validated(Utc::now());
                    tracing::debug!(
                        credential = %cred.id(),
                        provider = %provider,
                        reserved = capacity,
                        consumed = consumed.unwrap_or(capacity),
                        "请求成功"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    // 预留随失败立即回滚，失败的尝试不占配额。
                    drop(reservation);
                    match err.kind {
                        FailureKind::InvalidCredential => {
                            tracing::warn!(
                                credential = %cred.id(),
                                provider = %provider,
                                status = err.status,
                                error = %err,
                                "凭证被提供商拒绝，标记失效后换下一个"
                            );
                            cred.mark_invalid(err.message.clone(), Utc::now());
                            self.spawn_flush("credential_invalid");
                            failures.push(AttemptFailure {
                                credential: cred.preview().to_string(),
                                kind: err.kind,
                                message: err.message,
                            });
                        }
                        FailureKind::QuotaExceeded => {
                            tracing::warn!(
                                credential = %cred.id(),
                                provider = %provider,
                                status = err.status,
                                error = %err,
                                "提供商侧限流，暂时停用后换下一个"
                            );
                            cred.deactivate(err.message.clone());
                            self.spawn_flush("credential_deactivated");
                            failures.push(AttemptFailure {
                                credential: cred.preview().to_string(),
                                kind: err.kind,
                                message: err.message,
                            });
                        }
                        FailureKind::NonRecoverable => {
                            tracing::warn!(
                                credential = %cred.id(),
                                provider = %provider,
                                error = %err,
                                "不可换键重试的失败，终止本次执行"
                            );
                            return Err(ExecuteError::NonRecoverable {
                                provider,
                                attempted: failures.len() + 1,
                                source: err,
                            });
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            // 候选全部在预留一步被并发请求抢光，等同于池内无余量。
            return Err(ExecuteError::ExhaustedPool {
                provider,
                configured,
            });
        }
        tracing::warn!(
            provider = %provider,
            attempted = failures.len(),
            "候选凭证全部失败"
        );
        Err(ExecuteError::AllCandidatesFailed { provider, failures })
    }

    /// 显著状态变更后的机会性落盘：后台执行，失败只记日志。
    fn spawn_flush(&self, cause: &'static str) {
        let Some(store) = self.persistence.clone() else {
            return;
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let rows = pool.snapshot();
            if let Err(e) = store.flush(&rows).await {
                tracing::warn!(cause, error = ?e, "机会性落盘失败（忽略）");
            }
        });
    }
}

fn attempt_view(cred: &Credential) -> Attempt {
    Attempt {
        secret: cred.secret().to_string(),
        model: cred.model().map(str::to_string),
    }
}

/// 乐观预留的回滚守卫。
///
/// 预留在调用前生效，并发请求立即看到余量减少；操作失败或调用方中途
/// 取消（Future 被丢弃）时由 Drop 回滚；成功路径先 settle 校正为实际
/// 消耗、解除守卫。回滚与校正都凭预留回执进行，请求在途时滚动过的
/// 窗口不会被误扣。
struct Reservation {
    cred: Arc<Credential>,
    token: ReserveToken,
    amount: u64,
    armed: bool,
}

impl Reservation {
    fn new(cred: Arc<Credential>, token: ReserveToken, amount: u64) -> Self {
        Self {
            cred,
            token,
            amount,
            armed: true,
        }
    }

    fn settle(&mut self, consumed: Option<u64>, now: DateTime<Utc>) {
        self.cred
            .settle(self.token, self.amount, consumed.unwrap_or(self.amount), now);
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.cred.release(self.token, self.amount);
        }
    }
}

/// 主备组合：仅当主提供商"无余量或候选全部失败"时才切到备用提供商。
///
/// NonRecoverable 不触发兜底，请求自身有问题时换提供商只是把失败再演
/// 一遍。执行器状态机本身保持提供商无关，组合放在这一层。
pub async fn run_with_fallback<T, F, Fut, G, GFut>(
    executor: &Executor,
    primary: Provider,
    fallback: Provider,
    capacity: u64,
    primary_op: F,
    fallback_op: G,
) -> Result<T, ExecuteError>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = OperationOutcome<T>>,
    G: FnMut(Attempt) -> GFut,
    GFut: Future<Output = OperationOutcome<T>>,
{
    match executor.execute(primary, capacity, primary_op).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_retryable_later() => {
            tracing::info!(
                primary = %primary,
                fallback = %fallback,
                reason = %err,
                "主提供商不可用，切换兜底提供商"
            );
            executor.execute(fallback, capacity, fallback_op).await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(provider: &str, secret: &str, per_minute: u64, per_day: u64) -> PoolEntry {
        PoolEntry {
            provider: provider.to_string(),
            secret: secret.to_string(),
            model: None,
            max_per_minute: Some(per_minute),
            max_per_day: Some(per_day),
        }
    }

    fn pool_with(entries: &[PoolEntry]) -> Arc<PoolManager> {
        let pool = Arc::new(PoolManager::new());
        pool.load(entries, &[], Utc::now());
        pool
    }

    fn cred_by_secret(pool: &PoolManager, provider: Provider, secret: &str) -> Arc<Credential> {
        pool.credentials_for(provider)
            .into_iter()
            .find(|c| c.secret() == secret)
            .unwrap()
    }

    #[tokio::test]
    async fn success_on_first_candidate_settles_actual_usage() {
        let pool = pool_with(&[entry("gemini", "k1", 100, 1_000)]);
        let exec = Executor::new(pool.clone());

        let out = exec
            .execute(Provider::Gemini, 10, |attempt| async move {
                assert_eq!(attempt.secret, "k1");
                Ok(("ok".to_string(), Some(7)))
            })
            .await
            .unwrap();
        assert_eq!(out, "ok");

        let snap = cred_by_secret(&pool, Provider::Gemini, "k1").snapshot();
        assert_eq!(snap.used_today, 7);
        assert_eq!(snap.used_this_minute, 7);
        assert!(snap.last_validated_at.is_some());
    }

    #[tokio::test]
    async fn none_consumed_keeps_reserved_estimate() {
        let pool = pool_with(&[entry("gemini", "k1", 100, 1_000)]);
        let exec = Executor::new(pool.clone());

        exec.execute(Provider::Gemini, 10, |_| async move { Ok(((), None)) })
            .await
            .unwrap();

        let snap = cred_by_secret(&pool, Provider::Gemini, "k1").snapshot();
        assert_eq!(snap.used_today, 10);
    }

    #[tokio::test]
    async fn quota_failure_rotates_and_deactivates() {
        let pool = pool_with(&[
            entry("gemini", "k1", 100, 1_000),
            entry("gemini", "k2", 100, 1_000),
            entry("gemini", "k3", 100, 1_000),
        ]);
        let exec = Executor::new(pool.clone());
        let calls = AtomicUsize::new(0);

        let out = exec
            .execute(Provider::Gemini, 5, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt.secret == "k3" {
                        Ok((attempt.secret, Some(5)))
                    } else {
                        Err(OperationError::from_status(429, "rate limited"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out, "k3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // 限流的两个被暂时停用且不占配额；valid 不受影响。
        for secret in ["k1", "k2"] {
            let snap = cred_by_secret(&pool, Provider::Gemini, secret).snapshot();
            assert!(!snap.active);
            assert!(snap.valid);
            assert_eq!(snap.used_today, 0);
        }
        let snap = cred_by_secret(&pool, Provider::Gemini, "k3").snapshot();
        assert!(snap.active);
        assert_eq!(snap.used_today, 5);
    }

    #[tokio::test]
    async fn invalid_credential_is_marked_terminally() {
        let pool = pool_with(&[
            entry("gemini", "k1", 100, 1_000),
            entry("gemini", "k2", 100, 1_000),
        ]);
        let exec = Executor::new(pool.clone());

        let err = exec
            .execute(Provider::Gemini, 1, |_| async move {
                Err::<((), Option<u64>), _>(OperationError::from_status(401, "bad key"))
            })
            .await
            .unwrap_err();

        match &err {
            ExecuteError::AllCandidatesFailed { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(
                    failures
                        .iter()
                        .all(|f| f.kind == FailureKind::InvalidCredential)
                );
            }
            other => panic!("预期 AllCandidatesFailed，得到 {other:?}"),
        }

        for secret in ["k1", "k2"] {
            let snap = cred_by_secret(&pool, Provider::Gemini, secret).snapshot();
            assert!(!snap.valid);
            assert_eq!(snap.invalid_reason.as_deref(), Some("bad key"));
        }
        // 失效是终态：后续执行连尝试都不会发起。
        let err = exec
            .execute(Provider::Gemini, 1, |_| async move {
                Ok::<_, OperationError>(((), None))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::ExhaustedPool { configured: 2, .. }
        ));
    }

    #[tokio::test]
    async fn non_recoverable_aborts_without_burning_the_pool() {
        let pool = pool_with(&[
            entry("gemini", "k1", 100, 1_000),
            entry("gemini", "k2", 100, 1_000),
        ]);
        let exec = Executor::new(pool.clone());
        let calls = AtomicUsize::new(0);

        let err = exec
            .execute(Provider::Gemini, 1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<((), Option<u64>), _>(OperationError::from_status(400, "bad request"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            ExecuteError::NonRecoverable {
                attempted, source, ..
            } => {
                assert_eq!(attempted, 1);
                assert_eq!(source.kind, FailureKind::NonRecoverable);
            }
            other => panic!("预期 NonRecoverable，得到 {other:?}"),
        }

        // 另一个凭证毫发无损，且预留已回滚。
        for secret in ["k1", "k2"] {
            let snap = cred_by_secret(&pool, Provider::Gemini, secret).snapshot();
            assert!(snap.active);
            assert!(snap.valid);
            assert_eq!(snap.used_today, 0);
        }
    }

    #[tokio::test]
    async fn exhausted_pool_distinguishes_unconfigured_from_depleted() {
        let exec = Executor::new(pool_with(&[]));
        let err = exec
            .execute(Provider::Serper, 1, |_| async move {
                Ok::<_, OperationError>(((), None))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::ExhaustedPool { configured: 0, .. }
        ));

        let pool = pool_with(&[entry("serper", "s1", 10, 100)]);
        let exec = Executor::new(pool);
        let err = exec
            .execute(Provider::Serper, 50, |_| async move {
                Ok::<_, OperationError>(((), None))
            })
            .await
            .unwrap_err();
        // 凭证存在但承载不了 50。
        assert!(matches!(
            err,
            ExecuteError::ExhaustedPool { configured: 1, .. }
        ));
    }

    #[tokio::test]
    async fn least_loaded_candidate_goes_first() {
        let pool = pool_with(&[
            entry("gemini", "a", 10, 100),
            entry("gemini", "b", 10, 100),
        ]);
        // b 今天已用 5/100（之前的分钟窗口），a 还是 0：应先选 a。
        {
            let b = cred_by_secret(&pool, Provider::Gemini, "b");
            let mut row = b.snapshot();
            row.used_today = 5;
            b.restore(&row);
        }

        let exec = Executor::new(pool.clone());
        let out = exec
            .execute(Provider::Gemini, 3, |attempt| async move {
                Ok((attempt.secret, Some(3)))
            })
            .await
            .unwrap();
        assert_eq!(out, "a");

        // 同一分钟内再要 8：a 已用 3/10 分钟余量不足，应落到 b。
        let out = exec
            .execute(Provider::Gemini, 8, |attempt| async move {
                Ok((attempt.secret, Some(8)))
            })
            .await
            .unwrap();
        assert_eq!(out, "b");

        // 把两个凭证的分钟窗口拨回一分多钟前，模拟窗口滚动：
        // 当日占比 a 3% < b 13%，8 个单位重新落到 a。
        for secret in ["a", "b"] {
            let cred = cred_by_secret(&pool, Provider::Gemini, secret);
            let mut row = cred.snapshot();
            row.minute_window_start = row.minute_window_start - Duration::seconds(90);
            cred.restore(&row);
        }
        let out = exec
            .execute(Provider::Gemini, 8, |attempt| async move {
                Ok((attempt.secret, Some(8)))
            })
            .await
            .unwrap();
        assert_eq!(out, "a");
    }

    #[tokio::test]
    async fn failed_attempt_releases_reservation() {
        let pool = pool_with(&[entry("gemini", "k1", 10, 100)]);
        let exec = Executor::new(pool.clone());

        let cred = cred_by_secret(&pool, Provider::Gemini, "k1");
        let _ = exec
            .execute(Provider::Gemini, 10, |_| async move {
                Err::<((), Option<u64>), _>(OperationError::throttled("slow down"))
            })
            .await
            .unwrap_err();

        let snap = cred.snapshot();
        assert_eq!(snap.used_this_minute, 0);
        assert_eq!(snap.used_today, 0);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_rolls_back_reservation() {
        let pool = pool_with(&[entry("gemini", "k1", 10, 100)]);
        let exec = Executor::new(pool.clone());
        let cred = cred_by_secret(&pool, Provider::Gemini, "k1");

        let (started_tx, mut started_rx) = tokio::sync::mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            exec.execute(Provider::Gemini, 6, move |_| {
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(()).await;
                    // 挂起直到被取消。
                    std::future::pending::<()>().await;
                    Ok(((), None))
                }
            })
            .await
        });

        started_rx.recv().await.unwrap();
        // 操作在途：预留对并发请求立即可见。
        assert_eq!(cred.snapshot().used_today, 6);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        // Future 被丢弃后守卫回滚预留。
        assert_eq!(cred.snapshot().used_today, 0);
        assert_eq!(cred.snapshot().used_this_minute, 0);
    }

    #[tokio::test]
    async fn probe_invalidates_stale_credential_and_skips_it() {
        let pool = pool_with(&[
            entry("gemini", "bad", 100, 1_000),
            entry("gemini", "good", 100, 1_000),
        ]);
        let exec = Executor::new(pool.clone());
        let op_calls = AtomicUsize::new(0);

        let out = exec
            .execute_validated(
                Provider::Gemini,
                1,
                |attempt| async move {
                    if attempt.secret == "bad" {
                        Err(OperationError::from_status(401, "revoked"))
                    } else {
                        Ok(())
                    }
                },
                |attempt| {
                    op_calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok((attempt.secret, Some(1))) }
                },
            )
            .await
            .unwrap();

        assert_eq!(out, "good");
        assert_eq!(op_calls.load(Ordering::SeqCst), 1);

        let snap = cred_by_secret(&pool, Provider::Gemini, "bad").snapshot();
        assert!(!snap.valid);
        assert_eq!(snap.used_today, 0);
    }

    #[tokio::test]
    async fn probe_runs_once_within_ttl() {
        let pool = pool_with(&[entry("gemini", "k1", 100, 1_000)]);
        let exec = Executor::new(pool).with_validate_ttl(Duration::seconds(3600));
        let probes = AtomicUsize::new(0);

        for _ in 0..3 {
            exec.execute_validated(
                Provider::Gemini,
                1,
                |_| {
                    probes.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(()) }
                },
                |_| async move { Ok(((), Some(1))) },
            )
            .await
            .unwrap();
        }

        // 首次执行探活一次；之后成功调用刷新了 last_validated_at，TTL 内不再探活。
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_kicks_in_on_exhausted_primary() {
        let pool = pool_with(&[entry("ollama", "local", 100, 1_000)]);
        let exec = Executor::new(pool);

        let out = run_with_fallback(
            &exec,
            Provider::Gemini,
            Provider::Ollama,
            1,
            |_| async move { Ok(("primary".to_string(), None)) },
            |_| async move { Ok(("fallback".to_string(), None)) },
        )
        .await
        .unwrap();
        // gemini 没配置凭证（ExhaustedPool），应落到 ollama。
        assert_eq!(out, "fallback");
    }

    #[tokio::test]
    async fn fallback_is_skipped_on_non_recoverable() {
        let pool = pool_with(&[
            entry("gemini", "g1", 100, 1_000),
            entry("ollama", "local", 100, 1_000),
        ]);
        let exec = Executor::new(pool);
        let fallback_calls = AtomicUsize::new(0);

        let err = run_with_fallback(
            &exec,
            Provider::Gemini,
            Provider::Ollama,
            1,
            |_| async move {
                Err::<((), Option<u64>), _>(OperationError::non_recoverable("模型名不存在"))
            },
            |_| {
                fallback_calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(((), None)) }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExecuteError::NonRecoverable { .. }));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_executes_share_quota_without_overshoot() {
        let pool = pool_with(&[entry("gemini", "k1", 1_000, 50)]);
        let exec = Executor::new(pool.clone());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let exec = exec.clone();
            handles.push(tokio::spawn(async move {
                exec.execute(Provider::Gemini, 5, |_| async move {
                    Ok(((), Some(5)))
                })
                .await
                .is_ok()
            }));
        }

        let mut granted = 0usize;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }

        // 每日上限 50、每次 5：最多 10 个成功，其余拿到 ExhaustedPool。
        assert_eq!(granted, 10);
        let snap = cred_by_secret(&pool, Provider::Gemini, "k1").snapshot();
        assert_eq!(snap.used_today, 50);
    }
}
