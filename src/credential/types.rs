use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::provider::Provider;
use crate::util::id;

fn minute_window() -> Duration {
    Duration::seconds(60)
}

fn day_window() -> Duration {
    Duration::hours(24)
}

/// 单个 API 密钥及其配额/有效性状态。
///
/// 全部可变状态集中在一把锁后面：窗口滚动、预留、标记失效都在同一临界
/// 区内完成，临界区内没有任何挂起点。`try_reserve` 把"检查 + 记账"合并
/// 为一次原子操作，并发调用不可能联合越过配额上限。
pub struct Credential {
    id: String,
    provider: Provider,
    secret: String,
    model: Option<String>,
    preview: String,
    state: Mutex<QuotaState>,
}

/// 锁内的配额与开关状态。
#[derive(Debug, Clone)]
struct QuotaState {
    max_per_minute: u64,
    max_per_day: u64,
    used_this_minute: u64,
    minute_window_start: DateTime<Utc>,
    used_today: u64,
    day_window_start: DateTime<Utc>,
    /// 运行时开关：限流后暂时停用，可被管理接口重新启用。
    active: bool,
    /// 有效性：提供商拒绝过该密钥即永久置 false，不会自动恢复。
    valid: bool,
    last_validated_at: Option<DateTime<Utc>>,
    disabled_reason: Option<String>,
    invalid_reason: Option<String>,
    invalidated_at: Option<DateTime<Utc>>,
}

/// 预留回执：记录预留发生时两个窗口各自的起点。
///
/// 回滚与校正都凭回执进行。窗口滚动清零计数时，落在旧窗口里的预留
/// 已随之消失；此后若仍按数量减扣，抹掉的只会是新窗口里其他请求的
/// 预留。起点只会单调前移，起点相同即同一个窗口。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveToken {
    minute_window_start: DateTime<Utc>,
    day_window_start: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        provider: Provider,
        secret: String,
        model: Option<String>,
        max_per_minute: u64,
        max_per_day: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let preview = id::secret_preview(provider.as_str(), &secret);
        Self {
            id: id::credential_id(),
            provider,
            secret,
            model,
            preview,
            state: Mutex::new(QuotaState {
                max_per_minute,
                max_per_day,
                used_this_minute: 0,
                minute_window_start: now,
                used_today: 0,
                day_window_start: now,
                active: true,
                valid: true,
                last_validated_at: None,
                disabled_reason: None,
                invalid_reason: None,
                invalidated_at: None,
            }),
        }
    }

    /// 从存储行重建凭证：该 (provider, secret) 未出现在静态配置中，
    /// 限额只能取行内记录的值。密钥先去除首尾空白（存储文件允许手工
    /// 编辑，空白不应制造出另一个凭证）。
    pub fn from_stored(provider: Provider, row: &StoredCredential) -> Self {
        let cred = Self::new(
            provider,
            row.secret.trim().to_string(),
            row.model.clone(),
            row.max_per_minute,
            row.max_per_day,
            row.minute_window_start,
        );
        cred.restore(row);
        cred
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// 密钥摘要（管理接口用它定位凭证，日志里也只出现它）。
    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// 完整密钥。只在执行器把凭证交给操作闭包的那一刻离开池。
    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    /// 当前能否承载 n 个容量单位（先做惰性窗口滚动再判断）。
    pub fn can_serve(&self, n: u64, now: DateTime<Utc>) -> bool {
        let mut st = self.state.lock();
        st.roll(now);
        st.admits(n)
    }

    /// 选择器专用：一次加锁同时完成资格检查与当日占比读取。
    /// 不合格（停用/失效/余量不足）返回 None。
    pub(crate) fn probe_fraction(&self, n: u64, now: DateTime<Utc>) -> Option<f64> {
        let mut st = self.state.lock();
        st.roll(now);
        if !st.admits(n) {
            return None;
        }
        Some(st.day_fraction())
    }

    /// 原子"检查并预留"：成功时分钟与当日计数各增加 n，返回标记了
    /// 两个窗口起点的回执。
    ///
    /// 这是并发请求竞争同一凭证时的唯一仲裁点：排序阶段看到的余量只是
    /// 参考，以这里锁内的判定为准。
    pub fn try_reserve(&self, n: u64, now: DateTime<Utc>) -> Option<ReserveToken> {
        let mut st = self.state.lock();
        st.roll(now);
        if !st.admits(n) {
            return None;
        }
        st.used_this_minute += n;
        st.used_today += n;
        Some(ReserveToken {
            minute_window_start: st.minute_window_start,
            day_window_start: st.day_window_start,
        })
    }

    /// 回滚一次乐观预留（请求失败或被调用方取消时）。
    ///
    /// 只减扣回执标记的、至今未滚动过的窗口：已滚动的窗口在清零时就
    /// 丢掉了这笔预留，再减只会错扣新窗口里并发请求的预留。饱和减法
    /// 兜底，计数不允许下穿 0。
    pub fn release(&self, token: ReserveToken, n: u64) {
        let mut st = self.state.lock();
        if st.minute_window_start == token.minute_window_start {
            st.used_this_minute = st.used_this_minute.saturating_sub(n);
        }
        if st.day_window_start == token.day_window_start {
            st.used_today = st.used_today.saturating_sub(n);
        }
    }

    /// 把预留量校正为操作实际上报的消耗量。
    ///
    /// 实际消耗允许超出预估：此时计数如实越过上限，后续 `can_serve`
    /// 自然拒绝，直到窗口滚动。请求期间已滚动的窗口跳过校正，理由
    /// 与 [`Self::release`] 相同。
    pub fn settle(&self, token: ReserveToken, reserved: u64, actual: u64, now: DateTime<Utc>) {
        let mut st = self.state.lock();
        st.roll(now);
        if st.minute_window_start == token.minute_window_start {
            st.used_this_minute = adjusted(st.used_this_minute, reserved, actual);
        }
        if st.day_window_start == token.day_window_start {
            st.used_today = adjusted(st.used_today, reserved, actual);
        }
    }

    /// 标记凭证已被提供商拒绝：终态，同时停用。
    pub fn mark_invalid(&self, reason: impl Into<String>, now: DateTime<Utc>) {
        let mut st = self.state.lock();
        st.valid = false;
        st.active = false;
        st.invalid_reason = Some(reason.into());
        st.invalidated_at = Some(now);
    }

    /// 暂时停用（限流后避让），不动 valid，可被 [`Self::reactivate`] 恢复。
    pub fn deactivate(&self, reason: impl Into<String>) {
        let mut st = self.state.lock();
        st.active = false;
        st.disabled_reason = Some(reason.into());
    }

    /// 重新启用。只翻转 active：valid=false 的凭证即使启用也不会被选中。
    pub fn reactivate(&self) {
        let mut st = self.state.lock();
        st.active = true;
        st.disabled_reason = None;
    }

    pub fn mark_validated(&self, now: DateTime<Utc>) {
        let mut st = self.state.lock();
        st.last_validated_at = Some(now);
    }

    /// 是否需要重新探活：从未验证过，或距上次验证已超过 ttl。
    pub fn needs_validation(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let st = self.state.lock();
        match st.last_validated_at {
            None => true,
            Some(t) => now.signed_duration_since(t) >= ttl,
        }
    }

    pub fn is_usable(&self) -> bool {
        let st = self.state.lock();
        st.active && st.valid
    }

    /// 持久化快照。与状态变更共用同一把锁，读到的永远是一致的整行。
    pub fn snapshot(&self) -> StoredCredential {
        let st = self.state.lock();
        StoredCredential {
            provider: self.provider.as_str().to_string(),
            secret: self.secret.clone(),
            model: self.model.clone(),
            max_per_minute: st.max_per_minute,
            max_per_day: st.max_per_day,
            used_this_minute: st.used_this_minute,
            minute_window_start: st.minute_window_start,
            used_today: st.used_today,
            day_window_start: st.day_window_start,
            active: st.active,
            valid: st.valid,
            last_validated_at: st.last_validated_at,
            disabled_reason: st.disabled_reason.clone(),
            invalid_reason: st.invalid_reason.clone(),
            invalidated_at: st.invalidated_at,
        }
    }

    /// 用存储行覆盖运行时状态（用量、窗口、开关位）。
    /// 限额不在此恢复：静态配置对限额有最终话语权。
    pub fn restore(&self, row: &StoredCredential) {
        let mut st = self.state.lock();
        st.used_this_minute = row.used_this_minute;
        st.minute_window_start = row.minute_window_start;
        st.used_today = row.used_today;
        st.day_window_start = row.day_window_start;
        st.active = row.active;
        st.valid = row.valid;
        st.last_validated_at = row.last_validated_at;
        st.disabled_reason = row.disabled_reason.clone();
        st.invalid_reason = row.invalid_reason.clone();
        st.invalidated_at = row.invalidated_at;
    }

    /// 配置刷新时更新限额（配置优先于存储的历史值）。
    pub fn update_limits(&self, max_per_minute: u64, max_per_day: u64) {
        let mut st = self.state.lock();
        st.max_per_minute = max_per_minute;
        st.max_per_day = max_per_day;
    }

    /// 管理接口视图。展示前先滚动窗口，避免把已过期窗口的用量当成当前占用。
    pub fn status_view(&self, now: DateTime<Utc>) -> CredentialStatus {
        let mut st = self.state.lock();
        st.roll(now);
        CredentialStatus {
            preview: self.preview.clone(),
            provider: self.provider,
            model: self.model.clone(),
            active: st.active,
            valid: st.valid,
            usage_percent_minute: percent(st.used_this_minute, st.max_per_minute),
            usage_percent_day: percent(st.used_today, st.max_per_day),
            invalid_reason: st.invalid_reason.clone(),
            disabled_reason: st.disabled_reason.clone(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 完整密钥不进任何 Debug 输出。
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("preview", &self.preview)
            .finish_non_exhaustive()
    }
}

impl QuotaState {
    fn roll(&mut self, now: DateTime<Utc>) {
        roll_window(
            &mut self.used_this_minute,
            &mut self.minute_window_start,
            minute_window(),
            now,
        );
        roll_window(
            &mut self.used_today,
            &mut self.day_window_start,
            day_window(),
            now,
        );
    }

    /// 纯检查，不滚动窗口（调用方须先 roll）。
    fn admits(&self, n: u64) -> bool {
        self.active
            && self.valid
            && self.used_this_minute.saturating_add(n) <= self.max_per_minute
            && self.used_today.saturating_add(n) <= self.max_per_day
    }

    /// 当日配额占比，选择器按它升序排列。上限为 0 视作已满。
    fn day_fraction(&self) -> f64 {
        if self.max_per_day == 0 {
            return 1.0;
        }
        self.used_today as f64 / self.max_per_day as f64
    }
}

/// 窗口滚动：跨过边界时清零计数，并把起点推进整数个窗口长度。
///
/// 推进量必须是整数个窗口而不是直接设为 now：稀疏流量下若对齐到 now，
/// 窗口起点会逐次后漂，实际限流窗口被悄悄拉长。now 落在起点之前
/// （时钟回拨）时不做任何事。
fn roll_window(
    used: &mut u64,
    window_start: &mut DateTime<Utc>,
    window: Duration,
    now: DateTime<Utc>,
) {
    let elapsed = now.signed_duration_since(*window_start);
    if elapsed < window {
        return;
    }
    let len = window.num_seconds().max(1);
    let periods = elapsed.num_seconds() / len;
    *window_start = *window_start + Duration::seconds(periods * len);
    *used = 0;
}

/// 预留 reserved、实际消耗 actual 时计数的校正值，双向饱和。
fn adjusted(used: u64, reserved: u64, actual: u64) -> u64 {
    if actual >= reserved {
        used.saturating_add(actual - reserved)
    } else {
        used.saturating_sub(reserved - actual)
    }
}

fn percent(used: u64, max: u64) -> f64 {
    if max == 0 {
        // 上限 0 等于没有可用容量。
        return 100.0;
    }
    (used as f64 / max as f64) * 100.0
}

/// 持久化行：备份存储里的一条凭证快照，按 (provider, secret) 定位。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub provider: String,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    pub max_per_minute: u64,
    pub max_per_day: u64,
    pub used_this_minute: u64,
    pub minute_window_start: DateTime<Utc>,
    pub used_today: u64,
    pub day_window_start: DateTime<Utc>,
    pub active: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub disabled_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub invalidated_at: Option<DateTime<Utc>>,
}

/// 管理接口的凭证视图：摘要代替完整密钥。
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub preview: String,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub active: bool,
    pub valid: bool,
    pub usage_percent_minute: f64,
    pub usage_percent_day: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}
