//! 选择算法：当日占比最低者优先（least-loaded）。
//!
//! 把请求引向当天还最"空"的凭证，让消耗均匀摊到整池上，而不是把第一个
//! 凭证烧穿再换下一个。

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::credential::types::Credential;

/// 过滤出当前能承载 n 个容量单位的凭证，并按 used_today / max_per_day
/// 升序排列。
///
/// 每个凭证的资格检查与占比读取在同一次加锁内完成（顺带做惰性窗口
/// 滚动，这是本函数对池状态的唯一副作用）。排序稳定：占比相同的保持
/// 池内插入顺序。
///
/// 输入非空而输出为空说明"有凭证但都没余量"，与"该提供商没配置凭证"
/// 要区分上报，由调用方携带已配置数量判别。
pub fn rank(credentials: &[Arc<Credential>], n: u64, now: DateTime<Utc>) -> Vec<Arc<Credential>> {
    let mut eligible: Vec<(f64, Arc<Credential>)> = Vec::with_capacity(credentials.len());
    for cred in credentials {
        if let Some(fraction) = cred.probe_fraction(n, now) {
            eligible.push((fraction_or_full(fraction), cred.clone()));
        }
    }

    // sort_by 是稳定排序，占比相同时不打乱原有次序。
    eligible.sort_by(|a, b| a.0.total_cmp(&b.0));
    eligible.into_iter().map(|(_, cred)| cred).collect()
}

/// 非有限占比按已满处理。
#[inline]
fn fraction_or_full(f: f64) -> f64 {
    if f.is_finite() { f } else { 1.0 }
}
