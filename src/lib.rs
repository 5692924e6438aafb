//! keypool：多提供商 API 密钥池管理。
//!
//! 为"同一提供商配多把密钥"的场景提供统一的凭证池：按滚动窗口
//! （每分钟/每天）给每把密钥记账，把请求派给当日占比最低的可用密钥，
//! 失败时按错误类别决定换键重试还是立即失败，并把用量状态落盘，
//! 进程重启后配额窗口得以延续。
//!
//! 典型用法：进程入口装配一次——
//!
//! ```no_run
//! # async fn demo() {
//! let cfg = keypool::Config::load();
//! keypool::logging::init(&cfg);
//! let rt = keypool::runtime::bootstrap(cfg).await;
//!
//! let answer = rt
//!     .executor
//!     .execute(keypool::Provider::Gemini, 1200, |attempt| async move {
//!         // 这里用 attempt.secret 调提供商 SDK，
//!         // 返回结果与实际消耗的容量单位。
//!         let _secret = attempt.secret;
//!         Ok(("hello".to_string(), Some(980)))
//!     })
//!     .await;
//! # let _ = answer;
//! # }
//! ```
//!
//! 密钥只在操作闭包的参数里出现；管理接口（状态查询、按摘要重新
//! 启用）一律用不可逆的密钥摘要定位凭证。

pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pool;
pub mod provider;
pub mod runtime;
pub mod util;

pub use config::Config;
pub use credential::store::UsageStore;
pub use credential::types::{Credential, CredentialStatus, ReserveToken, StoredCredential};
pub use error::{AttemptFailure, ExecuteError, FailureKind, OperationError};
pub use executor::{Attempt, Executor, OperationOutcome, run_with_fallback};
pub use pool::{LoadSummary, PoolEntry, PoolManager};
pub use provider::Provider;
pub use runtime::{PoolRuntime, bootstrap};
