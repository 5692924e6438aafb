use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局 tracing 订阅器，供嵌入方在进程入口调用一次。
///
/// DEBUG=off 时完全静默；其余取值尊重外部 RUST_LOG，但保证本 crate
/// 自身至少 info，以免环境里预设的全局 warn 把关键轮转日志滤掉。
/// 重复调用安全（后续调用是空操作）。
pub fn init(cfg: &Config) {
    let debug = cfg.debug.trim().to_lowercase();
    let filter = if debug == "off" {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new("warn,keypool=info")
        } else if env.contains("keypool") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},keypool=info"))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}
