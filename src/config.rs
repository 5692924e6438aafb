use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::pool::PoolEntry;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_VALIDATE_TTL_SECS: u64 = 60 * 60;

/// 进程启动时装载一次的静态配置。
#[derive(Debug, Clone)]
pub struct Config {
    /// 用量备份文件所在目录。
    pub data_dir: String,
    /// 周期落盘间隔（秒）；0 表示关闭后台落盘任务。
    pub flush_interval_secs: u64,
    /// 凭证探活新鲜度阈值（秒）。
    pub validate_ttl_secs: u64,
    /// 静态凭证条目。provider 保留原始字符串，未知名称在池装载阶段
    /// 丢弃并告警，而不是让启动失败。
    pub pool_keys: Vec<PoolEntry>,
    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,
    #[serde(alias = "FLUSH_INTERVAL_SECS")]
    flush_interval_secs: Option<u64>,
    #[serde(alias = "VALIDATE_TTL_SECS")]
    validate_ttl_secs: Option<u64>,
    #[serde(alias = "POOL_KEYS")]
    pool_keys: Option<String>,
    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        Self {
            data_dir: raw.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            flush_interval_secs: raw
                .flush_interval_secs
                .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS),
            validate_ttl_secs: raw.validate_ttl_secs.unwrap_or(DEFAULT_VALIDATE_TTL_SECS),
            pool_keys: parse_pool_keys(raw.pool_keys.as_deref().unwrap_or_default()),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        }
    }
}

/// 解析 POOL_KEYS：逗号分隔的条目列表，每条为
/// `provider:secret[:model[:max_per_minute[:max_per_day]]]`。
///
/// 容忍首尾逗号与纯空白条目；缺少密钥的条目丢弃并告警；限额字段解析
/// 失败回退到提供商默认值。密钥本身不允许包含冒号。
pub fn parse_pool_keys(value: &str) -> Vec<PoolEntry> {
    let mut out = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let mut fields = part.splitn(5, ':');
        let provider = fields.next().unwrap_or_default().trim();
        let secret = fields.next().unwrap_or_default().trim();
        if provider.is_empty() || secret.is_empty() {
            tracing::warn!(entry = part, "忽略残缺的 POOL_KEYS 条目");
            continue;
        }

        let model = fields
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let max_per_minute = fields.next().and_then(parse_limit);
        let max_per_day = fields.next().and_then(parse_limit);

        out.push(PoolEntry {
            provider: provider.to_string(),
            secret: secret.to_string(),
            model,
            max_per_minute,
            max_per_day,
        });
    }
    out
}

fn parse_limit(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value, "限额字段无法解析为整数，回退到默认值");
            None
        }
    }
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段加载 .env，且未并发访问环境变量，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 避免跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    if eq_idx == 0 {
        return None;
    }

    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let mut raw = line[eq_idx + 1..].trim();
    if raw.is_empty() {
        return Some((key.to_string(), String::new()));
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            raw = &raw[1..raw.len() - 1];
            return Some((key.to_string(), raw.to_string()));
        }
    }

    raw = strip_inline_comment(raw);
    Some((key.to_string(), raw.trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}
