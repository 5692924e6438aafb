use uuid::Uuid;

/// 凭证的进程内短 id，仅用于日志关联，不持久化、不对外暴露。
pub fn credential_id() -> String {
    let s = Uuid::new_v4().simple().to_string();
    format!("cred-{}", &s[..8])
}

/// 计算密钥摘要（FNV-1a 64 的十六进制），供管理接口展示与定位凭证。
///
/// 摘要不可逆，完整密钥永远不离开池。手写 FNV 是为了不给一个摘要功能
/// 额外引入哈希库依赖；provider 参与散列并以分隔字节隔开，避免
/// (provider, secret) 拼接歧义。
pub fn secret_preview(provider: &str, secret: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let sep = [0x1fu8];
    let mut hash = FNV_OFFSET;
    let bytes = provider
        .as_bytes()
        .iter()
        .chain(&sep)
        .chain(secret.as_bytes());
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_id_has_prefix_and_short_body() {
        let id = credential_id();
        assert!(id.starts_with("cred-"));
        assert_eq!(id.len(), "cred-".len() + 8);
    }

    #[test]
    fn secret_preview_is_deterministic() {
        let a = secret_preview("gemini", "sk-123");
        let b = secret_preview("gemini", "sk-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secret_preview_distinguishes_provider_and_secret() {
        let base = secret_preview("gemini", "sk-123");
        assert_ne!(base, secret_preview("openai", "sk-123"));
        assert_ne!(base, secret_preview("gemini", "sk-124"));
    }

    #[test]
    fn secret_preview_never_contains_secret() {
        let preview = secret_preview("tavily", "tvly-super-secret");
        assert!(!preview.contains("tvly"));
        assert!(!preview.contains("secret"));
    }
}
