use serde::{Deserialize, Serialize};

/// 支持的外部提供商（封闭枚举）。
///
/// 所有按提供商分发的逻辑都经由该枚举完成：未知名称在配置装载阶段即被
/// 丢弃并告警，不会以裸字符串流入运行时，新增提供商时编译器会指出所有
/// 需要补齐的 match 分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gemini（主力 LLM）。
    Gemini,
    /// OpenAI 兼容接口。
    OpenAi,
    /// Serper 搜索。
    Serper,
    /// Tavily 搜索。
    Tavily,
    /// 本地 Ollama（免费兜底）。
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Gemini,
        Provider::OpenAi,
        Provider::Serper,
        Provider::Tavily,
        Provider::Ollama,
    ];

    /// 解析提供商名称（大小写不敏感，容忍首尾空白）；未知名称返回 None。
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "serper" => Some(Self::Serper),
            "tavily" => Some(Self::Tavily),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Serper => "serper",
            Self::Tavily => "tavily",
            Self::Ollama => "ollama",
        }
    }

    /// 配置未显式给出限额时的默认值：(每分钟, 每天) 容量单位。
    ///
    /// LLM 提供商按 token 记账，搜索提供商按请求次数记账，数量级差异
    /// 很大，所以默认值按提供商给而不是给一个全局数。
    pub fn default_limits(self) -> (u64, u64) {
        match self {
            Self::Gemini => (120_000, 1_500_000),
            Self::OpenAi => (90_000, 2_000_000),
            Self::Serper => (600, 2_500),
            Self::Tavily => (100, 1_000),
            Self::Ollama => (1_000_000, 50_000_000),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(Provider::parse("gemini"), Some(Provider::Gemini));
        assert_eq!(Provider::parse(" OpenAI "), Some(Provider::OpenAi));
        assert_eq!(Provider::parse("TAVILY"), Some(Provider::Tavily));
        assert_eq!(Provider::parse("anthropic"), None);
        assert_eq!(Provider::parse(""), None);
    }

    #[test]
    fn parse_round_trips_every_variant() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Provider::Serper.to_string(), "serper");
        assert_eq!(format!("{}", Provider::OpenAi), "openai");
    }

    #[test]
    fn default_limits_are_nonzero() {
        for p in Provider::ALL {
            let (per_minute, per_day) = p.default_limits();
            assert!(per_minute > 0);
            assert!(per_day >= per_minute);
        }
    }
}
