use std::sync::LazyLock;

use regex::{NoExpand, Regex};

/// Output of a masking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskResult {
    pub masked: String,
    pub hit_count: usize,
}

/// Redacts secrets from text before it is stored or logged.
pub trait SecretMasker: Send + Sync {
    fn mask(&self, text: &str) -> MaskResult;
}

struct MaskRule {
    pattern: Regex,
    replacement: &'static str,
}

impl MaskRule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            replacement,
        }
    }
}

// Order matters: the bearer rule must run before the generic token rule.
static DEFAULT_RULES: LazyLock<Vec<MaskRule>> = LazyLock::new(|| {
    vec![
        MaskRule::new(r"(?i)Bearer\s+[A-Za-z0-9\-._~+/]+=*", "Bearer [REDACTED]"),
        MaskRule::new(
            r#"(?i)(?:api[_-]?key|apikey|x-api-key)[=:\s]+['"]?[\w\-]{8,}['"]?"#,
            "[API_KEY=REDACTED]",
        ),
        MaskRule::new(r"AKIA[0-9A-Z]{16}", "[AWS_KEY=REDACTED]"),
        MaskRule::new(
            r#"(?i)(?:password|passwd|secret|token)[=:\s]+['"]?[^\s'"]{4,}['"]?"#,
            "[SECRET=REDACTED]",
        ),
        MaskRule::new(r"(?i)https?://[^:@\s]+:[^@\s]+@", "https://[CREDENTIALS_REDACTED]@"),
    ]
});

/// Default masker: bearer tokens, API key assignments, AWS access key ids,
/// password/secret/token assignments and basic-auth credentials in URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternMasker;

impl SecretMasker for PatternMasker {
    fn mask(&self, text: &str) -> MaskResult {
        let mut masked = text.to_string();
        let mut hit_count = 0;
        for rule in DEFAULT_RULES.iter() {
            let hits = rule.pattern.find_iter(&masked).count();
            if hits == 0 {
                continue;
            }
            hit_count += hits;
            masked = rule
                .pattern
                .replace_all(&masked, NoExpand(rule.replacement))
                .into_owned();
        }
        MaskResult { masked, hit_count }
    }
}

/// Mask `text` with the default rules, discarding the hit count.
pub fn mask_sensitive_data(text: &str) -> String {
    PatternMasker.mask(text).masked
}
