//! Static denylist screening of guest source code.
//!
//! This is a best-effort filter that runs before anything is spawned. It
//! matches source text against fixed patterns and knows nothing about the
//! language grammar, so obfuscated code can get past it. The container
//! boundary is what actually contains guest code.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::language::Language;

const JAVASCRIPT_PATTERNS: &[&str] = &[
    r#"require\s*\(\s*['"`]fs['"`]\s*\)"#,
    r#"require\s*\(\s*['"`]child_process['"`]\s*\)"#,
    r#"require\s*\(\s*['"`]http['"`]\s*\)"#,
    r#"require\s*\(\s*['"`]https['"`]\s*\)"#,
    r#"require\s*\(\s*['"`]net['"`]\s*\)"#,
    r"process\.exit",
    r"process\.kill",
    r"eval\s*\(",
    r"Function\s*\(",
    r"global\s*\.",
];

const PYTHON_PATTERNS: &[&str] = &[
    r"import\s+os",
    r"import\s+subprocess",
    r"import\s+sys",
    r"import\s+socket",
    r"import\s+urllib",
    r"import\s+requests",
    r"import\s+shutil",
    r"from\s+os\s+import",
    r"open\s*\(",
    r"exec\s*\(",
    r"eval\s*\(",
    r"__import__",
];

const JAVA_PATTERNS: &[&str] = &[
    r"import\s+java\.io\.",
    r"import\s+java\.net\.",
    r"import\s+java\.lang\.Runtime",
    r"import\s+java\.lang\.ProcessBuilder",
    r"System\.exit",
    r"Runtime\.getRuntime",
    r"ProcessBuilder",
    r"Files\.",
    r"Paths\.",
];

const CPP_PATTERNS: &[&str] = &[
    r"#include\s*<fstream>",
    r"#include\s*<filesystem>",
    r"#include\s*<cstdlib>",
    r"system\s*\(",
    r"exec",
    r"fork\s*\(",
    r"FILE\s*\*",
    r"fopen",
    r"popen",
];

/// Outcome of screening one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Allowed,
    /// The first matching pattern. Kept for logs, never shown to the caller.
    Denied { pattern: String },
}

impl Screening {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Screening::Allowed)
    }
}

/// Ordered forbidden patterns for one language.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    patterns: Vec<Regex>,
}

impl SecurityPolicy {
    pub fn from_patterns(patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// First pattern that matches `code`, in declaration order.
    pub fn first_match(&self, code: &str) -> Option<&Regex> {
        self.patterns.iter().find(|p| p.is_match(code))
    }
}

/// Per-language denylist, compiled once and shared read-only.
#[derive(Debug, Clone)]
pub struct SecurityScreener {
    policies: HashMap<Language, SecurityPolicy>,
}

impl SecurityScreener {
    pub fn new(policies: HashMap<Language, SecurityPolicy>) -> Self {
        Self { policies }
    }

    pub fn policy(&self, language: Language) -> Option<&SecurityPolicy> {
        self.policies.get(&language)
    }

    /// Screen `code` against the policy for `language`.
    ///
    /// A language without a policy is allowed through; the size limit is
    /// enforced separately by the engine.
    pub fn screen(&self, code: &str, language: Language) -> Screening {
        let Some(policy) = self.policy(language) else {
            return Screening::Allowed;
        };

        match policy.first_match(code) {
            Some(pattern) => {
                warn!(
                    language = %language,
                    pattern = %pattern.as_str(),
                    "Dangerous pattern detected"
                );
                Screening::Denied {
                    pattern: pattern.as_str().to_string(),
                }
            }
            None => Screening::Allowed,
        }
    }
}

impl Default for SecurityScreener {
    fn default() -> Self {
        let builtin = [
            (Language::Javascript, JAVASCRIPT_PATTERNS),
            (Language::Python, PYTHON_PATTERNS),
            (Language::Java, JAVA_PATTERNS),
            (Language::Cpp, CPP_PATTERNS),
        ];

        let policies = builtin
            .into_iter()
            .map(|(lang, patterns)| {
                let policy =
                    SecurityPolicy::from_patterns(patterns).expect("builtin patterns are valid");
                (lang, policy)
            })
            .collect();

        Self { policies }
    }
}
