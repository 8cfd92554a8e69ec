//! Pure, stateless classifier for HTTP request artifacts.
//!
//! Given a request summary, returns one label from a fixed set. The
//! pattern catalog below is ported from the reference honeypot's
//! attack-pattern table; regexes are compiled once in [`PatternMatcher::new`]
//! and reused for the lifetime of the process rather than recompiled per
//! request.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// The label set the matcher can return, in the precedence order they are
/// evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    LfiRfi,
    Reconnaissance,
    Scanner,
    Probe,
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatType::SqlInjection => "sql_injection",
            ThreatType::Xss => "xss",
            ThreatType::PathTraversal => "path_traversal",
            ThreatType::CommandInjection => "command_injection",
            ThreatType::LfiRfi => "lfi_rfi",
            ThreatType::Reconnaissance => "reconnaissance",
            ThreatType::Scanner => "scanner",
            ThreatType::Probe => "probe",
        };
        write!(f, "{s}")
    }
}

/// The inputs the matcher reasons about. `headers` only needs to carry
/// `User-Agent`, but the full map is accepted for forward compatibility.
#[derive(Debug, Clone, Default)]
pub struct RequestSummary<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub user_agent: &'a str,
    pub body: Option<&'a str>,
}

const SENSITIVE_PATHS: &[&str] = &[
    "/wp-admin",
    "/wp-login.php",
    "/administrator",
    "/admin",
    "/phpmyadmin",
    "/mysql",
    "/.git",
    "/.env",
    "/config",
    "/backup",
    "/.htaccess",
    "/wp-config.php",
    "/xmlrpc.php",
    "/shell",
    "/cmd",
    "/eval",
    "/api/v1",
    "/graphql",
    "/.well-known",
];

const SCANNER_SIGNATURES: &[&str] = &[
    "nikto", "sqlmap", "nmap", "masscan", "zgrab", "gobuster", "dirbuster",
    "wfuzz", "burp", "acunetix", "nessus", "qualys", "openvas", "w3af", "skipfish",
];

struct PatternFamily {
    threat_type: ThreatType,
    patterns: Vec<Regex>,
}

/// A stateless HTTP attack classifier. Construct once and share across
/// requests; `classify` takes `&self` and touches no interior state.
pub struct PatternMatcher {
    families: Vec<PatternFamily>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        let families = vec![
            PatternFamily {
                threat_type: ThreatType::SqlInjection,
                patterns: compile_all(&[
                    r"(%27)|(')|(--)|(%23)|(#)",
                    r"((%3d)|(=))[^\n]*((%27)|(')|(--)|(%3b)|(;))",
                    r"union.*select",
                    r"select.*from",
                    r"insert.*into",
                    r"drop.*table",
                    r"update.*set",
                    r"delete.*from",
                ]),
            },
            PatternFamily {
                threat_type: ThreatType::Xss,
                patterns: compile_all(&[
                    r"<script[^>]*>",
                    r"javascript:",
                    r"on\w+\s*=",
                    r"<img[^>]+onerror",
                    r"<svg[^>]+onload",
                ]),
            },
            PatternFamily {
                threat_type: ThreatType::PathTraversal,
                patterns: compile_all(&[
                    r"\.\./",
                    r"\.\.\\",
                    r"%2e%2e%2f",
                    r"%2e%2e/",
                    r"\.\.%2f",
                    r"/etc/passwd",
                    r"/etc/shadow",
                    r"c:\\windows",
                ]),
            },
            PatternFamily {
                threat_type: ThreatType::CommandInjection,
                patterns: compile_all(&[
                    r";\s*\w+",
                    r"\|\s*\w+",
                    r"`[^`]+`",
                    r"\$\([^)]+\)",
                    r"&&\s*\w+",
                ]),
            },
            PatternFamily {
                threat_type: ThreatType::LfiRfi,
                patterns: compile_all(&[
                    r"(file|php|zip|data|expect|input|phar)://",
                    r"=https?://[^\s&]*\.php",
                    r"include\s*\(",
                    r"require\s*\(",
                ]),
            },
        ];
        Self { families }
    }

    /// Classifies a request. Deterministic: identical inputs always
    /// produce identical outputs.
    pub fn classify(&self, request: &RequestSummary<'_>) -> ThreatType {
        let mut combined = format!("{}{}", request.path, request.query).to_lowercase();
        if let Some(body) = request.body {
            let truncated: String = body.chars().take(1000).collect();
            combined.push_str(&truncated.to_lowercase());
        }

        for family in &self.families {
            if family.patterns.iter().any(|p| p.is_match(&combined)) {
                return family.threat_type;
            }
        }

        let path_lower = request.path.to_lowercase();
        if SENSITIVE_PATHS.iter().any(|p| path_lower.starts_with(p)) {
            return ThreatType::Reconnaissance;
        }

        let ua_lower = request.user_agent.to_lowercase();
        if SCANNER_SIGNATURES.iter().any(|sig| ua_lower.contains(sig)) {
            return ThreatType::Scanner;
        }

        ThreatType::Probe
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("invalid built-in pattern {p:?}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary<'a>(path: &'a str, query: &'a str, user_agent: &'a str) -> RequestSummary<'a> {
        RequestSummary {
            method: "GET",
            path,
            query,
            user_agent,
            body: None,
        }
    }

    #[test]
    fn sql_injection_via_query_string() {
        let matcher = PatternMatcher::new();
        let req = summary("/index.php", "id=1%27%20OR%201=1--", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::SqlInjection);
    }

    #[test]
    fn xss_script_tag() {
        let matcher = PatternMatcher::new();
        let req = summary("/search", "q=<script>alert(1)</script>", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::Xss);
    }

    #[test]
    fn path_traversal_dot_dot_slash() {
        let matcher = PatternMatcher::new();
        let req = summary("/download", "file=../../etc/passwd", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::PathTraversal);
    }

    #[test]
    fn command_injection_semicolon() {
        let matcher = PatternMatcher::new();
        let req = summary("/ping", "host=127.0.0.1;id", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::CommandInjection);
    }

    #[test]
    fn lfi_via_php_wrapper() {
        let matcher = PatternMatcher::new();
        let req = summary("/page", "file=php://filter/convert.base64-encode/resource=index", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::LfiRfi);
    }

    #[test]
    fn rfi_via_remote_php_url_in_query() {
        let matcher = PatternMatcher::new();
        let req = summary("/page.php", "file=http://evil.example.com/shell.php", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::LfiRfi);
    }

    #[test]
    fn sensitive_path_is_reconnaissance() {
        let matcher = PatternMatcher::new();
        let req = summary("/.env", "", "curl/8.0");
        assert_eq!(matcher.classify(&req), ThreatType::Reconnaissance);
    }

    #[test]
    fn scanner_user_agent_without_attack_pattern() {
        let matcher = PatternMatcher::new();
        let req = summary("/", "", "sqlmap/1.5.2");
        assert_eq!(matcher.classify(&req), ThreatType::Scanner);
    }

    #[test]
    fn plain_request_is_probe() {
        let matcher = PatternMatcher::new();
        let req = summary("/", "", "Mozilla/5.0");
        assert_eq!(matcher.classify(&req), ThreatType::Probe);
    }

    #[test]
    fn classification_is_pure_and_deterministic() {
        let matcher = PatternMatcher::new();
        let req = summary("/wp-login.php", "", "Mozilla/5.0");
        let a = matcher.classify(&req);
        let b = matcher.classify(&req);
        assert_eq!(a, b);
    }

    #[test]
    fn body_beyond_1000_chars_is_truncated_before_matching() {
        let matcher = PatternMatcher::new();
        let mut body = "a".repeat(1005);
        body.push_str("<script>");
        let req = RequestSummary {
            method: "POST",
            path: "/comment",
            query: "",
            user_agent: "curl/8.0",
            body: Some(&body),
        };
        // the <script> tag lands past the 1000-char cutoff, so it must not
        // be seen by the matcher.
        assert_eq!(matcher.classify(&req), ThreatType::Probe);
    }
}
