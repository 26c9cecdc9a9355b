//! Static script validation.
//!
//! Runs before any execution resources are allocated. Comments are removed
//! first so commented-out code neither trips nor hides a rule; string
//! literals are kept, so a forbidden word inside a string still counts.

use std::sync::LazyLock;

use boa_engine::{Context, Script, Source};
use regex::Regex;
use serde::{Deserialize, Serialize};
use stampede_core::job_spec::MAX_SCRIPT_BYTES;

/// More `http.` call sites than this earns a warning.
const MANY_HTTP_CALLS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub complexity: u32,
    pub security_score: u8,
}

struct Rule {
    pattern: Regex,
    message: &'static str,
}

fn rule(pattern: &str, message: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("valid regex"),
        message,
    }
}

static ERROR_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"\brequire\s*\(", "Module loading via require() is not allowed"),
        rule(r"(?m)^\s*import\s+[\w{*'\x22]|\bimport\s*\(", "Module imports are not allowed"),
        rule(r"\bprocess\s*\.", "Access to process is not allowed"),
        rule(r"\bfs\s*\.", "Filesystem access is not allowed"),
        rule(r"\bchild_process\b", "Spawning processes is not allowed"),
        rule(r"\bDeno\s*\.", "Access to Deno APIs is not allowed"),
        rule(r"\beval\s*\(", "eval() is not allowed"),
        rule(r"\bnew\s+Function\b", "The Function constructor is not allowed"),
        rule(r"\bFunction\s*\(", "The Function constructor is not allowed"),
        rule(
            r#"\bset(?:Timeout|Interval)\s*\(\s*['"`]"#,
            "setTimeout/setInterval with a string argument is not allowed",
        ),
        rule(r"__proto__", "Prototype access via __proto__ is not allowed"),
        rule(
            r#"constructor\s*(?:\.\s*|\[\s*['"`]\s*)constructor"#,
            "constructor.constructor escapes are not allowed",
        ),
        rule(
            r#"\.\s*constructor\s*\(|\[\s*['"`]constructor['"`]\s*\]\s*\("#,
            "Calling a constructor property is not allowed",
        ),
        rule(r"\bfetch\s*\(", "Use http.get/http.post instead of fetch()"),
        rule(r"\bXMLHttpRequest\b", "XMLHttpRequest is not allowed"),
        rule(r"\bWebSocket\b", "WebSocket is not allowed"),
        rule(r"\bWebAssembly\b", "WebAssembly is not allowed"),
    ]
});

static WARNING_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"\bwhile\s*\(\s*(?:true|1)\s*\)",
            "Potentially unbounded loop: while (true)",
        ),
        rule(r"\bfor\s*\(\s*;\s*;\s*\)", "Potentially unbounded loop: for (;;)"),
        rule(r"\bglobalThis\b", "Use of globalThis"),
    ]
});

static HTTP_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bhttp\s*\.\s*(?:get|post|request)\b").expect("valid regex"));

static BRANCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:if|for|while|case|catch)\b|&&|\|\||\?").expect("valid regex")
});

/// Validate `source` without running it.
pub fn validate(source: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if source.trim().is_empty() {
        errors.push("Script is empty".to_string());
    }
    if source.len() > MAX_SCRIPT_BYTES {
        errors.push(format!("Script exceeds {MAX_SCRIPT_BYTES} bytes"));
    }

    let code = strip_comments(source);

    for rule in ERROR_RULES.iter() {
        if rule.pattern.is_match(&code) && !errors.iter().any(|e| e == rule.message) {
            errors.push(rule.message.to_string());
        }
    }
    for rule in WARNING_RULES.iter() {
        if rule.pattern.is_match(&code) {
            warnings.push(rule.message.to_string());
        }
    }

    let http_calls = HTTP_CALL.find_iter(&code).count();
    if http_calls == 0 {
        warnings.push("Script makes no http calls".to_string());
    } else if http_calls > MANY_HTTP_CALLS {
        warnings.push(format!(
            "Script has {http_calls} http call sites (more than {MANY_HTTP_CALLS})"
        ));
    }

    if errors.is_empty() {
        if let Err(message) = check_syntax(source) {
            errors.push(format!("Syntax error: {message}"));
        }
    }

    // `??` and `?.` are not branches for this count.
    let branch_code = code.replace("??", "  ").replace("?.", "  ");
    let complexity = 1 + BRANCH.find_iter(&branch_code).count() as u32;
    let penalty = 25 * errors.len() as i64 + 5 * warnings.len() as i64;
    let security_score = (100 - penalty).clamp(0, 100) as u8;

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        complexity,
        security_score,
    }
}

fn check_syntax(source: &str) -> Result<(), String> {
    let mut context = Context::default();
    Script::parse(Source::from_bytes(source), None, &mut context)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Remove `//` and `/* */` comments, leaving string and template literals
/// intact. Newlines inside block comments are kept so line-anchored rules
/// still see line starts.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = r#"
        const res = http.get(target.url);
        if (res.ok && res.status === 200) {
            console.log("ok", res.durationMs);
        }
        res.status;
    "#;

    #[test]
    fn clean_script_is_valid() {
        let report = validate(CLEAN);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.security_score, 100);
        // if + &&
        assert_eq!(report.complexity, 3);
    }

    #[test]
    fn forbidden_constructs_are_errors() {
        for source in [
            "const fs = require('fs'); http.get(target.url);",
            "import x from 'y';\nhttp.get(target.url);",
            "process.exit(1); http.get(target.url);",
            "eval('1'); http.get(target.url);",
            "new Function('return 1')(); http.get(target.url);",
            "setTimeout(\"alert(1)\", 10); http.get(target.url);",
            "({}).__proto__; http.get(target.url);",
            "(() => {}).constructor.constructor('x'); http.get(target.url);",
            "fetch('https://a.test'); http.get(target.url);",
            "new XMLHttpRequest(); http.get(target.url);",
            "new WebSocket('wss://a.test'); http.get(target.url);",
            "WebAssembly.compile(); http.get(target.url);",
        ] {
            let report = validate(source);
            assert!(!report.is_valid, "should reject: {source}");
            assert!(report.security_score <= 75);
        }
    }

    #[test]
    fn constructor_property_calls_are_errors() {
        for source in [
            "(function(){}).constructor('return this')(); http.get(target.url);",
            "Function.prototype.constructor('x')(); http.get(target.url);",
            "(() => 0)['constructor']('x'); http.get(target.url);",
        ] {
            let report = validate(source);
            assert!(!report.is_valid, "should reject: {source}");
        }

        let report = validate(
            "class Counter { constructor(n) { this.n = n; } } new Counter(1); http.get(target.url);",
        );
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn commented_out_code_is_ignored() {
        let report = validate("// eval('x')\n/* require('fs') */\nhttp.get(target.url);");
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn comment_markers_inside_strings_are_kept() {
        let stripped = strip_comments("const u = 'https://a.test'; // trailing");
        assert_eq!(stripped, "const u = 'https://a.test'; ");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let report = validate("http.get(target.url");
        assert!(!report.is_valid);
        assert!(report.errors[0].starts_with("Syntax error"));
    }

    #[test]
    fn empty_and_oversized_scripts_are_rejected() {
        assert!(!validate("   ").is_valid);
        let big = format!("http.get(target.url);{}", " ".repeat(MAX_SCRIPT_BYTES));
        assert!(!validate(&big).is_valid);
    }

    #[test]
    fn warnings_reduce_score_but_keep_script_valid() {
        let report = validate("while (true) { http.get(target.url); }");
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.security_score, 95);
    }

    #[test]
    fn no_http_and_many_http_calls_warn() {
        let report = validate("1 + 1;");
        assert!(report.warnings.iter().any(|w| w.contains("no http")));

        let many = "http.get(target.url);\n".repeat(MANY_HTTP_CALLS + 1);
        let report = validate(&many);
        assert!(report.warnings.iter().any(|w| w.contains("call sites")));
    }

    #[test]
    fn score_never_goes_below_zero() {
        let report = validate(
            "require('a'); process.x; fs.y; eval('1'); fetch('z'); WebAssembly; http.get(target.url);",
        );
        assert_eq!(report.security_score, 0);
    }
}
