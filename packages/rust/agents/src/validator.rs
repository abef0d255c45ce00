//! Validation of generated extractor code.
//!
//! Static checks run first: compilation and the extractor interface (both
//! through the plugin host, without executing the module) and a set of
//! robustness heuristics. When a blocking finding remains, the orchestrator
//! endpoint reviews the code and may propose a corrected module, which is
//! only kept if it compiles.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, instrument, warn};

use extractflow_plugin::{PluginKind, PluginLoader, SyntaxCheck, contract_violations};
use extractflow_shared::{
    Decoded, ExtractflowError, ExtractionSchema, IssueCategory, Result, ValidationIssue,
    ValidationReport,
};

use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::decode::{bullet_points, extract_code};
use crate::orchestrator::prompt_json;
use crate::prompts;
use crate::traits::CodeValidator;

/// Proposed fixes shorter than this are discarded as truncated answers.
const MIN_FIX_CHARS: usize = 100;

/// Schema characters included as review context.
const REVIEW_SCHEMA_CHARS: usize = 1_000;

const REVIEW_TEMPERATURE: f64 = 0.2;

// ---------------------------------------------------------------------------
// Static checks
// ---------------------------------------------------------------------------

static EXTRACT_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdef\s+extract\s*\(").expect("valid regex"));
static FILE_READ: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bopen\s*\(|\.read_text\s*\(").expect("valid regex"));
static IO_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"except\s*(:|\(?[^:]*\b(OSError|IOError|FileNotFoundError|Exception|BaseException)\b)")
        .expect("valid regex")
});
static HARDCODED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["'](?:[A-Za-z]:\\|/(?:home|Users|tmp|var|mnt|data)/)[^"'\n]*["']"#)
        .expect("valid regex")
});
static JSON_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*(true|false|null)\s*[,}\]]").expect("valid regex"));
static XPATH_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.xpath\s*\(|\.find(all)?\s*\(").expect("valid regex"));
static NONE_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bis\s+(not\s+)?None\b|[!=]=\s*None\b|\bif\s+not\s+\w+|\bif\s+\w+\s*:")
        .expect("valid regex")
});

/// Modules that must be imported when the code uses them.
const IMPORT_RULES: &[(&str, &str)] = &[
    ("lxml", r"\betree\."),
    ("json", r"\bjson\.(loads|dumps|load|dump)\b"),
    ("logging", r"\blogging\."),
    ("re", r"\bre\.(search|match|sub|findall|compile)\b"),
];

fn imports(source: &str, module: &str) -> bool {
    source.lines().map(str::trim).any(|line| {
        line.starts_with(&format!("import {module}"))
            || line.starts_with(&format!("from {module} "))
            || line.starts_with(&format!("from {module}."))
    })
}

/// Heuristic findings about error handling, imports and portability.
pub fn robustness_issues(source: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let has_handler = source.contains("try:") && source.contains("except");

    if EXTRACT_DEF.is_match(source) && !has_handler {
        issues.push(ValidationIssue::new(
            IssueCategory::Robustness,
            "extraction code has no try/except error handling",
        ));
    }

    if FILE_READ.is_match(source) && has_handler && !IO_HANDLER.is_match(source) {
        issues.push(ValidationIssue::new(
            IssueCategory::Robustness,
            "file reads are not guarded against OSError",
        ));
    }

    for (module, usage) in IMPORT_RULES {
        let used = Regex::new(usage).is_ok_and(|re| re.is_match(source));
        if used && !imports(source, module) {
            issues.push(ValidationIssue::new(
                IssueCategory::Robustness,
                format!("`{module}` is used but never imported"),
            ));
        }
    }

    for (idx, line) in source.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if HARDCODED_PATH.is_match(line) {
            issues.push(ValidationIssue {
                line: u32::try_from(idx + 1).ok(),
                ..ValidationIssue::new(IssueCategory::Robustness, "hard-coded file path")
            });
        }
        if JSON_LITERAL.is_match(line) {
            issues.push(ValidationIssue {
                line: u32::try_from(idx + 1).ok(),
                ..ValidationIssue::new(
                    IssueCategory::Warning,
                    "JSON literal (true/false/null) where Python expects True/False/None",
                )
            });
        }
    }

    let lookups = XPATH_CALL.find_iter(source).count();
    let guards = NONE_CHECK.find_iter(source).count();
    if lookups > guards {
        issues.push(ValidationIssue::new(
            IssueCategory::Warning,
            format!("{lookups} element lookups but only {guards} empty/None checks"),
        ));
    }

    issues
}

/// Every finding for `source` given the result of compiling it.
pub fn static_issues(check: &SyntaxCheck, source: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if check.ok {
        issues.extend(
            contract_violations(PluginKind::Extractor, &check.description())
                .into_iter()
                .map(|v| ValidationIssue::new(IssueCategory::Interface, v)),
        );
    } else {
        issues.push(ValidationIssue {
            line: check.line,
            ..ValidationIssue::new(
                IssueCategory::Syntax,
                check.error.clone().unwrap_or_else(|| "invalid syntax".into()),
            )
        });
    }

    issues.extend(robustness_issues(source));
    issues
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Static checks plus an LLM review of code with blocking findings.
#[derive(Clone)]
pub struct LlmCodeValidator {
    client: LlmClient,
    loader: Arc<dyn PluginLoader>,
}

impl std::fmt::Debug for LlmCodeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCodeValidator")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

struct Review {
    suggestions: Vec<String>,
    fixed_source: Option<String>,
}

impl LlmCodeValidator {
    pub fn new(client: LlmClient, loader: Arc<dyn PluginLoader>) -> Self {
        Self { client, loader }
    }

    async fn check(&self, source: &str) -> Result<SyntaxCheck> {
        let loader = Arc::clone(&self.loader);
        let source = source.to_string();
        tokio::task::spawn_blocking(move || loader.check_syntax(&source))
            .await
            .map_err(|e| ExtractflowError::Plugin(format!("syntax check task failed: {e}")))?
    }

    async fn review(
        &self,
        source: &str,
        issues: &[ValidationIssue],
        schema: &Decoded<ExtractionSchema>,
    ) -> Result<Review> {
        let findings: Vec<String> = issues
            .iter()
            .filter(|i| i.is_blocking())
            .map(|i| match i.line {
                Some(line) => format!("{:?} (line {line}): {}", i.category, i.message),
                None => format!("{:?}: {}", i.category, i.message),
            })
            .collect();
        let excerpt: String = prompt_json(schema)?
            .chars()
            .take(REVIEW_SCHEMA_CHARS)
            .collect();

        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::REVIEW_SYSTEM),
            ChatMessage::user(prompts::code_review(source, &findings, &excerpt)),
        ])
        .temperature(REVIEW_TEMPERATURE);
        let text = self.client.complete(&request).await?;

        let suggestions = bullet_points(&text);
        let candidate = extract_code(&text);
        let fixed_source = if candidate.len() < MIN_FIX_CHARS || candidate == source.trim() {
            warn!(chars = candidate.len(), "review returned no usable code");
            None
        } else {
            let check = self.check(&candidate).await?;
            if check.ok {
                Some(candidate)
            } else {
                warn!(
                    error = check.error.as_deref().unwrap_or("unknown"),
                    line = check.line,
                    "reviewed code does not compile, discarding it"
                );
                None
            }
        };

        Ok(Review {
            suggestions,
            fixed_source,
        })
    }
}

#[async_trait]
impl CodeValidator for LlmCodeValidator {
    #[instrument(skip_all, fields(lines = source.lines().count()))]
    async fn validate(
        &self,
        source: &str,
        schema: &Decoded<ExtractionSchema>,
    ) -> Result<ValidationReport> {
        let check = self.check(source).await?;
        let mut report = ValidationReport::from_issues(static_issues(&check, source));

        if report.is_valid {
            info!(
                warnings = report.count(IssueCategory::Warning),
                "code validation passed"
            );
            return Ok(report);
        }

        warn!(
            syntax = report.count(IssueCategory::Syntax),
            interface = report.count(IssueCategory::Interface),
            robustness = report.count(IssueCategory::Robustness),
            "code validation found issues, requesting review"
        );

        match self.review(source, &report.issues, schema).await {
            Ok(review) => {
                if review.fixed_source.is_some() {
                    info!("review proposed corrected code");
                }
                report.suggestions = review.suggestions;
                report.fixed_source = review.fixed_source;
            }
            Err(e) => warn!(error = %e, "code review failed, keeping findings only"),
        }
        Ok(report)
    }
}
