//! Line classification: mapping raw child output to structured signals.
//!
//! Classification is line-local and stateless; which stage is "current" is
//! tracked by the sequencer, not here. Every line is still forwarded to
//! the observer as a log line regardless of what it matches —
//! classification only adds signals, it never suppresses output.
//!
//! The rule set is an ordered table of (pattern, signal kind) pairs so new
//! stage markers or artifact shapes can be added without touching control
//! flow.

use crate::supervise::StreamSource;
use regex::Regex;

/// A structured signal extracted from one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The child announced progress into pipeline stage `ordinal`
    /// (1-based), e.g. "[3/5] Deploying application code".
    StageReached(usize),

    /// A known "label: value" artifact shape matched.
    ArtifactFound { key: String, value: String },

    /// A stderr line carried a severity keyword; the run must fail.
    FatalPattern(String),

    /// The line matched nothing known; plain diagnostic text.
    Benign,
}

/// What a matching rule produces.
#[derive(Debug, Clone, Copy)]
enum RuleKind {
    /// First capture group is the 1-based stage ordinal.
    StageMarker,

    /// First capture group is the value for this artifact key.
    Artifact(&'static str),

    /// The whole line is a fatal diagnostic.
    Fatal,
}

/// One entry of the ordered rule table.
struct Rule {
    pattern: Regex,
    kind: RuleKind,
}

impl Rule {
    fn new(pattern: &str, kind: RuleKind) -> Self {
        Self {
            // Patterns are compile-time constants; a bad one is a bug.
            pattern: Regex::new(pattern).expect("invalid classifier pattern"),
            kind,
        }
    }
}

/// The line classifier with its default rule tables.
///
/// Stdout is matched against stage markers and artifact shapes. Stderr is
/// matched only against severity keywords: CLI tools routinely route
/// informational output ("Connecting to service...") to stderr, so
/// anything without a keyword is benign diagnostic text.
pub struct Classifier {
    stdout_rules: Vec<Rule>,
    stderr_rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        let stdout_rules = vec![
            Rule::new(r"\[(\d+)/\d+\]", RuleKind::StageMarker),
            Rule::new(r"(?i)\bstep\s+(\d+)\s+of\s+\d+", RuleKind::StageMarker),
            Rule::new(
                r"(?i)\bclient id\s*:\s*([0-9a-fA-F-]+)",
                RuleKind::Artifact("client_id"),
            ),
            Rule::new(
                r"(?i)\btenant id\s*:\s*([0-9a-fA-F-]+)",
                RuleKind::Artifact("tenant_id"),
            ),
            Rule::new(
                r"(?i)\binvoke url\s*:\s*(\S+)",
                RuleKind::Artifact("endpoint_url"),
            ),
            Rule::new(
                r"(?i)\bpackage(?:\s+path)?\s*:\s*(\S+)",
                RuleKind::Artifact("package_path"),
            ),
        ];

        // Uppercase on purpose: matches tool severity prefixes without
        // tripping on prose that merely mentions an error.
        let stderr_rules = vec![Rule::new(r"\b(ERROR|FATAL|CRITICAL)\b", RuleKind::Fatal)];

        Self {
            stdout_rules,
            stderr_rules,
        }
    }

    /// Classify one line. Returns every matching signal in rule order;
    /// a line matching nothing yields a single [`Signal::Benign`].
    pub fn classify(&self, source: StreamSource, line: &str) -> Vec<Signal> {
        let rules = match source {
            StreamSource::Stdout => &self.stdout_rules,
            StreamSource::Stderr => &self.stderr_rules,
        };

        let mut signals = Vec::new();
        for rule in rules {
            let Some(captures) = rule.pattern.captures(line) else {
                continue;
            };
            match rule.kind {
                RuleKind::StageMarker => {
                    if let Some(ordinal) = captures.get(1).and_then(|m| m.as_str().parse().ok()) {
                        signals.push(Signal::StageReached(ordinal));
                    }
                }
                RuleKind::Artifact(key) => {
                    if let Some(value) = captures.get(1) {
                        signals.push(Signal::ArtifactFound {
                            key: key.to_string(),
                            value: value.as_str().to_string(),
                        });
                    }
                }
                RuleKind::Fatal => {
                    signals.push(Signal::FatalPattern(line.to_string()));
                }
            }
        }

        if signals.is_empty() {
            signals.push(Signal::Benign);
        }
        signals
    }
}
