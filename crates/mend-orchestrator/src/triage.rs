//! CI triage pipeline
//!
//! Runs once all conflicts are clear: execute the verification command,
//! mine its log for structured failures, and route each failure back to
//! the session that just resolved the relevant file — that session still
//! holds the context of what changed. Failures with no owning session get
//! a dedicated specialist; a log too unstructured to decompose is
//! broadcast to every resolved session instead of spawning specialists.

use async_trait::async_trait;
use mend_agent::{
    AgentRuntime, SessionHandle, SessionKey, SessionManager, SessionOptions, TurnOptions,
};
use mend_core::{MendConfig, MendError, Result, UsageMeter, VerifyConfig, WorkerOutcome};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::overflow::prepare_log;
use crate::prompt::{build_broadcast_prompt, build_remediation_prompt};

/// Combined output of the external verification command
#[derive(Debug, Clone)]
pub struct VerifyOutput {
    pub log: String,
    pub success: bool,
}

/// Runs the opaque verification command
#[async_trait]
pub trait VerifyRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<VerifyOutput>;
}

#[async_trait]
impl<T: VerifyRunner + ?Sized> VerifyRunner for Arc<T> {
    async fn run(&self, command: &str) -> Result<VerifyOutput> {
        (**self).run(command).await
    }
}

/// Executes the verification command through a shell
pub struct ProcessVerifyRunner {
    workdir: PathBuf,
}

impl ProcessVerifyRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl VerifyRunner for ProcessVerifyRunner {
    async fn run(&self, command: &str) -> Result<VerifyOutput> {
        info!("Running verification command: {}", command);

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| MendError::Verification(format!("Failed to run {}: {}", command, e)))?;

        let mut log = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(&stderr);
        }

        Ok(VerifyOutput {
            log,
            success: output.status.success(),
        })
    }
}

/// One failure mined from the verification log
#[derive(Debug, Clone)]
pub struct CiFailure {
    /// The matched failure line, trimmed
    pub label: String,
    /// Context window around the failure line
    pub snippet: String,
    /// File paths mentioned near the failure
    pub path_hints: Vec<String>,
    /// Test names mentioned near the failure
    pub test_hints: Vec<String>,
}

const FAILURE_KEYWORDS: [&str; 6] = [
    "error[",
    "error:",
    "FAILED",
    "panicked at",
    "FAIL:",
    "assertion",
];

fn is_failure_line(line: &str) -> bool {
    FAILURE_KEYWORDS.iter().any(|k| line.contains(k))
}

/// Mine failure sections from a log via line-proximity windows.
///
/// Fixed context radius and a fixed section cap bound pathological logs.
/// Keyword lines inside an already-captured window do not open a new one.
pub fn extract_failures(log: &str, config: &VerifyConfig) -> Vec<CiFailure> {
    let lines: Vec<&str> = log.lines().collect();
    let radius = config.context_radius;

    let mut failures = Vec::new();
    let mut covered_until = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if failures.len() >= config.max_sections {
            debug!("Section cap ({}) reached; ignoring rest of log", config.max_sections);
            break;
        }
        if i < covered_until || !is_failure_line(line) {
            continue;
        }

        let start = i.saturating_sub(radius);
        let end = (i + radius + 1).min(lines.len());
        covered_until = end;

        let snippet = lines[start..end].join("\n");
        let (path_hints, test_hints) = extract_hints(&snippet);

        failures.push(CiFailure {
            label: line.trim().chars().take(100).collect(),
            snippet,
            path_hints,
            test_hints,
        });
    }

    failures
}

fn path_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[A-Za-z0-9_][A-Za-z0-9_./\-]*\.(?:rs|toml|py|js|jsx|ts|tsx|go|java|c|h|cpp|hpp|rb|sh|yml|yaml|json)\b",
        )
        .expect("valid path hint regex")
    })
}

fn test_delim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"---- ([\w:]+)").expect("valid test delimiter regex"))
}

fn test_failed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"test ([\w:]+) \.\.\. FAILED").expect("valid test failure regex"))
}

/// Derive path and test hints from a failure snippet
pub fn extract_hints(snippet: &str) -> (Vec<String>, Vec<String>) {
    let mut paths = Vec::new();
    for m in path_hint_re().find_iter(snippet) {
        let hint = m.as_str().to_string();
        if !paths.contains(&hint) {
            paths.push(hint);
        }
    }

    let mut tests = Vec::new();
    for captures in test_delim_re()
        .captures_iter(snippet)
        .chain(test_failed_re().captures_iter(snippet))
    {
        if let Some(name) = captures.get(1) {
            let hint = name.as_str().to_string();
            if !tests.contains(&hint) {
                tests.push(hint);
            }
        }
    }

    (paths, tests)
}

/// Match a failure to a resolved outcome by hint containment either way
fn match_outcome<'a>(failure: &CiFailure, outcomes: &'a [WorkerOutcome]) -> Option<&'a WorkerOutcome> {
    outcomes
        .iter()
        .filter(|o| o.success && o.session_id.is_some())
        .find(|o| {
            let stem = file_stem(&o.path);
            failure
                .path_hints
                .iter()
                .any(|h| h.contains(o.path.as_str()) || o.path.contains(h.as_str()))
                || failure
                    .test_hints
                    .iter()
                    .any(|h| !stem.is_empty() && h.contains(stem.as_str()))
        })
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

/// What the triage run did
#[derive(Debug, Clone, Default)]
pub struct TriageReport {
    pub verification_passed: bool,
    /// Structured failures extracted from the log
    pub failures: usize,
    /// Failures dispatched to an existing resolved session
    pub matched: usize,
    /// Failures dispatched to a dedicated specialist session
    pub specialists: usize,
    /// Whether the unstructured-log broadcast fallback ran
    pub broadcast: bool,
}

/// Post-merge verification and failure dispatch
pub struct TriagePipeline<R: AgentRuntime, V: VerifyRunner> {
    sessions: Arc<SessionManager<R>>,
    runner: V,
    config: Arc<MendConfig>,
    usage: Arc<UsageMeter>,
}

impl<R: AgentRuntime, V: VerifyRunner> TriagePipeline<R, V> {
    pub fn new(
        sessions: Arc<SessionManager<R>>,
        runner: V,
        config: Arc<MendConfig>,
        usage: Arc<UsageMeter>,
    ) -> Self {
        Self {
            sessions,
            runner,
            config,
            usage,
        }
    }

    /// Run verification once and dispatch remediation for any failures
    pub async fn run(&self, outcomes: &[WorkerOutcome]) -> Result<TriageReport> {
        let Some(command) = self.config.verify.command.clone() else {
            info!("No verification command configured; skipping triage");
            return Ok(TriageReport {
                verification_passed: true,
                ..Default::default()
            });
        };

        let output = self.runner.run(&command).await?;
        if output.success {
            info!("Verification passed; nothing to triage");
            return Ok(TriageReport {
                verification_passed: true,
                ..Default::default()
            });
        }

        let prepared = prepare_log(&self.sessions, &self.config, &self.usage, &output.log).await;
        let failures = extract_failures(&output.log, &self.config.verify);
        info!(
            "Verification failed: {} structured failures extracted from {} chars of log",
            failures.len(),
            output.log.len()
        );

        if failures.is_empty() {
            return self.broadcast(outcomes, &prepared.text).await;
        }

        let mut matched = 0;
        let mut specialists = 0;

        for failure in &failures {
            let prompt = build_remediation_prompt(failure, &prepared.text);

            match match_outcome(failure, outcomes) {
                Some(outcome) => {
                    // Re-use the session that just changed this file
                    let session_id = outcome.session_id.as_deref().unwrap_or_default();
                    let handle = SessionHandle::new(session_id, outcome.path.clone());
                    debug!("Dispatching '{}' to session for {}", failure.label, outcome.path);

                    match self.dispatch(&handle, &prompt).await {
                        Ok(()) => matched += 1,
                        Err(e) => warn!("Remediation dispatch failed for {}: {}", outcome.path, e),
                    }
                }
                None => {
                    let key = SessionKey::ci_specialist(&failure.label);
                    let options = SessionOptions::new(key.session_label())
                        .with_model(self.config.models.worker);

                    match self.sessions.acquire(&key, options).await {
                        Ok(handle) => match self.dispatch(&handle, &prompt).await {
                            Ok(()) => specialists += 1,
                            Err(e) => {
                                warn!("Specialist dispatch failed for '{}': {}", failure.label, e)
                            }
                        },
                        Err(e) => {
                            warn!("Could not acquire specialist for '{}': {}", failure.label, e)
                        }
                    }
                }
            }
        }

        Ok(TriageReport {
            verification_passed: false,
            failures: failures.len(),
            matched,
            specialists,
            broadcast: false,
        })
    }

    /// Unstructured-log fallback: push the prepared log to every
    /// successful outcome's session instead of spawning specialists
    async fn broadcast(&self, outcomes: &[WorkerOutcome], prepared: &str) -> Result<TriageReport> {
        warn!("No structured failures extracted; broadcasting prepared log to resolved sessions");

        let prompt = build_broadcast_prompt(prepared);
        let mut matched = 0;

        for outcome in outcomes.iter().filter(|o| o.success) {
            let Some(session_id) = &outcome.session_id else {
                continue;
            };
            let handle = SessionHandle::new(session_id.clone(), outcome.path.clone());

            match self.dispatch(&handle, &prompt).await {
                Ok(()) => matched += 1,
                Err(e) => warn!("Broadcast to {} failed: {}", outcome.path, e),
            }
        }

        Ok(TriageReport {
            verification_passed: false,
            failures: 0,
            matched,
            specialists: 0,
            broadcast: true,
        })
    }

    async fn dispatch(&self, handle: &SessionHandle, prompt: &str) -> Result<()> {
        let output = self
            .sessions
            .runtime()
            .run_turn(handle, prompt, TurnOptions::default())
            .await?;
        self.usage.record(&output.usage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_agent::MockRuntime;

    const CARGO_LOG: &str = r#"   Compiling mend v0.1.0
warning: unused variable `x`
 --> src/parser.rs:10:9
test tests::parse_empty ... ok
test tests::parse_conflict ... FAILED

failures:

---- tests::parse_conflict stdout ----
thread 'tests::parse_conflict' panicked at src/parser.rs:42:5:
assertion `left == right` failed
"#;

    struct StaticRunner {
        log: &'static str,
        success: bool,
    }

    #[async_trait]
    impl VerifyRunner for StaticRunner {
        async fn run(&self, _command: &str) -> Result<VerifyOutput> {
            Ok(VerifyOutput {
                log: self.log.to_string(),
                success: self.success,
            })
        }
    }

    fn pipeline(
        runtime: MockRuntime,
        runner: StaticRunner,
        command: Option<&str>,
    ) -> (
        TriagePipeline<MockRuntime, StaticRunner>,
        Arc<MockRuntime>,
    ) {
        let runtime = Arc::new(runtime);
        let sessions = Arc::new(SessionManager::new(runtime.clone()));
        let mut config = MendConfig::default();
        config.verify.command = command.map(str::to_string);

        (
            TriagePipeline::new(
                sessions,
                runner,
                Arc::new(config),
                Arc::new(UsageMeter::new()),
            ),
            runtime,
        )
    }

    fn resolved_outcome(path: &str, session_id: &str) -> WorkerOutcome {
        WorkerOutcome::success(path, "resolved").with_session(session_id)
    }

    #[test]
    fn test_extract_failures_from_cargo_log() {
        let failures = extract_failures(CARGO_LOG, &VerifyConfig::default());

        assert!(!failures.is_empty());
        let first = &failures[0];
        assert!(first.label.contains("FAILED"));
        assert!(first.path_hints.iter().any(|h| h.contains("src/parser.rs")));
        assert!(first
            .test_hints
            .iter()
            .any(|h| h.contains("tests::parse_conflict")));
    }

    #[test]
    fn test_extract_failures_respects_section_cap() {
        let mut config = VerifyConfig::default();
        config.max_sections = 2;
        config.context_radius = 0;

        let log = (0..10)
            .map(|i| format!("error: failure number {}", i))
            .collect::<Vec<_>>()
            .join("\nok line\n");

        let failures = extract_failures(&log, &config);
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_extract_failures_merges_nearby_keywords() {
        let config = VerifyConfig::default(); // radius 8
        let log = "error: first\nerror: second\nerror: third\n";

        // All three keyword lines fall inside the first window
        let failures = extract_failures(log, &config);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_extract_failures_clean_log() {
        assert!(extract_failures("all tests passed\n", &VerifyConfig::default()).is_empty());
    }

    #[test]
    fn test_extract_hints() {
        let (paths, tests) = extract_hints(
            "---- tests::scheduler_halt stdout ----\npanicked at crates/mend-core/src/types.rs:9\ntest tests::other ... FAILED",
        );

        assert!(paths.contains(&"crates/mend-core/src/types.rs".to_string()));
        assert!(tests.contains(&"tests::scheduler_halt".to_string()));
        assert!(tests.contains(&"tests::other".to_string()));
    }

    #[test]
    fn test_match_outcome_containment_both_directions() {
        let outcomes = vec![resolved_outcome("src/parser.rs", "s-1")];

        // Hint contains the outcome path
        let failure = CiFailure {
            label: "err".to_string(),
            snippet: String::new(),
            path_hints: vec!["/repo/src/parser.rs".to_string()],
            test_hints: vec![],
        };
        assert!(match_outcome(&failure, &outcomes).is_some());

        // Outcome path contains the hint
        let failure = CiFailure {
            label: "err".to_string(),
            snippet: String::new(),
            path_hints: vec!["parser.rs".to_string()],
            test_hints: vec![],
        };
        assert!(match_outcome(&failure, &outcomes).is_some());

        // Test hint carries the file stem
        let failure = CiFailure {
            label: "err".to_string(),
            snippet: String::new(),
            path_hints: vec![],
            test_hints: vec!["parser::tests::roundtrip".to_string()],
        };
        assert!(match_outcome(&failure, &outcomes).is_some());

        // Unrelated failure
        let failure = CiFailure {
            label: "err".to_string(),
            snippet: String::new(),
            path_hints: vec!["src/other.rs".to_string()],
            test_hints: vec![],
        };
        assert!(match_outcome(&failure, &outcomes).is_none());
    }

    #[test]
    fn test_match_outcome_skips_failed_outcomes() {
        let outcomes = vec![WorkerOutcome::failure("src/parser.rs", "persists")];
        let failure = CiFailure {
            label: "err".to_string(),
            snippet: String::new(),
            path_hints: vec!["src/parser.rs".to_string()],
            test_hints: vec![],
        };
        assert!(match_outcome(&failure, &outcomes).is_none());
    }

    #[tokio::test]
    async fn test_no_command_skips_triage() {
        let (pipeline, runtime) = pipeline(
            MockRuntime::new(),
            StaticRunner {
                log: "",
                success: true,
            },
            None,
        );

        let report = pipeline.run(&[]).await.unwrap();
        assert!(report.verification_passed);
        assert_eq!(runtime.session_count(), 0);
    }

    #[tokio::test]
    async fn test_verification_success_skips_dispatch() {
        let (pipeline, runtime) = pipeline(
            MockRuntime::new(),
            StaticRunner {
                log: "all green",
                success: true,
            },
            Some("cargo test"),
        );

        let report = pipeline
            .run(&[resolved_outcome("src/parser.rs", "s-1")])
            .await
            .unwrap();

        assert!(report.verification_passed);
        assert_eq!(runtime.turns().len(), 0);
    }

    #[tokio::test]
    async fn test_failure_routed_to_owning_session() {
        let (pipeline, runtime) = pipeline(
            MockRuntime::new(),
            StaticRunner {
                log: CARGO_LOG,
                success: false,
            },
            Some("cargo test"),
        );

        let report = pipeline
            .run(&[resolved_outcome("src/parser.rs", "s-42")])
            .await
            .unwrap();

        assert!(!report.verification_passed);
        assert!(report.matched >= 1);
        assert_eq!(report.specialists, 0);
        assert!(!report.broadcast);

        let turns = runtime.turns();
        assert!(turns
            .iter()
            .any(|t| t.session_id == "s-42" && t.prompt.contains("CI FAILURE")));
    }

    #[tokio::test]
    async fn test_unmatched_failure_gets_specialist() {
        let (pipeline, runtime) = pipeline(
            MockRuntime::new(),
            StaticRunner {
                log: CARGO_LOG,
                success: false,
            },
            Some("cargo test"),
        );

        // Resolved outcome for an unrelated file
        let report = pipeline
            .run(&[resolved_outcome("docs/README.md", "s-1")])
            .await
            .unwrap();

        assert!(report.specialists >= 1);
        assert_eq!(report.matched, 0);
        assert!(runtime.session_count() >= 1);
        assert!(runtime
            .turns()
            .iter()
            .any(|t| t.label.contains("ci_specialist")));
    }

    #[tokio::test]
    async fn test_unstructured_log_broadcasts_to_resolved_sessions() {
        let (pipeline, runtime) = pipeline(
            MockRuntime::new(),
            StaticRunner {
                log: "something went wrong but nothing matches the patterns\n",
                success: false,
            },
            Some("cargo test"),
        );

        let outcomes = vec![
            resolved_outcome("src/a.rs", "s-1"),
            resolved_outcome("src/b.rs", "s-2"),
            WorkerOutcome::failure("src/c.rs", "persists"),
        ];
        let report = pipeline.run(&outcomes).await.unwrap();

        assert!(report.broadcast);
        assert_eq!(report.matched, 2);
        // No specialist sessions spawned for an undecomposable log
        assert_eq!(runtime.session_count(), 0);
        assert_eq!(
            runtime.turn_count_matching("POST-MERGE VERIFICATION FAILED"),
            2
        );
    }
}
