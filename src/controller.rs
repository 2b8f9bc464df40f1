//! Bounded propose / apply / evaluate / debug loop.
//!
//! The controller owns no capabilities: oracles, the human session, the
//! process runner and the patch mechanism are all injected through
//! [`Capabilities`]. Every step leaves an artifact in the deliverable
//! directory; evaluation output is kept per iteration (`stdout_0.txt`,
//! `stdout_1.txt`, ...) next to a copy of the latest, and `iterations.json`
//! plus `summary.md` are written on every exit path, including errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::oracle::{propose_or_degrade, ChangeOracle, ChangeProposal};
use crate::patch::{apply_patch_safe, summarize_patch, ApplyMechanism};
use crate::runner::{CommandSpec, ProcessOutput, ProcessRunner};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Declined, nothing proposed, or the proposal was rejected
    Unresolved,
    /// Debug iterations ran out while tests still fail
    BoundExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum Outcome {
    Done,
    Stopped(StopReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("done"),
            Outcome::Stopped(StopReason::Unresolved) => f.write_str("stopped (unresolved)"),
            Outcome::Stopped(StopReason::BoundExceeded) => f.write_str("stopped (bound exceeded)"),
        }
    }
}

/// What happened in one evaluate/debug round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub probe_exit: Option<i32>,
    pub probe_timed_out: bool,
    pub test_exit: Option<i32>,
    pub test_timed_out: bool,
    pub debug_patch: Option<String>,
    pub debug_notes: Option<String>,
    pub apply_error: Option<String>,
}

impl IterationRecord {
    fn new(iteration: usize) -> Self {
        Self {
            iteration,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Name shown in approval prompts
    pub target_name: String,
    pub max_iterations: usize,
    pub max_failure_chars: usize,
    pub max_debug_patch_lines: usize,
    pub python: String,
    pub test_command: CommandSpec,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            target_name: "target".to_string(),
            max_iterations: 3,
            max_failure_chars: 20_000,
            max_debug_patch_lines: 400,
            python: "python3".to_string(),
            test_command: CommandSpec::new("python3").arg("-m").arg("pytest").arg("-q"),
        }
    }
}

/// Injected capabilities the controller drives
pub struct Capabilities<'a> {
    pub codegen: &'a dyn ChangeOracle,
    pub debugger: &'a dyn ChangeOracle,
    pub session: &'a mut dyn Session,
    pub runner: &'a dyn ProcessRunner,
    pub applier: &'a dyn ApplyMechanism,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerReport {
    pub outcome: Outcome,
    /// Debug patches applied
    pub debug_iterations: usize,
    pub patches_applied: usize,
    pub records: Vec<IterationRecord>,
    pub notes: Vec<String>,
}

#[derive(Default)]
struct Trail {
    records: Vec<IterationRecord>,
    notes: Vec<String>,
    applied: usize,
    debug_iterations: usize,
}

impl Trail {
    fn begin(&mut self, iteration: usize) {
        self.records.push(IterationRecord::new(iteration));
    }

    fn current(&mut self) -> &mut IterationRecord {
        if self.records.is_empty() {
            self.records.push(IterationRecord::new(0));
        }
        let last = self.records.len() - 1;
        &mut self.records[last]
    }

    fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!("{}", note);
        self.notes.push(note);
    }
}

pub struct IterationController {
    settings: ControllerSettings,
    target_root: PathBuf,
    deliverable_dir: PathBuf,
}

impl IterationController {
    pub fn new(settings: ControllerSettings, target_root: impl Into<PathBuf>, deliverable_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            target_root: target_root.into(),
            deliverable_dir: deliverable_dir.into(),
        }
    }

    pub fn deliverable_dir(&self) -> &Path {
        &self.deliverable_dir
    }

    /// Run the loop for one evidence context.
    pub fn run(&self, context: &str, caps: &mut Capabilities<'_>) -> Result<ControllerReport> {
        fs::create_dir_all(&self.deliverable_dir)?;

        let mut trail = Trail::default();
        let result = self.drive(context, caps, &mut trail);
        self.write_audit(&trail, result.as_ref().ok())?;
        let outcome = result?;

        info!(
            "Controller finished: {} after {} debug iterations",
            outcome, trail.debug_iterations
        );
        Ok(ControllerReport {
            outcome,
            debug_iterations: trail.debug_iterations,
            patches_applied: trail.applied,
            records: trail.records,
            notes: trail.notes,
        })
    }

    fn drive(&self, context: &str, caps: &mut Capabilities<'_>, trail: &mut Trail) -> Result<Outcome> {
        // Propose
        let proposal = propose_or_degrade(caps.codegen, context);
        self.write_proposal(&proposal)?;
        if !proposal.available {
            trail.note(format!("Codegen oracle unavailable: {}", proposal.notes));
            return Ok(Outcome::Stopped(StopReason::Unresolved));
        }

        let mut iteration = 0;
        trail.begin(iteration);

        // Apply-Gate
        if proposal.has_patch() {
            let summary = summarize_patch(&proposal.patch);
            caps.session.tell(&format!("Patch summary: {}", summary.describe()));
            let prompt = format!("Approve patch apply to {} repo?", self.settings.target_name);
            if caps.session.approve(&prompt)? {
                self.apply(&proposal.patch, caps, trail)?;
            } else {
                trail.note("Initial patch declined; evaluating the unchanged repository.");
            }
        } else {
            trail.note("Codegen proposed no patch; evaluating the unchanged repository.");
        }

        loop {
            // Evaluate
            let failure = match trail.current().apply_error.clone() {
                Some(error) => {
                    let failure = format!("Patch could not be applied: {}", error);
                    self.write_iteration("traceback", "txt", iteration, &failure)?;
                    failure
                }
                None => match self.evaluate(iteration, caps, trail)? {
                    None => return Ok(Outcome::Done),
                    Some(failure) => failure,
                },
            };

            // Debug-Gate
            if iteration >= self.settings.max_iterations {
                trail.note(format!(
                    "Still failing after {} debug iterations.",
                    self.settings.max_iterations
                ));
                return Ok(Outcome::Stopped(StopReason::BoundExceeded));
            }
            if !caps.session.approve("Tests failed. Approve debug iteration?")? {
                trail.note("Debug iteration declined.");
                return Ok(Outcome::Stopped(StopReason::Unresolved));
            }

            let number = iteration + 1;
            let debug_context = tail_chars(&failure, self.settings.max_failure_chars);
            let fix = propose_or_degrade(caps.debugger, debug_context);
            self.write(&format!("debug_notes_{}.md", number), &fix.notes)?;
            trail.current().debug_notes = Some(fix.notes.clone());

            if !fix.probe_snippet.trim().is_empty() {
                self.write("snippet.py", &fix.probe_snippet)?;
            }

            if !fix.available {
                trail.note(format!("Debug oracle unavailable: {}", fix.notes));
                return Ok(Outcome::Stopped(StopReason::Unresolved));
            }
            if !fix.has_patch() {
                trail.note("Debugger proposed no patch.");
                return Ok(Outcome::Stopped(StopReason::Unresolved));
            }

            let summary = summarize_patch(&fix.patch);
            if summary.changed_lines() > self.settings.max_debug_patch_lines {
                trail.note(format!(
                    "Debug patch rejected: {} changed lines exceeds the limit of {}.",
                    summary.changed_lines(),
                    self.settings.max_debug_patch_lines
                ));
                return Ok(Outcome::Stopped(StopReason::Unresolved));
            }

            caps.session.tell(&format!("Debug patch summary: {}", summary.describe()));
            if !caps.session.approve("Approve debug patch apply?")? {
                trail.note("Debug patch declined.");
                return Ok(Outcome::Stopped(StopReason::Unresolved));
            }

            self.write(&format!("debug_patch_{}.diff", number), &fix.patch)?;
            trail.current().debug_patch = Some(fix.patch.clone());

            iteration = number;
            trail.debug_iterations = iteration;
            trail.begin(iteration);
            self.apply(&fix.patch, caps, trail)?;
        }
    }

    /// Apply `patch`; safety and VCS failures are recorded, anything else aborts.
    fn apply(&self, patch: &str, caps: &mut Capabilities<'_>, trail: &mut Trail) -> Result<()> {
        match apply_patch_safe(patch, &self.target_root, caps.applier) {
            Ok(_) => {
                trail.applied += 1;
                Ok(())
            }
            Err(e) if e.is_patch_failure() => {
                warn!("Patch not applied: {}", e);
                caps.session.tell(&format!("Patch not applied: {}", e));
                trail.current().apply_error = Some(e.to_string());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the probe (when present) and the test suite; `Some` carries the failure output.
    fn evaluate(&self, iteration: usize, caps: &mut Capabilities<'_>, trail: &mut Trail) -> Result<Option<String>> {
        let snippet = self.deliverable_dir.join("snippet.py");
        let has_probe = fs::read_to_string(&snippet)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);

        let probe = if has_probe {
            let snippet = snippet.canonicalize()?;
            let command = CommandSpec::new(&self.settings.python).arg(snippet.to_string_lossy());
            Some(caps.runner.run(&command, &self.target_root)?)
        } else {
            debug!("No probe snippet, skipping probe");
            None
        };
        let tests = caps.runner.run(&self.settings.test_command, &self.target_root)?;

        let record = trail.current();
        record.probe_exit = probe.as_ref().map(|p| p.exit_code);
        record.probe_timed_out = probe.as_ref().map_or(false, |p| p.timed_out);
        record.test_exit = Some(tests.exit_code);
        record.test_timed_out = tests.timed_out;

        let probe_stdout = probe.as_ref().map_or("", |p| p.stdout.as_str());
        let probe_stderr = probe.as_ref().map_or("", |p| p.stderr.as_str());
        self.write_iteration("stdout", "txt", iteration, &format!("{}\n{}", probe_stdout, tests.stdout))?;
        self.write_iteration("stderr", "txt", iteration, &format!("{}\n{}", probe_stderr, tests.stderr))?;
        self.write_iteration(
            "test_run",
            "json",
            iteration,
            &serde_json::to_string_pretty(&serde_json::json!({
                "iteration": iteration,
                "probe_exit": record.probe_exit,
                "probe_timed_out": record.probe_timed_out,
                "test_exit": tests.exit_code,
                "test_timed_out": tests.timed_out,
            }))?,
        )?;

        let probe_ok = probe.as_ref().map_or(true, ProcessOutput::success);
        info!(
            "Iteration {}: probe {:?}, tests {}",
            iteration, record.probe_exit, tests.exit_code
        );
        if probe_ok && tests.success() {
            return Ok(None);
        }

        let failure = failure_report(probe.as_ref(), &tests);
        self.write_iteration("traceback", "txt", iteration, &failure)?;
        Ok(Some(failure))
    }

    fn write_proposal(&self, proposal: &ChangeProposal) -> Result<()> {
        self.write("patch.diff", &proposal.patch)?;
        self.write("snippet.py", &proposal.probe_snippet)?;
        self.write("test_plan.md", &proposal.tests_added.join("\n"))?;
        self.write("notes.md", &proposal.notes)
    }

    fn write_audit(&self, trail: &Trail, outcome: Option<&Outcome>) -> Result<()> {
        self.write("iterations.json", &serde_json::to_string_pretty(&trail.records)?)?;

        let mut summary = format!(
            "# Run Summary\n\nOutcome: {}\nIterations: {}\nPatches applied: {}\n",
            outcome.map_or_else(|| "error".to_string(), |o| o.to_string()),
            trail.debug_iterations,
            trail.applied
        );
        if !trail.notes.is_empty() {
            summary.push_str("\n## Notes\n");
            for note in &trail.notes {
                summary.push_str(&format!("- {}\n", note));
            }
        }
        self.write("summary.md", &summary)
    }

    /// `{stem}_{iteration}.{ext}`, plus `{stem}.{ext}` holding the latest copy
    fn write_iteration(&self, stem: &str, ext: &str, iteration: usize, content: &str) -> Result<()> {
        self.write(&format!("{}_{}.{}", stem, iteration, ext), content)?;
        self.write(&format!("{}.{}", stem, ext), content)
    }

    fn write(&self, name: &str, content: &str) -> Result<()> {
        fs::write(self.deliverable_dir.join(name), content)?;
        Ok(())
    }
}

fn failure_report(probe: Option<&ProcessOutput>, tests: &ProcessOutput) -> String {
    let mut report = String::new();
    if let Some(probe) = probe {
        report.push_str(&section("probe", probe));
    }
    report.push_str(&section("tests", tests));
    report
}

fn section(name: &str, output: &ProcessOutput) -> String {
    let status = if output.timed_out {
        "timed out".to_string()
    } else {
        format!("exit {}", output.exit_code)
    };
    format!("## {} ({})\n{}\n{}\n", name, status, output.stdout, output.stderr)
}

/// Last `max_chars` characters of `text`
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}
