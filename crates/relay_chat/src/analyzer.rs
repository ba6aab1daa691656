//! Project analysis pipelines.
//!
//! A pipeline is an ordered list of [`StepDescriptor`]s. Each descriptor owns a
//! prompt builder that sees the workspace scan and every step completed so
//! far, and decides whether to issue a prompt, skip, or end the pipeline with
//! a fixed message. The driver runs the prompts one after another through the
//! local backend, streaming tokens to the attached sink.
//!
//! ```text
//! structure: ScanStructure -> PromptStructure
//! core:      ScanStructure -> SelectImportantFiles -> ReadImportantFiles -> PromptCore
//! full:      ScanStructure -> PromptStructure -> [PromptBackend] -> [PromptFrontend]
//!            -> ReadDependencyManifests -> PromptDependencies -> PromptSummary
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::StreamingClient;
use crate::config::{AnalysisConfig, ScanConfig};
use crate::router::AnalysisFocus;
use crate::scan::{read_excerpt, scan_workspace, EntryKind, FileStructureEntry, ScanMode, ScanReport};
use crate::sink::ProgressSink;
use crate::stream::{forward, run_streaming, StreamStats};

/// Placeholder for a dependency manifest that does not exist.
pub const MANIFEST_NOT_FOUND: &str = "Not found";

/// Returned instead of a prompt when the workspace has no recognised files.
pub const NO_FILES_FOUND: &str = "No project files found";

/// Returned instead of a prompt when no important files could be read.
pub const NO_CORE_FILES_FOUND: &str = "No core files found";

/// One labelled block of analysis output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStep {
    pub label: String,
    #[serde(rename = "resultText")]
    pub result_text: String,
}

/// What a step wants the driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepPlan {
    /// Send this prompt to the local backend
    Prompt(String),
    /// Nothing to analyse; continue with the next step
    Skip,
    /// End the pipeline with this text, without calling the backend
    Finish(String),
}

/// Inputs available to every prompt builder.
pub struct StepContext<'a> {
    pub root: &'a Path,
    pub config: &'a AnalysisConfig,
    pub scan: &'a ScanReport,
    read_failures: AtomicUsize,
}

impl<'a> StepContext<'a> {
    pub fn new(root: &'a Path, config: &'a AnalysisConfig, scan: &'a ScanReport) -> Self {
        Self {
            root,
            config,
            scan,
            read_failures: AtomicUsize::new(0),
        }
    }

    /// Read an excerpt, absorbing failures. Returns `None` for unreadable files.
    pub fn read(&self, relative_path: &str, max_chars: usize) -> Option<String> {
        match read_excerpt(self.root, relative_path, max_chars) {
            Ok(content) => Some(content),
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping file during analysis: {}", e);
                None
            }
        }
    }

    pub fn read_failures(&self) -> usize {
        self.read_failures.load(Ordering::Relaxed)
    }

    /// Files under `dir` ending in one of `suffixes`, in scan order.
    fn files_under(&self, dir: &str, suffixes: &[String]) -> Vec<&FileStructureEntry> {
        self.scan
            .files()
            .filter(|f| {
                f.relative_path.starts_with(dir)
                    && suffixes.iter().any(|s| f.relative_path.ends_with(s.as_str()))
            })
            .collect()
    }
}

/// Builds the prompt for one step from the scan and the completed steps.
pub type PromptBuilder = fn(&StepContext<'_>, &[AnalysisStep]) -> StepPlan;

/// Declarative description of one pipeline stage.
#[derive(Clone, Copy)]
pub struct StepDescriptor {
    pub label: &'static str,
    /// Progress notice sent to the sink before the prompt is issued
    pub announce: &'static str,
    pub build: PromptBuilder,
}

impl std::fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("label", &self.label)
            .finish()
    }
}

/// The step whose backend call aborted a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub label: String,
    pub cause: String,
}

/// Counters gathered during one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub scanned_entries: usize,
    pub scan_skipped: usize,
    pub read_failures: usize,
    pub skipped_steps: Vec<String>,
    pub stream: StreamStats,
}

/// Everything a pipeline produced. Failures are data, never raised.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutcome {
    pub steps: Vec<AnalysisStep>,
    /// Fixed text the pipeline ended with instead of calling the backend
    pub finished: Option<String>,
    pub failure: Option<StepFailure>,
    pub stats: AnalysisStats,
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn step_labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    /// Ordered concatenation of the steps, each under its label.
    pub fn render(&self) -> String {
        let mut blocks: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("=== {} ===\n{}", s.label, s.result_text))
            .collect();
        if let Some(ref text) = self.finished {
            blocks.push(text.clone());
        }
        if let Some(ref failure) = self.failure {
            blocks.push(failure_text(failure));
        }
        blocks.join("\n\n")
    }
}

fn failure_text(failure: &StepFailure) -> String {
    format!(
        "Analysis failed at step '{}': {}",
        failure.label, failure.cause
    )
}

// Prompt builders

fn structure_listing(scan: &ScanReport) -> String {
    scan.entries
        .iter()
        .map(|e| match e.kind {
            EntryKind::Directory => format!("{}/", e.relative_path),
            EntryKind::File => format!("    {}", e.relative_path),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_structure_overview(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    if !ctx.scan.has_files() {
        return StepPlan::Finish(NO_FILES_FOUND.to_string());
    }
    StepPlan::Prompt(format!(
        "Analyze the file structure of this project.\n\n\
         Files:\n{}\n\n\
         Briefly explain:\n\
         1. The basic architecture (frontend/backend split, monolith, ...)\n\
         2. The main modules\n\
         3. Which files matter most",
        structure_listing(ctx.scan)
    ))
}

fn is_important(entry: &FileStructureEntry, patterns: &[String]) -> bool {
    let name = entry.base_name();
    patterns.iter().any(|p| name.contains(p.as_str()))
}

fn build_core_files(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    let excerpts: Vec<String> = ctx
        .scan
        .files()
        .filter(|f| is_important(f, &ctx.config.important_patterns))
        .filter_map(|f| {
            ctx.read(&f.relative_path, ctx.config.core_excerpt_chars)
                .map(|content| format!("=== {} ===\n```\n{}\n```", f.relative_path, content))
        })
        .collect();

    if excerpts.is_empty() {
        return StepPlan::Finish(NO_CORE_FILES_FOUND.to_string());
    }

    StepPlan::Prompt(format!(
        "Analyze the core files of this project:\n\n{}\n\n\
         Briefly explain:\n\
         1. What each file does\n\
         2. How the core functionality is implemented\n\
         3. Key dependencies and technology choices",
        excerpts.join("\n")
    ))
}

fn build_file_structure(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    if !ctx.scan.has_files() {
        return StepPlan::Finish(NO_FILES_FOUND.to_string());
    }
    StepPlan::Prompt(format!(
        "Analyze the following project file structure:\n\n\
         Entries:\n{}\n\n\
         Please analyze:\n\
         1. The main components and directory layout\n\
         2. How frontend and backend are separated\n\
         3. The role of the main configuration files",
        structure_listing(ctx.scan)
    ))
}

/// Embed up to `max_files_per_area` readable files under `dir`.
fn area_excerpts(ctx: &StepContext<'_>, dir: &str, suffixes: &[String], fence: &str) -> Vec<String> {
    ctx.files_under(dir, suffixes)
        .into_iter()
        .filter_map(|f| {
            ctx.read(&f.relative_path, ctx.config.source_excerpt_chars)
                .map(|content| format!("File: {}\n```{}\n{}\n```", f.relative_path, fence, content))
        })
        .take(ctx.config.max_files_per_area)
        .collect()
}

fn build_backend(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    let excerpts = area_excerpts(
        ctx,
        &ctx.config.backend_dir,
        &ctx.config.backend_suffixes,
        "python",
    );
    if excerpts.is_empty() {
        return StepPlan::Skip;
    }
    StepPlan::Prompt(format!(
        "Analyze the backend code architecture:\n\n{}\n\n\
         Please analyze:\n\
         1. The framework and main dependencies\n\
         2. The API design\n\
         3. How business logic is organised",
        excerpts.join("\n")
    ))
}

fn build_frontend(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    let excerpts = area_excerpts(
        ctx,
        &ctx.config.frontend_dir,
        &ctx.config.frontend_suffixes,
        "javascript",
    );
    if excerpts.is_empty() {
        return StepPlan::Skip;
    }
    StepPlan::Prompt(format!(
        "Analyze the frontend code architecture:\n\n{}\n\n\
         Please analyze:\n\
         1. The framework and main dependencies\n\
         2. The component structure\n\
         3. How state is managed",
        excerpts.join("\n")
    ))
}

fn build_dependencies(ctx: &StepContext<'_>, _prior: &[AnalysisStep]) -> StepPlan {
    let sections: Vec<String> = ctx
        .config
        .manifests
        .iter()
        .map(|m| {
            let content = if ctx.root.join(&m.path).is_file() {
                ctx.read(&m.path, usize::MAX)
                    .unwrap_or_else(|| MANIFEST_NOT_FOUND.to_string())
            } else {
                MANIFEST_NOT_FOUND.to_string()
            };
            format!("{} dependencies:\n{}", m.label, content)
        })
        .collect();

    StepPlan::Prompt(format!(
        "Analyze the project dependencies:\n\n{}\n\n\
         Please analyze:\n\
         1. What the main packages are used for\n\
         2. Version compatibility\n\
         3. Potential dependency problems",
        sections.join("\n\n")
    ))
}

fn build_summary(_ctx: &StepContext<'_>, prior: &[AnalysisStep]) -> StepPlan {
    let findings: Vec<String> = prior
        .iter()
        .map(|s| format!("{}:\n{}", s.label, s.result_text))
        .collect();
    StepPlan::Prompt(format!(
        "Based on the analysis above:\n{}\n\n\
         Please summarise:\n\
         1. The overall architecture\n\
         2. Strengths of the chosen stack\n\
         3. Possible improvements",
        findings.join("\n")
    ))
}

/// Quick overview of the file tree.
pub const STRUCTURE_PIPELINE: &[StepDescriptor] = &[StepDescriptor {
    label: "Structure",
    announce: "Scanned project structure, analyzing...\n",
    build: build_structure_overview,
}];

/// Excerpts of the important files.
pub const CORE_PIPELINE: &[StepDescriptor] = &[StepDescriptor {
    label: "Core",
    announce: "Read core files, analyzing...\n",
    build: build_core_files,
}];

/// Standalone multi-step report.
pub const FULL_PIPELINE: &[StepDescriptor] = &[
    StepDescriptor {
        label: "File Structure",
        announce: "Analyzing file structure...\n",
        build: build_file_structure,
    },
    StepDescriptor {
        label: "Backend Architecture",
        announce: "Analyzing backend architecture...\n",
        build: build_backend,
    },
    StepDescriptor {
        label: "Frontend Architecture",
        announce: "Analyzing frontend architecture...\n",
        build: build_frontend,
    },
    StepDescriptor {
        label: "Dependencies",
        announce: "Analyzing dependencies...\n",
        build: build_dependencies,
    },
    StepDescriptor {
        label: "Summary",
        announce: "Writing summary...\n",
        build: build_summary,
    },
];

/// Runs analysis pipelines against one workspace through the local backend.
#[derive(Clone)]
pub struct ProjectAnalyzer {
    client: Arc<dyn StreamingClient>,
    root: PathBuf,
    scan: ScanConfig,
    config: AnalysisConfig,
}

impl ProjectAnalyzer {
    pub fn new(
        client: Arc<dyn StreamingClient>,
        root: impl Into<PathBuf>,
        scan: ScanConfig,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            client,
            root: root.into(),
            scan,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Quick analysis used on the chat path.
    pub async fn analyze(&self, focus: AnalysisFocus, sink: Option<&dyn ProgressSink>) -> AnalysisOutcome {
        let (pipeline, opening) = match focus {
            AnalysisFocus::Structure => (STRUCTURE_PIPELINE, "Starting project structure analysis...\n"),
            AnalysisFocus::Core => (CORE_PIPELINE, "Starting core file analysis...\n"),
        };
        self.run(pipeline, ScanMode::Quick, opening, sink).await
    }

    /// Full multi-step report.
    pub async fn analyze_project_structure(&self, sink: Option<&dyn ProgressSink>) -> AnalysisOutcome {
        self.run(FULL_PIPELINE, ScanMode::Full, "Starting full project analysis...\n", sink)
            .await
    }

    /// Scan the workspace, then execute `pipeline` step by step.
    pub async fn run(
        &self,
        pipeline: &[StepDescriptor],
        mode: ScanMode,
        opening: &str,
        sink: Option<&dyn ProgressSink>,
    ) -> AnalysisOutcome {
        let mut outcome = AnalysisOutcome::default();
        forward(sink, opening, &mut outcome.stats.stream);

        let scan = scan_workspace(&self.root, &self.scan, mode);
        outcome.stats.scanned_entries = scan.entries.len();
        outcome.stats.scan_skipped = scan.skipped;
        info!(
            "Analyzing {} ({} entries, {} steps)",
            self.root.display(),
            scan.entries.len(),
            pipeline.len()
        );

        let ctx = StepContext::new(&self.root, &self.config, &scan);

        for step in pipeline {
            let plan = (step.build)(&ctx, &outcome.steps);
            let prompt = match plan {
                StepPlan::Prompt(prompt) => prompt,
                StepPlan::Skip => {
                    debug!("Skipping analysis step '{}': nothing to analyze", step.label);
                    outcome.stats.skipped_steps.push(step.label.to_string());
                    continue;
                }
                StepPlan::Finish(text) => {
                    debug!("Analysis ended at step '{}': {}", step.label, text);
                    outcome.finished = Some(text);
                    break;
                }
            };

            forward(sink, step.announce, &mut outcome.stats.stream);

            match run_streaming(self.client.as_ref(), &prompt, sink).await {
                Ok(output) => {
                    outcome.stats.stream.merge(&output.stats);
                    outcome.steps.push(AnalysisStep {
                        label: step.label.to_string(),
                        result_text: output.text,
                    });
                }
                Err(e) => {
                    let failure = StepFailure {
                        label: step.label.to_string(),
                        cause: e.to_string(),
                    };
                    warn!("{}", failure_text(&failure));
                    forward(sink, &failure_text(&failure), &mut outcome.stats.stream);
                    outcome.failure = Some(failure);
                    break;
                }
            }
        }

        outcome.stats.read_failures = ctx.read_failures();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockStream};
    use crate::sink::CollectingSink;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let temp = tempdir().unwrap();
        for (rel, content) in files {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        temp
    }

    fn analyzer(mock: &MockBackend, root: &Path) -> ProjectAnalyzer {
        ProjectAnalyzer::new(
            Arc::new(mock.clone()),
            root,
            ScanConfig::default(),
            AnalysisConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_structure_on_empty_workspace_skips_backend() {
        let temp = workspace(&[]);
        let mock = MockBackend::new();

        let outcome = analyzer(&mock, temp.path())
            .analyze(AnalysisFocus::Structure, None)
            .await;

        assert!(outcome.is_success());
        assert!(outcome.render().contains(NO_FILES_FOUND));
        assert!(mock.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_structure_prompt_lists_files() {
        let temp = workspace(&[("backend/app.py", "x"), ("frontend/src/App.js", "y")]);
        let mock = MockBackend::new().add_stream(MockStream::tokens(&["two ", "tiers"]));
        let sink = CollectingSink::new();

        let outcome = analyzer(&mock, temp.path())
            .analyze(AnalysisFocus::Structure, Some(&sink))
            .await;

        assert_eq!(outcome.render(), "=== Structure ===\ntwo tiers");
        let prompts = mock.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("backend/app.py"));
        assert!(prompts[0].contains("frontend/src/App.js"));

        let seen = sink.joined();
        assert!(seen.starts_with("Starting project structure analysis"));
        assert!(seen.ends_with("two tiers"));
    }

    #[tokio::test]
    async fn test_core_selects_important_files_and_truncates() {
        let long_body = "a".repeat(1000);
        let temp = workspace(&[
            ("backend/main.py", long_body.as_str()),
            ("backend/utils.py", "def helper(): pass"),
            ("frontend/package.json", "{\"name\": \"ui\"}"),
        ]);
        let mock = MockBackend::new().add_stream(MockStream::tokens(&["core"]));

        let outcome = analyzer(&mock, temp.path())
            .analyze(AnalysisFocus::Core, None)
            .await;

        assert_eq!(outcome.step_labels(), vec!["Core"]);
        let prompt = &mock.prompts()[0];
        assert!(prompt.contains("=== backend/main.py ==="));
        assert!(prompt.contains("=== frontend/package.json ==="));
        assert!(!prompt.contains("utils.py"));
        assert!(prompt.contains(&format!("{}...", "a".repeat(300))));
        assert!(!prompt.contains(&"a".repeat(301)));
    }

    #[tokio::test]
    async fn test_core_without_important_files() {
        let temp = workspace(&[("lib/helpers.py", "x")]);
        let mock = MockBackend::new();

        let outcome = analyzer(&mock, temp.path())
            .analyze(AnalysisFocus::Core, None)
            .await;

        assert_eq!(outcome.render(), NO_CORE_FILES_FOUND);
        assert!(mock.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_full_pipeline_order_and_summary_chain() {
        let temp = workspace(&[
            ("backend/app.py", "from fastapi import FastAPI"),
            ("frontend/src/App.js", "export default App"),
            ("requirements.txt", "fastapi==0.110"),
        ]);
        let mock = MockBackend::new()
            .add_stream(MockStream::tokens(&["structure"]))
            .add_stream(MockStream::tokens(&["backend"]))
            .add_stream(MockStream::tokens(&["frontend"]))
            .add_stream(MockStream::tokens(&["deps"]))
            .add_stream(MockStream::tokens(&["summary"]));

        let outcome = analyzer(&mock, temp.path())
            .analyze_project_structure(None)
            .await;

        assert!(outcome.is_success());
        assert_eq!(
            outcome.step_labels(),
            vec![
                "File Structure",
                "Backend Architecture",
                "Frontend Architecture",
                "Dependencies",
                "Summary"
            ]
        );

        let prompts = mock.prompts();
        assert!(prompts[0].contains("backend/\n"));
        assert!(prompts[3].contains("fastapi==0.110"));
        assert!(prompts[3].contains(&format!("Node dependencies:\n{}", MANIFEST_NOT_FOUND)));
        assert!(prompts[4].contains("File Structure:\nstructure"));
        assert!(prompts[4].contains("Dependencies:\ndeps"));

        let rendered = outcome.render();
        assert!(rendered.starts_with("=== File Structure ===\nstructure\n\n=== Backend Architecture ==="));
        assert!(rendered.ends_with("=== Summary ===\nsummary"));
    }

    #[tokio::test]
    async fn test_full_pipeline_skips_missing_backend() {
        let temp = workspace(&[("frontend/src/index.js", "render()")]);
        let mock = MockBackend::new();

        let outcome = analyzer(&mock, temp.path())
            .analyze_project_structure(None)
            .await;

        assert_eq!(
            outcome.step_labels(),
            vec!["File Structure", "Frontend Architecture", "Dependencies", "Summary"]
        );
        assert_eq!(outcome.stats.skipped_steps, vec!["Backend Architecture".to_string()]);
        assert_eq!(mock.prompts().len(), 4);
    }

    #[tokio::test]
    async fn test_backend_failure_halts_and_names_step() {
        let temp = workspace(&[("backend/app.py", "x")]);
        let mock = MockBackend::new()
            .add_stream(MockStream::tokens(&["structure"]))
            .add_stream(MockStream::unreachable("connection refused"));
        let sink = CollectingSink::new();

        let outcome = analyzer(&mock, temp.path())
            .analyze_project_structure(Some(&sink))
            .await;

        assert!(!outcome.is_success());
        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.label, "Backend Architecture");
        assert!(failure.cause.contains("connection refused"));

        // Nothing after the failing step ran
        assert_eq!(mock.prompts().len(), 2);
        assert_eq!(outcome.step_labels(), vec!["File Structure"]);

        let rendered = outcome.render();
        assert!(rendered.contains("Analysis failed at step 'Backend Architecture'"));
        assert!(sink.joined().contains("connection refused"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = workspace(&[("main.py", "print()"), ("app.py", "run()")]);
        let locked = temp.path().join("main.py");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_to_string(&locked).is_ok() {
            // Running as root; permissions are not enforced
            return;
        }

        let mock = MockBackend::new();
        let outcome = analyzer(&mock, temp.path())
            .analyze(AnalysisFocus::Core, None)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stats.read_failures, 1);
        assert!(mock.prompts()[0].contains("=== app.py ==="));
    }
}
