//! Service configuration.
//!
//! Defaults mirror a typical single-host deployment: a local model server on
//! `localhost:11434` and a hosted chat-completions endpoint selected by env.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, ChatResult};

/// Local (streaming) backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalBackendConfig {
    pub base_url: String,
    pub model: String,
    /// Connect timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:14b".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Remote (blocking) backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteBackendConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Total attempts for transient (5xx/429/network) failures
    pub max_attempts: u32,
    /// Request timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            max_attempts: 1,
            timeout_secs: 120,
        }
    }
}

/// Workspace scan filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Entries whose name starts with this marker are skipped
    pub hidden_marker: char,
    /// Directory names never descended into
    pub excluded_dirs: Vec<String>,
    /// File name suffixes worth recording
    pub allowed_suffixes: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            hidden_marker: '.',
            excluded_dirs: ["node_modules", "__pycache__", "venv", "target", "dist", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_suffixes: [
                ".py",
                ".js",
                ".jsx",
                ".ts",
                ".tsx",
                ".json",
                "requirements.txt",
                "package.json",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ScanConfig {
    pub fn hidden_marker(mut self, marker: char) -> Self {
        self.hidden_marker = marker;
        self
    }

    pub fn exclude_dir(mut self, name: impl Into<String>) -> Self {
        self.excluded_dirs.push(name.into());
        self
    }

    pub fn allow_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.allowed_suffixes.push(suffix.into());
        self
    }

    pub fn allowed_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.allowed_suffixes = suffixes;
        self
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        name.starts_with(self.hidden_marker)
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }

    pub fn is_allowed_file(&self, name: &str) -> bool {
        self.allowed_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

/// A manifest the dependency step reads if present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSpec {
    /// Label used in the prompt ("Python", "Node")
    pub label: String,
    /// Path relative to the workspace root
    pub path: String,
}

/// Project analysis tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Lower-cased base-name fragments that mark a file as important
    pub important_patterns: Vec<String>,
    /// Prefix length of each important file embedded in the core prompt
    pub core_excerpt_chars: usize,
    /// Prefix length of each source file embedded in backend/frontend prompts
    pub source_excerpt_chars: usize,
    /// Files embedded per backend/frontend step
    pub max_files_per_area: usize,
    pub backend_dir: String,
    pub backend_suffixes: Vec<String>,
    pub frontend_dir: String,
    pub frontend_suffixes: Vec<String>,
    pub manifests: Vec<ManifestSpec>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            important_patterns: strings(&[
                "main",
                "app",
                "index",
                "requirements.txt",
                "package.json",
                "config",
                "settings",
            ]),
            core_excerpt_chars: 300,
            source_excerpt_chars: 4000,
            max_files_per_area: 2,
            backend_dir: "backend/".to_string(),
            backend_suffixes: strings(&[".py", ".txt"]),
            frontend_dir: "frontend/src/".to_string(),
            frontend_suffixes: strings(&[".js", ".jsx", ".ts", ".tsx"]),
            manifests: vec![
                ManifestSpec {
                    label: "Python".to_string(),
                    path: "requirements.txt".to_string(),
                },
                ManifestSpec {
                    label: "Node".to_string(),
                    path: "frontend/package.json".to_string(),
                },
            ],
        }
    }
}

/// Keyword tables driving request classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub analysis_keywords: Vec<String>,
    pub core_keywords: Vec<String>,
    pub remote_keywords: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            analysis_keywords: strings(&[
                "analyze project",
                "analyse project",
                "project structure",
                "code structure",
                "architecture",
                "分析项目",
                "项目结构",
                "代码结构",
                "项目架构",
            ]),
            core_keywords: strings(&["file", "core", "文件"]),
            remote_keywords: strings(&[
                "generate",
                "create",
                "debug",
                "fix",
                "solve error",
                "implement",
                "write code",
                "bug",
            ]),
        }
    }
}

/// Top-level configuration for a chat service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub local: LocalBackendConfig,
    pub remote: RemoteBackendConfig,
    pub workspace_root: PathBuf,
    pub scan: ScanConfig,
    pub analysis: AnalysisConfig,
    pub routing: RoutingConfig,
    /// Instruction prepended to every flattened local prompt
    pub local_preamble: Option<String>,
    /// Capacity of a persistent connection's outbound frame queue
    pub sink_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            local: LocalBackendConfig::default(),
            remote: RemoteBackendConfig::default(),
            workspace_root: PathBuf::from("workspace"),
            scan: ScanConfig::default(),
            analysis: AnalysisConfig::default(),
            routing: RoutingConfig::default(),
            local_preamble: None,
            sink_buffer: 256,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a JSON settings file, then apply environment overrides.
    ///
    /// A missing file is not an error; the defaults are used instead.
    pub fn from_settings(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&content).map_err(|e| {
                ChatError::Config(format!("invalid settings file {}: {}", path.display(), e))
            })?
        } else {
            debug!("Settings file {} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn local_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.local_preamble = Some(preamble.into());
        self
    }

    fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(url) = var("OLLAMA_URL") {
            self.local.base_url = url;
        }
        if let Some(model) = var("LOCAL_MODEL") {
            self.local.model = model;
        }
        if let Some(url) = var("REMOTE_API_URL") {
            self.remote.base_url = url;
        }
        if let Some(key) = var("REMOTE_API_KEY").or_else(|| var("CLAUDE_API_KEY")) {
            self.remote.api_key = Some(key);
        }
        if let Some(model) = var("REMOTE_MODEL") {
            self.remote.model = model;
        }
        if let Some(root) = var("RELAY_WORKSPACE") {
            self.workspace_root = PathBuf::from(root);
        }
    }
}
