//! Request classification.
//!
//! Routing is a small ordered rule table evaluated against the lower-cased
//! message. The first rule with a matching keyword wins; nothing matching
//! falls through to the local backend.

use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::types::Backend;

/// What a project analysis request should concentrate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisFocus {
    /// File tree overview only
    Structure,
    /// Contents of the important files
    Core,
}

impl AnalysisFocus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Structure => "Structure",
            Self::Core => "Core",
        }
    }
}

/// Outcome of classifying one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    ProjectAnalysis { focus: AnalysisFocus },
    RemoteBackend,
    LocalBackend,
}

impl Disposition {
    /// Backend label reported to the caller for this disposition.
    pub fn backend(&self) -> Backend {
        match self {
            Self::RemoteBackend => Backend::Remote,
            Self::ProjectAnalysis { .. } | Self::LocalBackend => Backend::Local,
        }
    }
}

/// Target of a routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    /// Project analysis; `core` if any of `core_keywords` also matches
    ProjectAnalysis { core_keywords: Vec<String> },
    Remote,
}

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: &'static str,
    pub keywords: Vec<String>,
    pub target: RuleTarget,
}

impl RoutingRule {
    fn matches(&self, lower: &str) -> bool {
        contains_any(lower, &self.keywords)
    }

    fn disposition(&self, lower: &str) -> Disposition {
        match &self.target {
            RuleTarget::ProjectAnalysis { core_keywords } => {
                let focus = if contains_any(lower, core_keywords) {
                    AnalysisFocus::Core
                } else {
                    AnalysisFocus::Structure
                };
                Disposition::ProjectAnalysis { focus }
            }
            RuleTarget::Remote => Disposition::RemoteBackend,
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|k| !k.is_empty() && haystack.contains(k.as_str()))
}

fn lowered(keywords: &[String]) -> Vec<String> {
    keywords.iter().map(|k| k.to_lowercase()).collect()
}

/// Pure, total classifier over an ordered rule table.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RoutingRule>,
}

impl Router {
    /// Build the standard two-rule table (analysis before remote).
    pub fn new(config: &RoutingConfig) -> Self {
        Self::with_rules(vec![
            RoutingRule {
                name: "project-analysis",
                keywords: lowered(&config.analysis_keywords),
                target: RuleTarget::ProjectAnalysis {
                    core_keywords: lowered(&config.core_keywords),
                },
            },
            RoutingRule {
                name: "remote-codegen",
                keywords: lowered(&config.remote_keywords),
                target: RuleTarget::Remote,
            },
        ])
    }

    /// Build a router from an explicit rule table. Earlier rules take precedence.
    pub fn with_rules(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Classify the latest user message.
    pub fn classify(&self, message: &str) -> Disposition {
        let lower = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lower))
            .map(|rule| rule.disposition(&lower))
            .unwrap_or(Disposition::LocalBackend)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(&RoutingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_focus() {
        let router = Router::default();
        assert_eq!(
            router.classify("analyze project"),
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Structure
            }
        );
        assert_eq!(
            router.classify("analyze project files"),
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Core
            }
        );
        assert_eq!(
            router.classify("分析项目文件"),
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Core
            }
        );
    }

    #[test]
    fn test_remote_and_local() {
        let router = Router::default();
        assert_eq!(router.classify("please debug this"), Disposition::RemoteBackend);
        assert_eq!(router.classify("hello"), Disposition::LocalBackend);
        assert_eq!(router.classify(""), Disposition::LocalBackend);
    }

    #[test]
    fn test_case_insensitive() {
        let router = Router::default();
        assert_eq!(router.classify("Please FIX the crash"), Disposition::RemoteBackend);
        assert_eq!(
            router.classify("Show me the ARCHITECTURE"),
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Structure
            }
        );
    }

    #[test]
    fn test_analysis_takes_precedence_over_remote() {
        let router = Router::default();
        // "create" is a remote keyword but the analysis rule comes first
        assert_eq!(
            router.classify("analyze project structure and create a plan"),
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Structure
            }
        );
    }

    #[test]
    fn test_deterministic() {
        let router = Router::default();
        for input in ["hello", "debug", "code structure of core", "", "ARCHITECTURE file"] {
            assert_eq!(router.classify(input), router.classify(input));
            assert_eq!(router.classify(input), router.classify(&input.to_lowercase()));
        }
    }

    #[test]
    fn test_custom_rules() {
        let router = Router::with_rules(vec![RoutingRule {
            name: "hosted",
            keywords: vec!["refactor".to_string()],
            target: RuleTarget::Remote,
        }]);
        assert_eq!(router.classify("refactor this"), Disposition::RemoteBackend);
        assert_eq!(router.classify("analyze project"), Disposition::LocalBackend);
        assert_eq!(router.rules().len(), 1);
    }

    #[test]
    fn test_disposition_backend_label() {
        assert_eq!(Disposition::RemoteBackend.backend(), Backend::Remote);
        assert_eq!(Disposition::LocalBackend.backend(), Backend::Local);
        assert_eq!(
            Disposition::ProjectAnalysis {
                focus: AnalysisFocus::Core
            }
            .backend(),
            Backend::Local
        );
    }
}
