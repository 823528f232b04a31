// src/indexer/agent_type.rs
// Agent-type discovery: first-match-wins regex rules over a session file's
// path. Hot-swappable so tests can point the indexer at a temp directory
// without touching the well-known on-disk defaults.

use regex::Regex;
use std::path::Path;

fn default_rules() -> Vec<(String, String)> {
    vec![
        (r"\.claude[/\\]projects[/\\]".to_string(), "claude-code".to_string()),
        (r"\.codex[/\\]sessions[/\\]".to_string(), "codex".to_string()),
        (r"\.cursor[/\\]chats?[/\\]".to_string(), "cursor".to_string()),
        (r"\.aider[/\\]".to_string(), "aider".to_string()),
    ]
}

pub struct AgentTypeRules {
    compiled: Vec<(Regex, String)>,
}

impl Default for AgentTypeRules {
    fn default() -> Self {
        let mut rules = Self { compiled: Vec::new() };
        rules.reset_patterns();
        rules
    }
}

impl AgentTypeRules {
    /// Replace the rule set. Invalid patterns are skipped with a warning
    /// rather than failing the whole load.
    pub fn load_patterns(&mut self, rules: Vec<(String, String)>) {
        self.compiled = rules
            .into_iter()
            .filter_map(|(pattern, agent_type)| match Regex::new(&pattern) {
                Ok(re) => Some((re, agent_type)),
                Err(e) => {
                    tracing::warn!("skipping invalid agent-type pattern {pattern:?}: {e}");
                    None
                }
            })
            .collect();
    }

    pub fn reset_patterns(&mut self) {
        self.load_patterns(default_rules());
    }

    /// First matching rule wins; `None` if nothing matches.
    pub fn detect(&self, path: &Path) -> Option<String> {
        let path_str = path.to_string_lossy();
        self.compiled.iter().find(|(re, _)| re.is_match(&path_str)).map(|(_, agent_type)| agent_type.clone())
    }
}
