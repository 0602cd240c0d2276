use serde::{Deserialize, Serialize};

/// Fixed instruction prepended to an agent's history when its system prompt is enabled.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"MANDATORY JSON FORMAT:
Reply ONLY with a single valid JSON object. Do not add any text before or after it.

Every message in the conversation starts with its id, for example "[id:223] hello".

RULES FOR answer_id:
- When you reply to one specific message, use its numeric id WITHOUT quotes (for example 223, 45, 1).
- When your message is a general comment that does not reply to anyone, use null (without quotes).
- answer_id must NEVER be a word, an empty string, or a number in quotes such as "223" or "-1".

CORRECT EXAMPLES:

Replying to message 223:
{
  "answer_id": 223,
  "content": "Sure, which one?"
}

General comment:
{
  "answer_id": null,
  "content": "I can take care of that"
}

INCORRECT EXAMPLES, NEVER DO THIS:
{ "answer_id": "help", "content": "..." }
{ "answer_id": "223", "content": "..." }
{ "answer_id": "-1", "content": "..." }

REMEMBER: answer_id is a bare number (223) or null. If you are unsure which message you are answering, use null."#;

/// Wire dialect spoken by the completion endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEndpoint {
    /// `POST {base_url}/api/chat` with a list of role-tagged messages.
    #[default]
    Chat,
    /// `POST {base_url}/api/generate` with a single flattened prompt.
    Generate,
}

/// Connection settings for an agent's language-model backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub endpoint: CompletionEndpoint,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            temperature: 0.7,
            endpoint: CompletionEndpoint::Chat,
        }
    }
}

/// One AI participant. The list of these is handed to the dispatcher at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// User id of the agent's account; messages it sends carry this sender id.
    pub user_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Prepend a system instruction and tag history turns by role.
    #[serde(default = "default_true")]
    pub system_prompt_enabled: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Worker count; falls back to `dispatch.default_workers`.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Job queue capacity; falls back to `dispatch.default_queue_capacity`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

const fn default_true() -> bool {
    true
}

impl AgentConfig {
    /// Build a config with defaults for everything but the agent's user id.
    #[must_use]
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            name: None,
            completion: CompletionConfig::default(),
            system_prompt_enabled: true,
            system_prompt: None,
            workers: None,
            queue_capacity: None,
        }
    }

    /// Display label used in logs and metric labels.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("agent-{}", self.user_id))
    }

    /// The instruction to prepend, or `None` when the system prompt is disabled.
    #[must_use]
    pub fn effective_system_prompt(&self) -> Option<&str> {
        if !self.system_prompt_enabled {
            return None;
        }
        Some(
            self.system_prompt
                .as_deref()
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or(DEFAULT_SYSTEM_PROMPT),
        )
    }

    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        let label = self.label();
        if self.user_id <= 0 {
            errors.push(format!("agent {label}: user_id must be positive"));
        }
        if self.completion.base_url.trim().is_empty() {
            errors.push(format!("agent {label}: completion.base_url is required"));
        }
        if self.completion.model.trim().is_empty() {
            errors.push(format!("agent {label}: completion.model is required"));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            errors.push(format!(
                "agent {label}: completion.temperature must be between 0.0 and 2.0"
            ));
        }
        if self.workers == Some(0) {
            errors.push(format!("agent {label}: workers must be greater than 0"));
        }
        if self.queue_capacity == Some(0) {
            errors.push(format!(
                "agent {label}: queue_capacity must be greater than 0"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_falls_back_to_default() {
        let agent = AgentConfig::new(7);
        assert_eq!(agent.effective_system_prompt(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    #[test]
    fn blank_override_uses_default_prompt() {
        let mut agent = AgentConfig::new(7);
        agent.system_prompt = Some("   ".into());
        assert_eq!(agent.effective_system_prompt(), Some(DEFAULT_SYSTEM_PROMPT));

        agent.system_prompt = Some("be brief".into());
        assert_eq!(agent.effective_system_prompt(), Some("be brief"));
    }

    #[test]
    fn disabled_prompt_yields_none() {
        let mut agent = AgentConfig::new(7);
        agent.system_prompt = Some("ignored".into());
        agent.system_prompt_enabled = false;
        assert_eq!(agent.effective_system_prompt(), None);
    }

    #[test]
    fn label_prefers_name() {
        let mut agent = AgentConfig::new(3);
        assert_eq!(agent.label(), "agent-3");
        agent.name = Some("helper".into());
        assert_eq!(agent.label(), "helper");
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut agent = AgentConfig::new(0);
        agent.completion.model.clear();
        agent.completion.temperature = 3.0;
        agent.workers = Some(0);

        let mut errors = Vec::new();
        agent.validate(&mut errors);
        assert_eq!(errors.len(), 4, "{errors:?}");
    }

    #[test]
    fn deserializes_with_defaults() {
        let agent: AgentConfig = serde_json::from_str(r#"{ "user_id": 12 }"#).unwrap();
        assert!(agent.system_prompt_enabled);
        assert_eq!(agent.completion, CompletionConfig::default());
        assert_eq!(agent.workers, None);
    }
}
