use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;
use log::{ info, warn };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt file IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Prompt JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Tag selecting which instructional preamble frames a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    General,
    Code,
    Summarize,
    Review,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::General,
        TaskType::Code,
        TaskType::Summarize,
        TaskType::Review,
    ];

    /// Unrecognised tags fall back to `General`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "code" => TaskType::Code,
            "summarize" => TaskType::Summarize,
            "review" => TaskType::Review,
            _ => TaskType::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::General => "general",
            TaskType::Code => "code",
            TaskType::Summarize => "summarize",
            TaskType::Review => "review",
        }
    }

    fn default_preamble(&self) -> &'static str {
        match self {
            TaskType::General =>
                "You are Claudie, a smart AI assistant that helps with various tasks. You are knowledgeable, helpful, and provide clear explanations.",
            TaskType::Code =>
                "You are Claudie, a coding assistant specialized in programming. Help with code generation, debugging, optimization, and code review. Always provide clean, well-commented code with explanations.",
            TaskType::Summarize =>
                "You are Claudie, an expert at summarizing content. Provide clear, concise summaries that capture the key points and important details.",
            TaskType::Review =>
                "You are Claudie, a code review specialist. Analyze code for bugs, performance issues, best practices, and suggest improvements. Provide constructive feedback.",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Debug, Default)]
struct PromptFile {
    #[serde(default)]
    system_prompts: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    system_prompts: HashMap<TaskType, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let system_prompts = TaskType::ALL
            .iter()
            .map(|task| (*task, task.default_preamble().to_string()))
            .collect();
        Self { system_prompts }
    }
}

impl PromptConfig {
    pub fn system_prompt(&self, task_type: TaskType) -> &str {
        self.system_prompts
            .get(&task_type)
            .map(|s| s.as_str())
            .unwrap_or_else(|| task_type.default_preamble())
    }

    pub fn system_prompt_for_tag(&self, tag: &str) -> &str {
        self.system_prompt(TaskType::from_tag(tag))
    }
}

fn merge_overrides(file: PromptFile) -> PromptConfig {
    let mut config = PromptConfig::default();
    for (tag, text) in file.system_prompts {
        let task = TaskType::from_tag(&tag);
        if task.as_str() != tag.trim().to_lowercase() {
            warn!("Ignoring system prompt for unknown task type '{}'", tag);
            continue;
        }
        config.system_prompts.insert(task, text);
    }
    config
}

/// Loads `{"system_prompts": {"code": "..."}}`, layering entries over the built-in preambles.
pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path)?;
    let file: PromptFile = serde_json::from_str(&file_content)?;
    info!("Loaded {} system prompt override(s) from '{}'", file.system_prompts.len(), path);
    Ok(Arc::new(merge_overrides(file)))
}
