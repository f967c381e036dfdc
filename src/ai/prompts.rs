//! Prompt templates for each generation task.

use serde::Serialize;

use super::{AiGenerationRequest, AiTask, ArtStyle, AssetQuality};

/// Longest context snippet forwarded to the model, in characters
const MAX_SNIPPET_CHARS: usize = 4000;
/// Build logs beyond this are cut from the front; the tail holds the errors
const MAX_LOG_CHARS: usize = 12_000;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

fn system_prompt(request: &AiGenerationRequest) -> String {
    let engine = request.engine.display_name();
    let language = request.language.display_name();

    match request.task {
        AiTask::Codegen => format!(
            "You are a senior {engine} gameplay programmer writing {language}.\n\
             Follow the conventions of the existing code you are shown.\n\
             Respond with a JSON object: {{\"explanation\": string, \"diff\": string}} where \
             \"diff\" is a unified diff against the project files."
        ),
        AiTask::Artgen => {
            let style = match request.options.style {
                Some(ArtStyle::Realistic) => "realistic",
                Some(ArtStyle::Stylized) | None => "stylized",
            };
            let resolution = match request.options.asset_quality {
                Some(AssetQuality::Low) => "512x512",
                Some(AssetQuality::High) => "2048x2048",
                Some(AssetQuality::Medium) | None => "1024x1024",
            };
            format!(
                "You plan game-ready art assets for a {engine} project.\n\
                 Style: {style}. Target resolution: {resolution}.\n\
                 Keep a consistent art style and clear focal points.\n\
                 Respond with a JSON object: {{\"explanation\": string, \"assets\": \
                 [{{\"name\": string, \"url\": string, \"type\": \"texture\"|\"3dmodel\"|\"animation\"|\"audio\"}}]}}."
            )
        }
        AiTask::Worldgen => format!(
            "You lay out game scenes for a {engine} project.\n\
             Respond with a JSON object: {{\"explanation\": string, \"sceneSpec\": {{\"entities\": \
             [{{\"name\": string, \"prefab\": string, \"position\": [x,y,z], \"rotation\": [x,y,z,w], \
             \"scale\": [x,y,z], \"components\": object}}]}}}}. Positions are in meters, Y up."
        ),
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn user_prompt(request: &AiGenerationRequest) -> String {
    let mut prompt = String::new();

    if !request.context_files.is_empty() {
        prompt.push_str("Relevant project files:\n\n");
        for file in &request.context_files {
            prompt.push_str(&format!(
                "--- {} ---\n```{}\n{}\n```\n\n",
                file.path,
                request.language.fence(),
                truncate_chars(&file.snippet, MAX_SNIPPET_CHARS)
            ));
        }
    }

    prompt.push_str("Request:\n");
    prompt.push_str(request.prompt.trim());
    prompt
}

pub fn generation_messages(request: &AiGenerationRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(request)),
        ChatMessage::user(user_prompt(request)),
    ]
}

pub fn debug_messages(request: Option<&AiGenerationRequest>, logs: &str) -> Vec<ChatMessage> {
    let context = match request {
        Some(r) => format!(
            "The failing code was generated for a {} project in {} from this request:\n{}\n\n",
            r.engine.display_name(),
            r.language.display_name(),
            r.prompt.trim()
        ),
        None => String::new(),
    };

    vec![
        ChatMessage::system(
            "You diagnose game build and runtime failures. Explain the root cause in one or two \
             sentences, then give the corrected code or a unified diff.",
        ),
        ChatMessage::user(format!(
            "{}Logs:\n```\n{}\n```",
            context,
            tail_chars(logs, MAX_LOG_CHARS)
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiModel, ContextFile, Engine, GenerationOptions, Language};

    fn request(task: AiTask) -> AiGenerationRequest {
        AiGenerationRequest {
            project_id: "p".into(),
            task,
            engine: Engine::Unity,
            language: Language::Csharp,
            prompt: "  Add a double jump  ".into(),
            model: AiModel::Gpt4,
            context_files: vec![ContextFile {
                path: "Assets/Player.cs".into(),
                snippet: "class Player {}".into(),
            }],
            options: GenerationOptions::default(),
        }
    }

    #[test]
    fn test_codegen_messages_include_context() {
        let messages = generation_messages(&request(AiTask::Codegen));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("Unity"));
        assert!(messages[0].content.contains("C#"));
        assert!(messages[1].content.contains("--- Assets/Player.cs ---"));
        assert!(messages[1].content.contains("```csharp"));
        assert!(messages[1].content.ends_with("Add a double jump"));
    }

    #[test]
    fn test_artgen_uses_options() {
        let mut req = request(AiTask::Artgen);
        req.options.style = Some(ArtStyle::Realistic);
        req.options.asset_quality = Some(AssetQuality::High);
        let system = &generation_messages(&req)[0].content;
        assert!(system.contains("realistic"));
        assert!(system.contains("2048x2048"));
    }

    #[test]
    fn test_debug_keeps_log_tail() {
        let logs = format!("{}error: last line", "x".repeat(MAX_LOG_CHARS * 2));
        let messages = debug_messages(None, &logs);
        assert!(messages[1].content.contains("error: last line"));
        assert!(messages[1].content.len() < MAX_LOG_CHARS + 100);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(tail_chars("héllo", 3), "llo");
        assert_eq!(tail_chars("hi", 5), "hi");
    }
}
