//! AI generation: request types, the provider seam and output parsing.

mod offline;
mod openai;
pub mod prompts;

pub use offline::OfflineProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AiConfig, AiProviderKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiTask {
    Codegen,
    Artgen,
    Worldgen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Unity,
    Bevy,
}

impl Engine {
    pub fn display_name(&self) -> &'static str {
        match self {
            Engine::Unity => "Unity",
            Engine::Bevy => "Bevy",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Csharp,
    Cpp,
    Rhai,
}

impl Language {
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Csharp => "C#",
            Language::Cpp => "C++",
            Language::Rhai => "Rhai",
        }
    }

    pub fn fence(&self) -> &'static str {
        match self {
            Language::Csharp => "csharp",
            Language::Cpp => "cpp",
            Language::Rhai => "rhai",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AiModel {
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "claude-3")]
    Claude3,
    #[serde(rename = "starcoder")]
    Starcoder,
}

impl AiModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiModel::Gpt4 => "gpt-4",
            AiModel::Claude3 => "claude-3",
            AiModel::Starcoder => "starcoder",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetQuality {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtStyle {
    Realistic,
    Stylized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub path: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_quality: Option<AssetQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<ArtStyle>,
}

/// Body of `POST /ai/generate`, also stored as the job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiGenerationRequest {
    pub project_id: String,
    pub task: AiTask,
    pub engine: Engine,
    pub language: Language,
    pub prompt: String,
    pub model: AiModel,
    #[serde(default)]
    pub context_files: Vec<ContextFile>,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeneratedAssetType {
    #[serde(rename = "texture")]
    Texture,
    #[serde(rename = "3dmodel")]
    Model3d,
    #[serde(rename = "animation")]
    Animation,
    #[serde(rename = "audio")]
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedAsset {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub asset_type: GeneratedAssetType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneEntity {
    pub name: String,
    pub prefab: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SceneSpec {
    pub entities: Vec<SceneEntity>,
}

/// Result of a generation job, merged into the job status response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<GeneratedAsset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_spec: Option<SceneSpec>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("AI provider is not configured")]
    NotConfigured,
    #[error("request to AI provider failed: {0}")]
    Request(String),
    #[error("AI provider rate limit exceeded")]
    RateLimited,
    #[error("AI provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid AI provider response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &AiGenerationRequest) -> Result<GenerationOutput, ProviderError>;

    /// Propose a fix for failing output. `request` is the generation that
    /// produced the code, when known.
    async fn suggest_fix(
        &self,
        request: Option<&AiGenerationRequest>,
        logs: &str,
    ) -> Result<String, ProviderError>;
}

/// Pick the provider for this process. Without an API key the offline
/// provider is used so the rest of the pipeline stays functional.
pub fn build_provider(config: &AiConfig) -> Arc<dyn GenerationProvider> {
    match (&config.provider, &config.api_key) {
        (AiProviderKind::OpenAi, Some(key)) if !key.is_empty() => {
            match OpenAiProvider::new(config.clone()) {
                Ok(provider) => {
                    tracing::info!(
                        "Using OpenAI-compatible provider at {} (model {}, fallback {})",
                        config.base_url,
                        config.primary_model,
                        config.fallback_model
                    );
                    return Arc::new(provider);
                }
                Err(e) => tracing::warn!("Failed to build AI client: {}", e),
            }
        }
        (AiProviderKind::OpenAi, _) => {
            tracing::warn!("No AI API key configured; using offline generation");
        }
        (AiProviderKind::Offline, _) => {
            tracing::info!("Using offline generation provider");
        }
    }
    Arc::new(OfflineProvider)
}

/// Find a JSON object in model output: fenced ```json block, any fenced block,
/// then the first balanced `{...}`.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            if let Ok(json) = serde_json::from_str(text[start..start + end].trim()) {
                return Some(json);
            }
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        let start = text[start..]
            .find('\n')
            .map(|i| start + i + 1)
            .unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            if let Ok(json) = serde_json::from_str(text[start..start + end].trim()) {
                return Some(json);
            }
        }
    }

    if let Some(start) = text.find('{') {
        // Braces inside string literals do not count
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = start;
        for (i, c) in text[start..].char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end > start {
            if let Ok(json) = serde_json::from_str(&text[start..end]) {
                return Some(json);
            }
        }
    }

    None
}

/// Turn raw model text into the output shape expected for `task`.
pub fn parse_output(task: AiTask, text: &str) -> Result<GenerationOutput, ProviderError> {
    let json = extract_json(text);

    match task {
        AiTask::Codegen => match json {
            Some(value) => {
                let output: GenerationOutput = serde_json::from_value(value)
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                Ok(GenerationOutput {
                    assets: None,
                    scene_spec: None,
                    ..output
                })
            }
            // Plain prose is still a usable answer for code questions
            None => Ok(GenerationOutput {
                explanation: Some(text.trim().to_string()),
                ..Default::default()
            }),
        },
        AiTask::Artgen => {
            let value = json.ok_or_else(|| {
                ProviderError::InvalidResponse("expected a JSON object with assets".into())
            })?;
            let output: GenerationOutput = serde_json::from_value(value)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            Ok(GenerationOutput {
                assets: Some(output.assets.unwrap_or_default()),
                diff: None,
                scene_spec: None,
                ..output
            })
        }
        AiTask::Worldgen => {
            let value = json.ok_or_else(|| {
                ProviderError::InvalidResponse("expected a JSON object with sceneSpec".into())
            })?;
            let output: GenerationOutput = serde_json::from_value(value)
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            if output.scene_spec.is_none() {
                return Err(ProviderError::InvalidResponse("missing sceneSpec".into()));
            }
            Ok(GenerationOutput {
                assets: None,
                diff: None,
                ..output
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: AiGenerationRequest = serde_json::from_value(serde_json::json!({
            "projectId": "550e8400-e29b-41d4-a716-446655440000",
            "task": "worldgen",
            "engine": "bevy",
            "language": "rhai",
            "prompt": "A forest clearing",
            "model": "claude-3",
            "options": { "assetQuality": "high" }
        }))
        .unwrap();

        assert_eq!(request.task, AiTask::Worldgen);
        assert_eq!(request.model, AiModel::Claude3);
        assert!(request.context_files.is_empty());
        assert_eq!(request.options.asset_quality, Some(AssetQuality::High));
        assert_eq!(request.options.style, None);
    }

    #[test]
    fn test_unknown_model_rejected() {
        let result = serde_json::from_value::<AiGenerationRequest>(serde_json::json!({
            "projectId": "x", "task": "codegen", "engine": "unity", "language": "csharp",
            "prompt": "p", "model": "llama"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_json_variants() {
        assert!(extract_json(r#"{"explanation":"raw"}"#).is_some());
        assert!(extract_json("Sure!\n```json\n{\"diff\":\"+a\"}\n```\nDone").is_some());
        assert!(extract_json("```\n{\"diff\":\"+a\"}\n```").is_some());
        assert_eq!(
            extract_json("prefix {\"a\": {\"b\": 1}} suffix").unwrap()["a"]["b"],
            1
        );
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"Here you go: {"explanation":"close with }","diff":"+ if (grounded) { Jump(); }\n+ s = \"}\""} hope it helps"#;
        let json = extract_json(text).unwrap();
        assert_eq!(json["explanation"], "close with }");
        assert_eq!(json["diff"], "+ if (grounded) { Jump(); }\n+ s = \"}\"");
    }

    #[test]
    fn test_codegen_prose_becomes_explanation() {
        let output = parse_output(AiTask::Codegen, "Increase jumpForce to 12.").unwrap();
        assert_eq!(output.explanation.as_deref(), Some("Increase jumpForce to 12."));
        assert!(output.diff.is_none());
    }

    #[test]
    fn test_artgen_drops_unrelated_fields() {
        let output = parse_output(
            AiTask::Artgen,
            r#"{"explanation":"x","diff":"ignored","assets":[{"name":"rock","url":"gen://rock.png","type":"texture"}]}"#,
        )
        .unwrap();
        assert!(output.diff.is_none());
        assert_eq!(output.assets.unwrap()[0].asset_type, GeneratedAssetType::Texture);
    }

    #[test]
    fn test_worldgen_requires_scene() {
        assert!(parse_output(AiTask::Worldgen, r#"{"explanation":"x"}"#).is_err());
        assert!(parse_output(AiTask::Worldgen, "plain text").is_err());

        let output = parse_output(
            AiTask::Worldgen,
            r#"{"sceneSpec":{"entities":[{"name":"Tree","prefab":"tree_oak","position":[1,0,2]}]}}"#,
        )
        .unwrap();
        let scene = output.scene_spec.unwrap();
        assert_eq!(scene.entities[0].position, Some([1.0, 0.0, 2.0]));
    }

    #[test]
    fn test_offline_provider_without_key() {
        let provider = build_provider(&AiConfig::default());
        assert_eq!(provider.name(), "offline");
    }
}
