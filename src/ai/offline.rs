use async_trait::async_trait;

use super::{
    AiGenerationRequest, AiTask, GeneratedAsset, GeneratedAssetType, GenerationOutput,
    GenerationProvider, ProviderError, SceneEntity, SceneSpec,
};

/// Network-free provider. Produces deterministic placeholder output derived
/// from the request so jobs complete without model access.
pub struct OfflineProvider;

fn slug(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(4)
        .map(|w| w.to_lowercase())
        .collect();
    if words.is_empty() {
        "asset".to_string()
    } else {
        words.join("_")
    }
}

#[async_trait]
impl GenerationProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn generate(&self, request: &AiGenerationRequest) -> Result<GenerationOutput, ProviderError> {
        let prompt = request.prompt.trim();
        let name = slug(prompt);

        let output = match request.task {
            AiTask::Codegen => {
                let path = match request.engine {
                    crate::ai::Engine::Unity => format!("Assets/Scripts/Generated/{}.cs", name),
                    crate::ai::Engine::Bevy => format!("scripts/generated/{}.rhai", name),
                };
                GenerationOutput {
                    explanation: Some(format!(
                        "Offline mode: created a stub for \"{}\". Configure an AI provider for real output.",
                        prompt
                    )),
                    diff: Some(format!(
                        "--- /dev/null\n+++ b/{path}\n@@ -0,0 +1 @@\n+// Stub generated offline for: {prompt}\n"
                    )),
                    ..Default::default()
                }
            }
            AiTask::Artgen => GenerationOutput {
                explanation: Some(format!("Offline mode: placeholder texture for \"{}\".", prompt)),
                assets: Some(vec![GeneratedAsset {
                    name: name.clone(),
                    url: format!("offline://assets/{}.png", name),
                    asset_type: GeneratedAssetType::Texture,
                }]),
                ..Default::default()
            },
            AiTask::Worldgen => GenerationOutput {
                explanation: Some(format!("Offline mode: minimal scene for \"{}\".", prompt)),
                scene_spec: Some(SceneSpec {
                    entities: vec![
                        SceneEntity {
                            name: "Ground".into(),
                            prefab: "plane".into(),
                            position: Some([0.0, 0.0, 0.0]),
                            rotation: None,
                            scale: Some([10.0, 1.0, 10.0]),
                            components: None,
                        },
                        SceneEntity {
                            name: "Sun".into(),
                            prefab: "directional_light".into(),
                            position: Some([0.0, 10.0, 0.0]),
                            rotation: Some([0.0, 0.0, 0.0, 1.0]),
                            scale: None,
                            components: None,
                        },
                    ],
                }),
                ..Default::default()
            },
        };
        Ok(output)
    }

    async fn suggest_fix(
        &self,
        _request: Option<&AiGenerationRequest>,
        logs: &str,
    ) -> Result<String, ProviderError> {
        let first_error = logs
            .lines()
            .find(|line| line.to_lowercase().contains("error"))
            .map(str::trim);

        Ok(match first_error {
            Some(line) => format!(
                "Offline mode cannot analyse logs. Start with the first error: {}",
                line
            ),
            None => "Offline mode cannot analyse logs. No error lines were found.".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiModel, Engine, GenerationOptions, Language};

    fn request(task: AiTask) -> AiGenerationRequest {
        AiGenerationRequest {
            project_id: "p".into(),
            task,
            engine: Engine::Bevy,
            language: Language::Rhai,
            prompt: "Spawn enemy waves!".into(),
            model: AiModel::Gpt4,
            context_files: vec![],
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_each_task_fills_its_field() {
        let codegen = OfflineProvider.generate(&request(AiTask::Codegen)).await.unwrap();
        assert!(codegen.diff.unwrap().contains("scripts/generated/spawn_enemy_waves.rhai"));

        let artgen = OfflineProvider.generate(&request(AiTask::Artgen)).await.unwrap();
        assert_eq!(artgen.assets.unwrap().len(), 1);

        let worldgen = OfflineProvider.generate(&request(AiTask::Worldgen)).await.unwrap();
        assert_eq!(worldgen.scene_spec.unwrap().entities.len(), 2);
    }

    #[tokio::test]
    async fn test_fix_points_at_first_error() {
        let fix = OfflineProvider
            .suggest_fix(None, "compiling\nerror: missing semicolon\nerror: second")
            .await
            .unwrap();
        assert!(fix.ends_with("error: missing semicolon"));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Make a red, shiny car now please"), "make_a_red_shiny");
        assert_eq!(slug("!!!"), "asset");
    }
}
