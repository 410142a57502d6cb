use std::path::PathBuf;

#[cfg(feature = "local")]
use llama_gguf::{ChatEngine, Engine, EngineConfig};
#[cfg(feature = "local")]
use tracing::info;

use crate::config::{Config, LlmConfig};
use crate::error::{GeneratorError, Result};
use crate::llm::message::{PromptMessage, Role};
use crate::llm::session::BackendReply;
use crate::llm::settings::RequiredSetting;
use crate::llm::{Backend, CapabilityMetadata, Invocation};
#[cfg(feature = "local")]
use crate::llm::hub;

pub const HUGGINGFACE_TOKEN: &str = "HUGGINGFACE_TOKEN";
pub const LLAMA3_MODEL_ID: &str = "LLAMA3_MODEL_ID";

static METADATA: CapabilityMetadata = CapabilityMetadata {
    name: "Llama3",
    description: "Generator using a locally running Llama3 model fetched from Hugging Face",
    requires_env: &[
        RequiredSetting::new(HUGGINGFACE_TOKEN, "Hugging Face Token"),
        RequiredSetting::new(LLAMA3_MODEL_ID, "Llama3 Model"),
    ],
    streamable: true,
    context_window: 8000,
};

const END_OF_SEQUENCE: &[&str] = &["<|eot_id|>", "<|end_of_text|>"];

/// Batch backend running a quantized GGUF Llama3 model in-process.
///
/// The model is loaded on every call and dropped afterwards.  Loading and
/// generation are CPU/GPU bound, so both run on Tokio's blocking thread pool
/// and only the finished answer is handed back.
pub struct LocalBackend {
    models_dir: PathBuf,
    use_gpu: bool,
}

impl LocalBackend {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            models_dir: Config::data_dir().join("models"),
            use_gpu: config.use_gpu,
        }
    }

    /// Store downloaded models under `models_dir` instead of the data directory.
    pub fn with_models_dir(mut self, models_dir: impl Into<PathBuf>) -> Self {
        self.models_dir = models_dir.into();
        self
    }

    #[cfg(feature = "local")]
    async fn run(&self, invocation: Invocation) -> Result<String> {
        let token = invocation.credentials.require(HUGGINGFACE_TOKEN)?;
        let model_id = invocation.credentials.require(LLAMA3_MODEL_ID)?;
        let model_path = hub::resolve(model_id, token, &self.models_dir).await?;

        let (system_prompt, turn) = chat_turns(&invocation.messages)?;
        let params = invocation.params;
        let stop_sequences = params.stop_sequences.clone();

        let engine_config = EngineConfig {
            model_path: model_path.to_string_lossy().into_owned(),
            temperature: if params.do_sample { params.temperature } else { 0.0 },
            top_p: params.top_p,
            max_tokens: params.max_new_tokens,
            use_gpu: self.use_gpu,
            ..Default::default()
        };

        info!(
            model = %model_path.display(),
            temperature = engine_config.temperature,
            top_p = params.top_p,
            max_tokens = params.max_new_tokens,
            use_gpu = self.use_gpu,
            messages = invocation.messages.len(),
            "running local GGUF model"
        );

        let response = tokio::task::spawn_blocking(move || {
            let engine = Engine::load(engine_config).map_err(|e| {
                GeneratorError::Llm(format!("failed to load GGUF model: {e}"))
            })?;
            let mut chat = ChatEngine::new(engine, Some(system_prompt));
            chat.chat(&turn).map_err(|e| {
                GeneratorError::Llm(format!("local inference failed: {e}"))
            })
        })
        .await
        .map_err(|e| GeneratorError::Llm(format!("blocking task join error: {e}")))??;

        let answer = truncate_at_stop(&response, &stop_sequences);

        info!(
            model = %model_path.display(),
            response_len = answer.len(),
            "local model response received"
        );

        Ok(answer)
    }

    #[cfg(not(feature = "local"))]
    async fn run(&self, _invocation: Invocation) -> Result<String> {
        Err(GeneratorError::Llm(
            "generator \"llama3\" requires rag-generator to be compiled with the `local` \
             feature.  Rebuild with `--features local`."
                .into(),
        ))
    }
}

#[async_trait::async_trait]
impl Backend for LocalBackend {
    fn metadata(&self) -> &CapabilityMetadata {
        &METADATA
    }

    fn end_of_sequence(&self) -> &'static [&'static str] {
        END_OF_SEQUENCE
    }

    async fn invoke(&self, invocation: Invocation) -> Result<BackendReply> {
        self.run(invocation).await.map(BackendReply::Complete)
    }
}

/// Split an assembled prompt into the chat engine's system prompt and the
/// final user turn.
///
/// The engine takes a single system prompt and one user message, so prior
/// turns are rendered as a transcript appended to the system prompt.
#[cfg_attr(not(feature = "local"), allow(dead_code))]
fn chat_turns(messages: &[PromptMessage]) -> Result<(String, String)> {
    let (last, rest) = messages
        .split_last()
        .ok_or_else(|| GeneratorError::Llm("empty prompt".into()))?;
    if last.role != Role::User {
        return Err(GeneratorError::Llm(format!(
            "prompt must end with a user turn, found {}",
            last.role
        )));
    }

    let (system, history) = match rest.split_first() {
        Some((first, history)) if first.role == Role::System => (first.content.clone(), history),
        _ => (String::new(), rest),
    };

    if history.is_empty() {
        return Ok((system, last.content.clone()));
    }

    let mut prompt = system;
    prompt.push_str("\n\nConversation so far:");
    for msg in history {
        prompt.push_str(&format!("\n{}: {}", msg.role, msg.content));
    }
    Ok((prompt, last.content.clone()))
}

/// Cut the answer at the first end-of-sequence marker and trim whitespace.
#[cfg_attr(not(feature = "local"), allow(dead_code))]
fn truncate_at_stop(text: &str, stop_sequences: &[String]) -> String {
    let end = stop_sequences
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len());
    text[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::llm::message::{ChatMessage, GenerationEvent};
    use crate::llm::session::SamplingParams;
    use crate::llm::settings::Settings;
    use crate::llm::{Capability, GenerateRequest, GeneratorCapability};

    fn capability(dir: &std::path::Path) -> Capability<LocalBackend> {
        let backend = LocalBackend::new(&LlmConfig::default()).with_models_dir(dir);
        Capability::new(backend, "sys", SamplingParams::default())
    }

    #[tokio::test]
    async fn missing_token_names_hugging_face() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new().with(LLAMA3_MODEL_ID, "owner/repo/model.gguf");

        let events: Vec<_> = capability(dir.path())
            .generate_stream(&GenerateRequest::default(), &settings)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &GenerationEvent::stop("Missing Hugging Face Token")
        );
    }

    #[tokio::test]
    async fn missing_model_names_llama3() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new().with(HUGGINGFACE_TOKEN, "hf_abc");

        let events: Vec<_> = capability(dir.path())
            .generate_stream(&GenerateRequest::default(), &settings)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &GenerationEvent::stop("Missing Llama3 Model")
        );
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[cfg(not(feature = "local"))]
    #[tokio::test]
    async fn without_local_feature_invocation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new()
            .with(HUGGINGFACE_TOKEN, "hf_abc")
            .with(LLAMA3_MODEL_ID, "owner/repo/model.gguf");

        let events: Vec<_> = capability(dir.path())
            .generate_stream(&GenerateRequest::default(), &settings)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        let err = events[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("--features local"));
    }

    #[test]
    fn metadata_and_markers() {
        let backend = LocalBackend::new(&LlmConfig::default());
        let meta = backend.metadata();
        assert_eq!(meta.name, "Llama3");
        assert_eq!(meta.context_window, 8000);
        assert!(meta.streamable);
        assert_eq!(backend.end_of_sequence(), &["<|eot_id|>", "<|end_of_text|>"]);
    }

    #[test]
    fn chat_turns_without_history() {
        let msgs = vec![ChatMessage::system("sys"), ChatMessage::user("question")];
        let (system, turn) = chat_turns(&msgs).unwrap();
        assert_eq!(system, "sys");
        assert_eq!(turn, "question");
    }

    #[test]
    fn chat_turns_render_history_into_system_prompt() {
        let msgs = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("question"),
        ];
        let (system, turn) = chat_turns(&msgs).unwrap();
        assert_eq!(system, "sys\n\nConversation so far:\nuser: hi\nassistant: hello");
        assert_eq!(turn, "question");
    }

    #[test]
    fn chat_turns_rejects_malformed_prompts() {
        assert!(chat_turns(&[]).is_err());
        assert!(chat_turns(&[ChatMessage::system("sys")]).is_err());
    }

    #[tokio::test]
    async fn marker_only_output_is_an_empty_answer() {
        let stops: Vec<String> = END_OF_SEQUENCE.iter().map(|s| s.to_string()).collect();
        let answer = truncate_at_stop("<|eot_id|>", &stops);
        assert_eq!(answer, "");

        let events: Vec<_> =
            crate::llm::session::drive(async move { Ok(BackendReply::Complete(answer)) })
                .collect()
                .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &GenerationEvent::chunk(""));
    }

    #[test]
    fn truncates_at_earliest_marker() {
        let stops = vec!["<|eot_id|>".to_string(), "<|end_of_text|>".to_string()];
        assert_eq!(truncate_at_stop(" Paris<|end_of_text|>x<|eot_id|>", &stops), "Paris");
        assert_eq!(truncate_at_stop("Paris\n", &stops), "Paris");
        assert_eq!(truncate_at_stop("Paris", &[]), "Paris");
    }
}
