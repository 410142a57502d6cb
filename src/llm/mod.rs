pub mod context;
pub mod message;
pub mod prompts;
pub mod session;
pub mod settings;

mod http;
#[cfg_attr(not(feature = "local"), allow(dead_code))]
mod hub;
mod local;
mod ollama;
#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GeneratorError, Result};

pub use context::GenerateRequest;
pub use local::LocalBackend;
pub use message::{
    ChatMessage, ConversationMessage, FinishReason, GenerationEvent, PromptMessage, Role,
};
pub use ollama::OllamaBackend;
pub use session::{BackendReply, EventStream, SamplingParams};
pub use settings::{ConfigError, Credentials, RequiredSetting, Settings};

// -- Capability metadata ----------------------------------------------------

/// Static description of a backend, exposed to the hosting pipeline for
/// discovery.  `context_window` is a hint only and is never enforced.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub requires_env: &'static [RequiredSetting],
    pub streamable: bool,
    pub context_window: usize,
}

impl CapabilityMetadata {
    /// Names of the settings that must be present before invocation.
    pub fn required_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.requires_env.iter().map(|r| r.key)
    }
}

// -- Backend trait ----------------------------------------------------------

/// Everything a backend receives for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub credentials: Credentials,
    pub messages: Vec<PromptMessage>,
    pub params: SamplingParams,
}

/// Trait that every concrete model backend implements.
///
/// A backend only knows how to turn an assembled prompt into a reply.
/// Settings validation, prompt assembly and event shaping are shared and
/// live in [`Capability`].
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn metadata(&self) -> &CapabilityMetadata;

    /// End-of-sequence markers added to the sampling parameters.
    fn end_of_sequence(&self) -> &'static [&'static str] {
        &[]
    }

    /// Run the model.  Resources are built per call; nothing is cached.
    async fn invoke(&self, invocation: Invocation) -> Result<BackendReply>;
}

// -- Generator capability ---------------------------------------------------

/// The contract the hosting pipeline talks to.
pub trait GeneratorCapability: Send + Sync {
    fn metadata(&self) -> &CapabilityMetadata;

    /// Stream the reply to `request`.
    ///
    /// A missing required setting yields a single terminal event naming it
    /// and the backend is never invoked.  On success a batch backend yields
    /// exactly one non-terminal event.  Backend failures surface as an
    /// `Err` item.
    fn generate_stream(&self, request: &GenerateRequest<'_>, settings: &Settings) -> EventStream;
}

/// Wraps a [`Backend`] with the shared validation, assembly and streaming
/// steps.
pub struct Capability<B> {
    backend: Arc<B>,
    system_message: String,
    sampling: SamplingParams,
}

impl<B: Backend + 'static> Capability<B> {
    pub fn new(backend: B, system_message: impl Into<String>, sampling: SamplingParams) -> Self {
        Self {
            backend: Arc::new(backend),
            system_message: system_message.into(),
            sampling,
        }
    }

    /// Build from the `[llm]` section and system message of `config`.
    pub fn from_config(backend: B, config: &Config) -> Self {
        Self::new(backend, config.system_message.clone(), config.llm.sampling())
    }
}

impl<B: Backend + 'static> GeneratorCapability for Capability<B> {
    fn metadata(&self) -> &CapabilityMetadata {
        self.backend.metadata()
    }

    fn generate_stream(&self, request: &GenerateRequest<'_>, settings: &Settings) -> EventStream {
        let meta = self.backend.metadata();

        let credentials = match settings::validate(settings, meta.requires_env) {
            Ok(c) => c,
            Err(e) => {
                warn!(backend = meta.name, missing = e.key(), "required setting missing");
                return session::terminal(e.to_string());
            }
        };

        let messages = prompts::assemble(
            request.queries,
            request.context,
            request.conversation,
            &self.system_message,
        );

        let mut params = self.sampling.clone();
        params.stop_sequences = self
            .backend
            .end_of_sequence()
            .iter()
            .map(|s| s.to_string())
            .collect();

        debug!(
            backend = meta.name,
            messages = messages.len(),
            max_new_tokens = params.max_new_tokens,
            "generation requested"
        );

        let backend = Arc::clone(&self.backend);
        session::drive(async move {
            backend
                .invoke(Invocation {
                    credentials,
                    messages,
                    params,
                })
                .await
        })
    }
}

// -- Registry ---------------------------------------------------------------

/// Registry of available generators.  Built-in backends are registered by
/// `with_builtins`; additional ones can be added via `register()`.
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn GeneratorCapability>>,
}

impl GeneratorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            generators: HashMap::new(),
        }
    }

    /// Registry holding the local Llama3 and remote Ollama generators.
    pub fn with_builtins(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(
            "llama3",
            Arc::new(Capability::from_config(LocalBackend::new(&config.llm), config)),
        );
        registry.register(
            "ollama",
            Arc::new(Capability::from_config(OllamaBackend::new(&config.llm), config)),
        );
        registry
    }

    /// Register a generator under `key`, replacing any previous entry.
    pub fn register(&mut self, key: &str, generator: Arc<dyn GeneratorCapability>) {
        info!(backend = key, name = generator.metadata().name, "generator registered");
        self.generators.insert(key.to_string(), generator);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn GeneratorCapability>> {
        self.generators.get(key).cloned()
    }

    /// All registered keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.generators.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Metadata for every registered generator, sorted by key.
    pub fn metadata(&self) -> Vec<(String, CapabilityMetadata)> {
        self.list()
            .into_iter()
            .filter_map(|key| {
                let meta = self.generators.get(&key)?.metadata().clone();
                Some((key, meta))
            })
            .collect()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// -- Engine -----------------------------------------------------------------

/// Dispatches generation to the active generator.
///
/// Built-in generators:
/// - **llama3** -- local GGUF model (inference requires the `local` feature)
/// - **ollama** -- Ollama server, streamed token by token over HTTP
///
/// Settings are resolved from the config and the process environment on
/// every call.
pub struct GeneratorEngine {
    active: Arc<dyn GeneratorCapability>,
    active_key: String,
    config: Config,
    /// Every available generator (built-in + registered).
    pub registry: GeneratorRegistry,
}

impl GeneratorEngine {
    /// Build the engine from config.
    ///
    /// The generator is selected by `config.llm.backend`, overridable with
    /// the `GENERATOR_BACKEND` environment variable.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = std::env::var("GENERATOR_BACKEND")
            .unwrap_or_else(|_| config.llm.backend.clone());
        Self::with_registry(config, GeneratorRegistry::with_builtins(config), &backend)
    }

    /// Build the engine around an explicit registry and backend key.
    pub fn with_registry(config: &Config, registry: GeneratorRegistry, backend: &str) -> Result<Self> {
        let active = match registry.get(backend) {
            Some(g) => {
                info!(backend = %backend, name = g.metadata().name, "generator selected");
                g
            }
            None => {
                return Err(GeneratorError::Config(format!(
                    "unknown generator backend \"{backend}\" (available: [{}])",
                    registry.list().join(", "),
                )));
            }
        };

        Ok(Self {
            active,
            active_key: backend.to_string(),
            config: config.clone(),
            registry,
        })
    }

    /// Stream a reply from the active generator.
    pub fn generate_stream(&self, request: &GenerateRequest<'_>) -> EventStream {
        let settings = Settings::resolve(&self.config);
        self.active.generate_stream(request, &settings)
    }

    /// List all available backend keys.
    pub fn available_backends(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Metadata of the active generator.
    pub fn backend_info(&self) -> &CapabilityMetadata {
        self.active.metadata()
    }

    /// Return the key of the active generator.
    pub fn active_backend(&self) -> &str {
        &self.active_key
    }
}
