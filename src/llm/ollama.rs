use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{GeneratorError, Result};
use crate::llm::http;
use crate::llm::message::{GenerationEvent, PromptMessage};
use crate::llm::session::BackendReply;
use crate::llm::settings::RequiredSetting;
use crate::llm::{Backend, CapabilityMetadata, Invocation};

pub const OLLAMA_URL: &str = "OLLAMA_URL";
pub const OLLAMA_MODEL: &str = "OLLAMA_MODEL";

static METADATA: CapabilityMetadata = CapabilityMetadata {
    name: "Ollama",
    description: "Generator streaming tokens from an Ollama server over HTTP",
    requires_env: &[
        RequiredSetting::new(OLLAMA_URL, "Ollama URL"),
        RequiredSetting::new(OLLAMA_MODEL, "Ollama Model"),
    ],
    streamable: true,
    context_window: 10000,
};

/// Incremental backend talking to an Ollama server.
///
/// Posts the assembled prompt to `POST {OLLAMA_URL}/api/chat` with
/// `stream: true` and forwards each NDJSON line as an event.  The response
/// body is read on a spawned task that feeds a bounded channel; dropping the
/// event stream closes the channel and stops the reader.
pub struct OllamaBackend {
    timeout_secs: u64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaBackend {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait::async_trait]
impl Backend for OllamaBackend {
    fn metadata(&self) -> &CapabilityMetadata {
        &METADATA
    }

    async fn invoke(&self, invocation: Invocation) -> Result<BackendReply> {
        let base_url = invocation
            .credentials
            .require(OLLAMA_URL)?
            .trim_end_matches('/')
            .to_string();
        let model = invocation.credentials.require(OLLAMA_MODEL)?;
        let params = &invocation.params;

        let body = ChatRequest {
            model,
            messages: &invocation.messages,
            stream: true,
            options: ChatOptions {
                temperature: if params.do_sample { params.temperature } else { 0.0 },
                top_p: params.top_p,
                num_predict: params.max_new_tokens,
                stop: params.stop_sequences.clone(),
            },
        };

        let url = format!("{base_url}/api/chat");
        let client = http::client_for(&base_url, self.timeout_secs)?;

        debug!(
            model = %model,
            url = %url,
            messages = invocation.messages.len(),
            max_tokens = params.max_new_tokens,
            "invoking Ollama API"
        );

        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Llm(format!("Ollama request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Ollama API error");
            return Err(GeneratorError::Llm(format!(
                "Ollama API returned {status}: {error_text}"
            )));
        }

        info!(model = %model, "Ollama stream opened");

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(forward(resp.bytes_stream(), tx));
        Ok(BackendReply::Incremental(ReceiverStream::new(rx).boxed()))
    }
}

/// Read NDJSON from `body` and send one event per line until a terminal
/// event, an error, or the receiver going away.
async fn forward<S, B>(body: S, tx: mpsc::Sender<Result<GenerationEvent>>)
where
    S: Stream<Item = reqwest::Result<B>>,
    B: AsRef<[u8]>,
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::default();
    let mut streamed = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(Err(GeneratorError::Llm(format!("Ollama stream failed: {e}"))))
                    .await;
                return;
            }
        };
        for line in lines.push(chunk.as_ref()) {
            let item = parse_line(&line);
            let finished = !matches!(&item, Ok(event) if !event.is_terminal());
            if let Ok(event) = &item {
                streamed += event.message.len();
            }
            if tx.send(item).await.is_err() {
                debug!("Ollama stream receiver dropped");
                return;
            }
            if finished {
                debug!(response_len = streamed, "Ollama stream finished");
                return;
            }
        }
    }

    if let Some(rest) = lines.finish() {
        let _ = tx.send(parse_line(&rest)).await;
    }
    debug!(response_len = streamed, "Ollama stream ended without done marker");
}

/// Map one NDJSON line to an event.  A blank line ends the stream.
fn parse_line(line: &str) -> Result<GenerationEvent> {
    if line.trim().is_empty() {
        return Ok(GenerationEvent::stop(""));
    }
    let chunk: ChatChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(GeneratorError::Llm(format!("Ollama error: {error}")));
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(if chunk.done {
        GenerationEvent::stop(content)
    } else {
        GenerationEvent::chunk(content)
    })
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Unterminated trailing data, if any is more than whitespace.
    fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        if rest.is_empty() { None } else { Some(rest) }
    }
}
