use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{GeneratorError, Result};
use crate::llm::http;

const HF_BASE_URL: &str = "https://huggingface.co";

/// A GGUF file inside a Hugging Face model repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    /// `owner/repo`
    pub repo: String,
    /// Path of the file inside the repository.
    pub file: String,
}

impl ModelRef {
    /// Parse `owner/repo/path/to/file.gguf`.
    pub fn parse(model_id: &str) -> Result<Self> {
        let parts: Vec<&str> = model_id.trim_matches('/').split('/').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty() || *p == "..") {
            return Err(GeneratorError::Config(format!(
                "model id \"{model_id}\" is neither an existing file nor of the form owner/repo/file.gguf"
            )));
        }
        Ok(Self {
            repo: format!("{}/{}", parts[0], parts[1]),
            file: parts[2..].join("/"),
        })
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            base_url.trim_end_matches('/'),
            self.repo,
            self.file
        )
    }

    pub fn cache_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(&self.repo).join(&self.file)
    }
}

/// Turn a model id into a local GGUF path, downloading it on first use.
pub async fn resolve(model_id: &str, token: &str, models_dir: &Path) -> Result<PathBuf> {
    resolve_from(HF_BASE_URL, model_id, token, models_dir).await
}

async fn resolve_from(
    base_url: &str,
    model_id: &str,
    token: &str,
    models_dir: &Path,
) -> Result<PathBuf> {
    let local = Path::new(model_id);
    if local.is_file() {
        debug!(path = %local.display(), "using local model file");
        return Ok(local.to_path_buf());
    }

    let model = ModelRef::parse(model_id)?;
    let dest = model.cache_path(models_dir);
    if dest.is_file() {
        debug!(path = %dest.display(), "using cached model");
        return Ok(dest);
    }

    download(&model.url(base_url), token, &dest).await?;
    Ok(dest)
}

/// Stream `url` into `dest`, authenticating with the Hugging Face token.
async fn download(url: &str, token: &str, dest: &Path) -> Result<()> {
    info!(url, "downloading model");

    let client = http::client_for(url, 0)?;
    let resp = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| GeneratorError::Llm(format!("model download failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        warn!(status = %status, url, "model download rejected");
        return Err(GeneratorError::Llm(format!(
            "model download returned HTTP {status}"
        )));
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Only a complete download is renamed into the cache.
    let partial = dest.with_extension("part");
    let written = match write_body(resp.bytes_stream(), &partial).await {
        Ok(n) => n,
        Err(e) => {
            warn!(path = %partial.display(), error = %e, "model download interrupted");
            tokio::fs::remove_file(&partial).await.ok();
            return Err(e);
        }
    };
    tokio::fs::rename(&partial, dest).await?;

    info!(path = %dest.display(), bytes = written, "model download complete");
    Ok(())
}

async fn write_body<S, B>(mut body: S, path: &Path) -> Result<u64>
where
    S: futures::Stream<Item = std::result::Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk =
            chunk.map_err(|e| GeneratorError::Llm(format!("model download read error: {e}")))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
