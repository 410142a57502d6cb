use std::io::Write;
use std::path::PathBuf;

use futures::StreamExt;
use tracing::{error, info};

use rag_generator::config::Config;
use rag_generator::llm::{ConversationMessage, GenerateRequest, GeneratorEngine};

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything reads env vars
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    // Logs go to stderr; stdout carries the generated answer.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match CliArgs::parse(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            print_usage();
            std::process::exit(2);
        }
    };

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let engine = match &cli.backend {
        Some(key) => GeneratorEngine::with_registry(
            &config,
            rag_generator::llm::GeneratorRegistry::with_builtins(&config),
            key,
        ),
        None => GeneratorEngine::new(&config),
    };
    let engine = match engine {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize generator: {e}");
            std::process::exit(1);
        }
    };

    if cli.list {
        for (key, meta) in engine.registry.metadata() {
            let keys: Vec<&str> = meta.required_keys().collect();
            println!(
                "{key:<8} {} (streamable: {}, context window: {}, requires: {})",
                meta.description,
                meta.streamable,
                meta.context_window,
                keys.join(", "),
            );
        }
        return;
    }

    let history = match &cli.history {
        Some(path) => match load_history(path) {
            Ok(h) => h,
            Err(e) => {
                error!("failed to load history from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Vec::new(),
    };

    info!(
        backend = engine.active_backend(),
        queries = cli.queries.len(),
        passages = cli.context.len(),
        history = history.len(),
        "generating"
    );

    let request = GenerateRequest::new(&cli.queries, &cli.context, &history);
    let mut events = engine.generate_stream(&request);
    let mut stdout = std::io::stdout();

    while let Some(item) = events.next().await {
        match item {
            Ok(event) if cli.json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("failed to encode event: {e}"),
            },
            Ok(event) => {
                print!("{}", event.message);
                stdout.flush().ok();
            }
            Err(e) => {
                error!("generation failed: {e}");
                std::process::exit(1);
            }
        }
    }

    if !cli.json {
        println!();
    }
}

fn load_history(path: &std::path::Path) -> rag_generator::Result<Vec<ConversationMessage>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<PathBuf>,
    backend: Option<String>,
    context: Vec<String>,
    history: Option<PathBuf>,
    list: bool,
    json: bool,
    queries: Vec<String>,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut cli = CliArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("{flag} requires a value"))
            };
            match arg.as_str() {
                "--config" => cli.config = Some(PathBuf::from(value("--config")?)),
                "--backend" => cli.backend = Some(value("--backend")?),
                "--context" => cli.context.push(value("--context")?),
                "--history" => cli.history = Some(PathBuf::from(value("--history")?)),
                "--list" => cli.list = true,
                "--json" => cli.json = true,
                flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
                query => cli.queries.push(query.to_string()),
            }
        }
        if cli.queries.is_empty() && !cli.list {
            return Err("at least one query is required".into());
        }
        Ok(cli)
    }
}

fn print_usage() {
    println!(
        r#"rag-generator - answer a query from retrieved context

USAGE:
    rag-generator [OPTIONS] QUERY...

OPTIONS:
    --config <path>     Path to config.toml (default: ~/.config/rag-generator/config.toml)
    --backend <key>     Generator to use: llama3 or ollama (overrides config)
    --context <text>    Retrieved passage; repeat for several passages
    --history <file>    JSON array of prior messages: [{{"role": "user", "content": "..."}}]
    --list              List available generators and their required settings
    --json              Print each generation event as a JSON line
    --default-config    Print the default config.toml and exit
    -h, --help          Show this help message

ENVIRONMENT:
    GENERATOR_BACKEND   Override the generator backend
    HUGGINGFACE_TOKEN   Hugging Face access token (llama3)
    LLAMA3_MODEL_ID     GGUF path or owner/repo/file.gguf (llama3)
    OLLAMA_URL          Ollama server URL (ollama)
    OLLAMA_MODEL        Ollama model tag (ollama)
    RUST_LOG            Log filter (default: info)
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_queries_and_options() {
        let cli = CliArgs::parse(&args(&[
            "--backend", "ollama", "--context", "A", "--context", "B", "--json", "What?", "Why?",
        ]))
        .unwrap();
        assert_eq!(cli.backend.as_deref(), Some("ollama"));
        assert_eq!(cli.context, vec!["A", "B"]);
        assert!(cli.json);
        assert_eq!(cli.queries, vec!["What?", "Why?"]);
    }

    #[test]
    fn list_needs_no_query() {
        let cli = CliArgs::parse(&args(&["--list"])).unwrap();
        assert!(cli.list);
        assert!(cli.queries.is_empty());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(CliArgs::parse(&args(&[])).is_err());
        assert!(CliArgs::parse(&args(&["--context"])).is_err());
        assert!(CliArgs::parse(&args(&["--verbose", "q"])).is_err());
    }

    #[test]
    fn loads_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"[{"type": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]"#,
        )
        .unwrap();
        let history = load_history(&path).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");
    }
}
