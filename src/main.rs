use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_provider::CompletionSource;
use chat_provider_mock::ScriptedCompletionSource;
use chat_provider_openai::{OpenAiCompletionSource, OpenAiProviderConfig, OPENAI_PROVIDER_ID};
use chatbot_lite::config::{Config, ProviderKind, DEFAULT_CONFIG_PATH};
use chatbot_lite::runtime::ChatRuntime;
use chatbot_lite::terminal::Terminal;
use chatbot_lite::{logging, signals};
use clap::Parser;
use session_store::SessionStore;
use tokio::io::BufReader;

const MOCK_FRAGMENT_DELAY: Duration = Duration::from_millis(30);

#[derive(Debug, Parser)]
#[command(name = "chatbot-lite", version, about = "Chat with an OpenAI-compatible model in the terminal")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CHATBOT_LITE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Resume a stored session instead of starting a new one.
    #[arg(long, value_name = "ID")]
    session: Option<String>,

    /// Override the configured provider.
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(provider) = cli.provider {
        config.llm.provider = provider;
    }

    let _log_guard = logging::init(&config.log_dir())?;
    tracing::info!(
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        api_base = %config.llm.api_base,
        "starting chatbot-lite"
    );

    let root = tracing::info_span!("chatbot_lite");
    let source = build_source(&config, &root)?;
    let store = SessionStore::open(&config.app.history_dir)?.with_span(tracing::info_span!(
        parent: &root,
        "session_store",
        root = %config.app.history_dir.display()
    ));
    let runtime = ChatRuntime::new(
        store,
        source,
        config.context_settings(),
        config.llm.system_prompt.clone(),
    )
    .with_span(tracing::info_span!(parent: &root, "runtime"));

    match cli.session.as_deref() {
        Some(session_id) => {
            runtime
                .load_session(session_id)
                .with_context(|| format!("failed to resume session {session_id}"))?;
        }
        None => {
            runtime.new_session()?;
        }
    }

    let _cancel_guard = signals::install_cancel_handler(runtime.cancel_signal())
        .context("failed to install Ctrl-C handler")?;

    let mut terminal = Terminal::new(&runtime, io::stdout());
    let result = terminal.run(BufReader::new(tokio::io::stdin())).await;

    runtime.shutdown()?;
    tracing::info!("chatbot-lite stopped");
    result.context("terminal I/O failed")
}

fn build_source(config: &Config, root: &tracing::Span) -> Result<Arc<dyn CompletionSource>> {
    let llm = &config.llm;
    let source: Arc<dyn CompletionSource> = match llm.provider {
        ProviderKind::OpenAi => {
            let provider_config = OpenAiProviderConfig::new(&llm.api_base, &llm.model)
                .with_api_key(&llm.api_key)
                .with_temperature(llm.temperature)
                .with_max_tokens(llm.max_tokens)
                .with_timeout(Duration::from_secs(llm.timeout_sec))
                .with_env_proxy(llm.use_env_proxy);
            let span = tracing::info_span!(
                parent: root,
                "completion",
                provider = OPENAI_PROVIDER_ID,
                model = %llm.model
            );
            Arc::new(OpenAiCompletionSource::new(provider_config)?.with_span(span))
        }
        ProviderKind::Mock => Arc::new(
            ScriptedCompletionSource::new()
                .with_model_id(&llm.model)
                .with_fragment_delay(MOCK_FRAGMENT_DELAY),
        ),
    };
    Ok(source)
}
