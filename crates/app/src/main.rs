use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use pdf_chat_core::config::{DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_URL};
use pdf_chat_core::{
    AnswerEvent, ChatbotConfig, Chatbot, GeminiClient, GeminiConfig, GenerationOptions,
    IngestionOptions, Neo4jConfig, Neo4jStore, PdfSource, RetrievalOptions,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Bot = Chatbot<Neo4jStore, GeminiClient>;

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args)]
struct Settings {
    /// Neo4j HTTP endpoint
    #[arg(long, env = "NEO4J_URL", default_value = "http://localhost:7474")]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DB", default_value = "neo4j")]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true, default_value = "")]
    neo4j_password: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, default_value = "")]
    gemini_api_key: String,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Gemini API base URL
    #[arg(long, env = "GEMINI_URL", default_value = DEFAULT_GEMINI_URL)]
    gemini_url: String,

    /// Sampling temperature passed to the model.
    #[arg(long)]
    temperature: Option<f32>,

    /// Characters per chunk.
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Chunks written per store request.
    #[arg(long, default_value = "10")]
    write_batch_size: usize,

    /// Delete and write in separate transactions instead of one.
    #[arg(long, default_value_t = false)]
    non_atomic_replace: bool,

    /// Maximum chunks returned by a substring match.
    #[arg(long, default_value = "5")]
    match_limit: usize,

    /// Chunks sampled when nothing matches.
    #[arg(long, default_value = "3")]
    sample_limit: usize,

    /// Maximum characters of context sent with a question.
    #[arg(long, default_value = "8000")]
    context_budget: usize,

    /// Generation attempts before giving up.
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Delay between generation attempts, in milliseconds.
    #[arg(long, default_value = "1000")]
    retry_delay_ms: u64,
}

impl Settings {
    fn into_config(self) -> ChatbotConfig {
        ChatbotConfig {
            neo4j: Neo4jConfig {
                url: self.neo4j_url,
                database: self.neo4j_db,
                username: self.neo4j_user,
                password: self.neo4j_password,
            },
            gemini: GeminiConfig {
                base_url: self.gemini_url,
                model: self.gemini_model,
                api_key: self.gemini_api_key,
                temperature: self.temperature,
            },
            ingestion: IngestionOptions {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
                write_batch_size: self.write_batch_size,
                atomic_replace: !self.non_atomic_replace,
            },
            retrieval: RetrievalOptions {
                match_limit: self.match_limit,
                sample_limit: self.sample_limit,
                context_budget: self.context_budget,
            },
            generation: GenerationOptions {
                max_attempts: self.max_attempts,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Replace the stored corpus with the chunks of one PDF.
    Ingest {
        /// PDF file to ingest.
        #[arg(long)]
        file: PathBuf,
    },
    /// Answer a single question from the stored corpus.
    Ask {
        #[arg(long)]
        question: String,
        /// Print the answer as it is generated.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Read questions from stdin; `/ingest <path>` loads a new document.
    Chat {
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.settings.into_config();
    let bot = Chatbot::connect(&config).map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        neo4j = %config.neo4j.url,
        model = %config.gemini.model,
        "pdf-chat boot"
    );

    match cli.command {
        Command::Ingest { file } => ingest(&bot, file).await?,
        Command::Ask { question, stream } => ask(&bot, &question, stream).await?,
        Command::Chat { stream } => chat(&bot, stream).await?,
    }

    Ok(())
}

async fn ingest(bot: &Bot, file: PathBuf) -> anyhow::Result<()> {
    let report = bot
        .ingest(PdfSource::Path(file.clone()))
        .await
        .map_err(|error| anyhow::anyhow!("failed to ingest {}: {error}", file.display()))?;

    for skipped in &report.skipped_pages {
        warn!(page = skipped.page, reason = %skipped.reason, "skipped page");
    }

    println!(
        "{} chunks stored from {} ({} pages, {} chars) at {}",
        report.chunk_count,
        report.document_name,
        report.page_count,
        report.text_chars,
        report.ingested_at.to_rfc3339()
    );
    Ok(())
}

async fn ask(bot: &Bot, question: &str, stream: bool) -> anyhow::Result<()> {
    if stream {
        let mut events = bot.answer_stream(question);
        let mut stdout = std::io::stdout();
        while let Some(event) = events.next().await {
            match event {
                AnswerEvent::Fragment(text) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                AnswerEvent::End => writeln!(stdout)?,
            }
        }
    } else {
        let outcome = bot.answer(question).await;
        println!("{}", outcome.text());
    }
    Ok(())
}

async fn chat(bot: &Bot, stream: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_prompt()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" || line == "/exit" {
            break;
        }

        if let Some(path) = line.strip_prefix("/ingest ") {
            if let Err(error) = ingest(bot, PathBuf::from(path.trim())).await {
                println!("{error}");
            }
        } else {
            ask(bot, line, stream).await?;
        }
        print_prompt()?;
    }

    Ok(())
}

fn print_prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}
