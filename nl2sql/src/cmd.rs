use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "answer plain-language questions from a sqlite database", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question by generating, validating and running SQL
    Ask {
        /// SQLite database to query (opened read-only)
        #[arg(short, long, env = "NL2SQL_DATABASE")]
        database: PathBuf,

        /// Prebuilt schema index (default: built in memory from the database)
        #[arg(short, long, env = "NL2SQL_INDEX")]
        index: Option<PathBuf>,

        /// Maximum repair attempts before giving up
        #[arg(long)]
        max_retries: Option<usize>,

        /// Number of tables to take from the schema index
        #[arg(long)]
        k: Option<usize>,

        /// Chat model name
        #[arg(long)]
        model: Option<String>,

        /// Metrics JSON output path
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Disable run metrics
        #[arg(long, default_value = "false")]
        no_metrics: bool,

        /// Use offline hashed word vectors instead of the embeddings endpoint
        #[arg(long, default_value = "false")]
        hashed_embeddings: bool,

        /// The question to answer
        question: String,
    },

    /// Build a schema index from a database and save it as JSON
    Index {
        /// SQLite database to describe (opened read-only)
        #[arg(short, long, env = "NL2SQL_DATABASE")]
        database: PathBuf,

        /// Index JSON output path
        #[arg(short, long)]
        output: PathBuf,

        /// Sample rows to include per table
        #[arg(long, default_value = "3")]
        sample_rows: usize,

        /// Use offline hashed word vectors instead of the embeddings endpoint
        #[arg(long, default_value = "false")]
        hashed_embeddings: bool,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ask {
                database,
                index,
                max_retries,
                k,
                model,
                metrics_file,
                no_metrics,
                hashed_embeddings,
                question,
            } => {
                ask(
                    database,
                    index,
                    max_retries,
                    k,
                    model,
                    metrics_file,
                    no_metrics,
                    hashed_embeddings,
                    question,
                )
                .await
            }
            Commands::Index {
                database,
                output,
                sample_rows,
                hashed_embeddings,
            } => build_index(database, output, sample_rows, hashed_embeddings).await,
        }
    }
}

const INDEX_SAMPLE_ROWS: usize = 3;

const SYSTEM_PROMPT: &str =
    "You are a careful SQL analyst. Follow the user's instructions exactly and never modify data.";

const UNRECOVERABLE_MESSAGE: &str =
    "Sorry, I could not find the tables needed to answer that question.";

/// what to tell the user when a run fails before any sql exists
fn failure_message(error: &common::Nl2SqlError) -> Option<&'static str> {
    error.is_unrecoverable().then_some(UNRECOVERABLE_MESSAGE)
}

fn select_embedder(
    llm_config: &common::LlmConfig,
    hashed: bool,
) -> Result<std::sync::Arc<dyn common::llm::Embedder>> {
    use common::llm::{HashingEmbedder, OpenAiEmbedder};
    use std::sync::Arc;

    if hashed {
        tracing::warn!("using hashed word vectors; paraphrased questions may miss tables");
        return Ok(Arc::new(HashingEmbedder::new()));
    }
    if llm_config.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set, falling back to hashed word vectors");
        return Ok(Arc::new(HashingEmbedder::new()));
    }
    Ok(Arc::new(OpenAiEmbedder::new(llm_config)?))
}

async fn load_or_build_index(
    index: Option<&Path>,
    db: &common::sql::SqliteDatabase,
    embedder: std::sync::Arc<dyn common::llm::Embedder>,
) -> Result<common::schema::VectorSchemaIndex> {
    use common::schema::{build_schema_documents, VectorSchemaIndex};

    match index {
        Some(path) => Ok(VectorSchemaIndex::load(path, embedder).await?),
        None => {
            tracing::info!("no index given, building one from the database");
            let documents = build_schema_documents(db, db, INDEX_SAMPLE_ROWS).await?;
            Ok(VectorSchemaIndex::from_documents(embedder, documents).await?)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn ask(
    database: PathBuf,
    index: Option<PathBuf>,
    max_retries: Option<usize>,
    k: Option<usize>,
    model: Option<String>,
    metrics_file: Option<PathBuf>,
    no_metrics: bool,
    hashed_embeddings: bool,
    question: String,
) -> Result<()> {
    use common::llm::OpenAiGateway;
    use common::pipeline::{PipelineContext, QueryPipeline};
    use common::sql::SqliteDatabase;
    use common::tracing::init_tracing;
    use common::{LlmConfig, MetricsMonitor, NoopMonitor, PipelineConfig, RunMonitor};
    use std::sync::Arc;

    let _guard = init_tracing("nl2sql")?;

    let mut config = PipelineConfig::from_env()?;
    if let Some(n) = max_retries {
        config = config.with_max_retries(n)?;
    }
    if let Some(k) = k {
        config = config.with_vector_search_k(k)?;
    }
    if let Some(path) = metrics_file {
        config.metrics_file = path;
    }
    if no_metrics {
        config.enable_monitoring = false;
    }

    let mut llm_config = LlmConfig::from_env()?;
    if let Some(model) = model {
        llm_config.model = model;
    }

    tracing::info!("opening database {}", database.display());
    let db = Arc::new(
        SqliteDatabase::open(&database)
            .with_context(|| format!("failed to open {}", database.display()))?,
    );
    let embedder = select_embedder(&llm_config, hashed_embeddings)?;
    let schema_index = load_or_build_index(index.as_deref(), &db, embedder).await?;
    tracing::info!(
        tables = schema_index.len(),
        model = schema_index.model_name(),
        "schema index ready"
    );

    let ctx = PipelineContext::builder()
        .llm(Arc::new(
            OpenAiGateway::new(llm_config)?.with_system_prompt(SYSTEM_PROMPT),
        ))
        .index(Arc::new(schema_index))
        .catalog(db.clone())
        .executor(db)
        .build()?;

    let metrics = config.enable_monitoring.then(MetricsMonitor::new);
    let monitor: &dyn RunMonitor = match &metrics {
        Some(m) => m as &dyn RunMonitor,
        None => &NoopMonitor,
    };

    let pipeline = QueryPipeline::new(ctx, config);
    let result = pipeline.run(&question, monitor).await;

    if let Some(metrics) = &metrics {
        metrics.log_summary();
        if pipeline.config().export_metrics {
            if let Err(e) = metrics.export(&pipeline.config().metrics_file) {
                tracing::warn!("failed to export metrics: {}", e);
            }
        }
    }

    let state = match result {
        Ok(state) => state,
        Err(e) => {
            if let Some(message) = failure_message(&e) {
                println!("{}", message);
            }
            return Err(e.into());
        }
    };
    tracing::info!(
        sql = %state.generated_sql(),
        retries = state.retry_count(),
        "final query"
    );
    if let Some(response) = state.final_response() {
        println!("{}", response);
    }
    Ok(())
}

async fn build_index(
    database: PathBuf,
    output: PathBuf,
    sample_rows: usize,
    hashed_embeddings: bool,
) -> Result<()> {
    use common::schema::{build_schema_documents, VectorSchemaIndex};
    use common::sql::SqliteDatabase;
    use common::tracing::init_tracing;
    use common::LlmConfig;

    let _guard = init_tracing("nl2sql")?;

    let db = SqliteDatabase::open(&database)
        .with_context(|| format!("failed to open {}", database.display()))?;

    let documents = build_schema_documents(&db, &db, sample_rows).await?;
    if documents.is_empty() {
        anyhow::bail!("no tables could be described in {}", database.display());
    }

    let embedder = select_embedder(&LlmConfig::from_env()?, hashed_embeddings)?;
    VectorSchemaIndex::from_documents(embedder, documents)
        .await?
        .save(&output)?;
    Ok(())
}
