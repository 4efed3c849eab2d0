use anyhow::Result;
use clap::Parser;
use policy_nl2sql::config::Config;
use policy_nl2sql::logging::init_tracing;
use policy_nl2sql::pipeline::Nl2SqlPipeline;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "policy-nl2sql")]
#[command(about = "Translate insurance policy questions into PostgreSQL SELECT queries")]
struct Args {
    /// The question in natural language
    prompt: String,

    /// Chat assistant used for table context (default: DEFAULT_ASSISTANT_ID or 16)
    #[arg(short, long)]
    assistant_id: Option<String>,

    /// Run the generated query against DATABASE_URL
    #[arg(short, long)]
    execute: bool,

    /// Path to the schema document (overrides POLICY_SCHEMA_PATH)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Pretty-print the JSON result
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(schema) = args.schema {
        config.schema_path = schema;
    }
    let assistant_id = args
        .assistant_id
        .unwrap_or_else(|| config.default_assistant_id.clone());

    info!("Policy NL2SQL starting...");
    let pipeline = Nl2SqlPipeline::from_config(&config).await;
    let envelope = pipeline.run(&args.prompt, &assistant_id, args.execute).await;

    let output = if args.pretty {
        serde_json::to_string_pretty(&envelope)?
    } else {
        serde_json::to_string(&envelope)?
    };
    println!("{}", output);

    if envelope.is_success() {
        Ok(())
    } else {
        std::process::exit(1)
    }
}
