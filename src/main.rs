use clap::Parser;
use insightflow_lib::config::AppConfig;
use tracing_subscriber::EnvFilter;

/// Natural-language data questions and code review over agent pipelines
#[derive(Parser, Debug)]
#[command(name = "insightflow", version)]
struct Cli {
    /// HTTP bind address (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// SQLite URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// gemini, ollama or mock (overrides AGENT_PROVIDER)
    #[arg(long)]
    provider: Option<String>,

    /// Model name (overrides AGENT_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Print the resolved configuration and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

impl Cli {
    fn lookup(&self, key: &str) -> Option<String> {
        let flag = match key {
            "BIND_ADDR" => self.bind.as_deref(),
            "DATABASE_URL" => self.database_url.as_deref(),
            "AGENT_PROVIDER" => self.provider.as_deref(),
            "AGENT_MODEL" => self.model.as_deref(),
            _ => None,
        };
        flag.map(str::to_string)
            .or_else(|| std::env::var(key).ok())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match AppConfig::from_lookup(|key| cli.lookup(key)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    if cli.print_config {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("error: {}", e),
        }
        return;
    }

    if let Err(e) = insightflow_lib::run(config).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
