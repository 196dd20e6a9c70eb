use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the office gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short = 'k', long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    api_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Circuit breakers, cache stats and per-operation metrics
    Resilience,
    /// Drop every cached response and value
    ClearCache,
    /// Force every circuit breaker back to closed
    ResetBreakers,
}

impl Commands {
    fn endpoint(&self) -> (Method, &'static str) {
        match self {
            Commands::Status => (Method::GET, "/admin/status"),
            Commands::Resilience => (Method::GET, "/admin/resilience"),
            Commands::ClearCache => (Method::DELETE, "/admin/resilience/cache"),
            Commands::ResetBreakers => (Method::POST, "/admin/resilience/breakers/reset"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.api_key))?,
    );

    let (method, path) = cli.command.endpoint();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
