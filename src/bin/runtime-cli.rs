use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "runtime-cli")]
#[command(about = "Operator CLI for the MCP runtime HTTP transport", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// API key, if the server requires one
    #[arg(short, long, env = "MCP_RUNTIME_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show subsystem lifecycle status
    Status,
    /// Check server health
    Health,
    /// List sessions
    Sessions {
        /// Only sessions in this status (active, suspended, expired, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one session
    Session { id: String },
    /// Find the live session working on a repository
    Repo { url: String },
    /// Show jobs and tool executions tracked for a session
    Jobs { id: String },
    /// List label values in use across sessions
    Labels,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
    }

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/status", cli.url)).headers(headers).send().await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url)).headers(headers).send().await?;
            print_response(res).await?;
        }
        Commands::Sessions { status } => {
            let params = match status {
                Some(status) => json!({ "status": status }),
                None => Value::Null,
            };
            call(&client, &cli.url, headers, "session/list", params).await?;
        }
        Commands::Session { id } => {
            call(&client, &cli.url, headers, "session/get", json!({ "id": id })).await?;
        }
        Commands::Repo { url } => {
            call(&client, &cli.url, headers, "session/find_by_repo", json!({ "repo_url": url })).await?;
        }
        Commands::Jobs { id } => {
            call(&client, &cli.url, headers, "session/jobs", json!({ "id": id })).await?;
        }
        Commands::Labels => {
            call(&client, &cli.url, headers, "session/labels", Value::Null).await?;
        }
    }

    Ok(())
}

async fn call(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    method: &str,
    params: Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let res = client.post(format!("{}/rpc", url)).headers(headers).json(&body).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    if let Some(error) = json.get("error") {
        eprintln!("Error: {}", serde_json::to_string_pretty(error)?);
        return Ok(());
    }
    let shown = json.get("result").unwrap_or(&json);
    println!("{}", serde_json::to_string_pretty(shown)?);
    Ok(())
}
