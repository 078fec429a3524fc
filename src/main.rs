//! Mock Router - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use mock_router::{FixedPassThrough, HttpEvent, HttpMethod, MockRequest, MockResponse, RouterConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = include_str!("../demos/default-config.yaml");

#[derive(Parser, Debug)]
#[command(
    name = "mock-router",
    about = "In-process mock HTTP router - resolve requests against YAML route definitions",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-router.yaml")]
    config: PathBuf,

    /// Request to resolve, e.g. "GET /todo/item?page=1"
    #[arg(short, long)]
    request: Option<String>,

    /// Request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        RouterConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using built-in demo configuration");
        RouterConfig::from_yaml(DEFAULT_CONFIG)?
    };

    if args.validate {
        println!(
            "Configuration is valid ({} routes, {} named counters)",
            config.routes.len(),
            config.counter_names().len()
        );
        return Ok(());
    }

    let Some(line) = args.request.as_deref() else {
        anyhow::bail!("Nothing to do: pass --request, --validate or --print-config");
    };
    let request = build_request(line, &args.headers, args.body.as_deref())?;

    let compiled = config.into_router()?;
    let upstream = Arc::new(FixedPassThrough(
        MockResponse::new(502).with_body("no upstream configured"),
    ));

    let mut events = compiled.router.resolve(request, upstream);
    while let Some(event) = events.next().await {
        match event {
            Ok(HttpEvent::UploadProgress { loaded, total }) => {
                println!("upload   {}", progress(loaded, total));
            }
            Ok(HttpEvent::DownloadProgress { loaded, total }) => {
                println!("download {}", progress(loaded, total));
            }
            Ok(HttpEvent::Response(response)) => print_response(&response),
            Err(err) => {
                if let Some(status) = err.as_status() {
                    println!("error    {}", status);
                    if !status.body.is_empty() {
                        println!("{}", String::from_utf8_lossy(&status.body.to_bytes()));
                    }
                } else {
                    println!("error    {}", err);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn build_request(line: &str, headers: &[String], body: Option<&str>) -> Result<MockRequest> {
    let (method, url) = match line.trim().split_once(char::is_whitespace) {
        Some((method, url)) => (method.parse::<HttpMethod>()?, url.trim()),
        None => (HttpMethod::Get, line.trim()),
    };

    let mut request = MockRequest::new(method, url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header (expected \"Name: value\"): {}", header))?;
        request = request.with_header(name.trim(), value.trim());
    }
    if let Some(body) = body {
        let json = serde_json::from_str(body).context("Request body is not valid JSON")?;
        request = request.with_body(json);
    }
    Ok(request)
}

fn progress(loaded: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("{}/{}", loaded, total),
        None => loaded.to_string(),
    }
}

fn print_response(response: &MockResponse) {
    println!("response {} {}", response.status, response.status_text);
    let mut headers: Vec<_> = response.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        println!("{}: {}", name, value);
    }
    if !response.body.is_empty() {
        println!();
        match response.body.as_json() {
            Some(json) => println!(
                "{}",
                serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string())
            ),
            None => println!("{}", String::from_utf8_lossy(&response.body.to_bytes())),
        }
    }
}
