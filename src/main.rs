use clap::Parser;
use std::sync::Arc;

use audit_context::config::AppConfig;
use audit_context::logging::init_logging;
use audit_context::session::NoopObserver;
use audit_context::startup::build_session_factory;
use audit_context::utils::redact_connection_url;

#[derive(Parser, Debug)]
#[command(name = "audit-context")]
#[command(about = "Check that an audited persistence database is reachable")]
struct Args {
    /// Configuration file path (default: config.yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log record payloads and the unredacted address (never in production)
    #[arg(long)]
    sensitive_logging: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration from specified file or use defaults
    let mut app_config =
        if args.config == "config.yaml" && !std::path::Path::new("config.yaml").exists() {
            println!("⚠️  No config.yaml found, using default configuration:");
            println!("   - In-memory SQLite database\n");
            AppConfig::default_config()
        } else {
            AppConfig::load_from_file(&args.config)
                .map_err(|e| format!("Failed to load configuration: {}", e))?
        };

    if args.sensitive_logging {
        app_config.database.sensitive_data_logging = true;
    }

    init_logging(&app_config.logging);

    let shown_url = if app_config.database.sensitive_data_logging {
        app_config.database.url.clone()
    } else {
        redact_connection_url(&app_config.database.url)
    };
    println!("🔧 Configuration loaded:");
    println!("   Database: {} ({})", app_config.database.db_type, shown_url);
    println!(
        "   Retry: up to {} times, {}ms base delay",
        app_config.database.retry.max_retries, app_config.database.retry.base_delay_ms
    );

    let factory = build_session_factory(&app_config, Arc::new(NoopObserver)).await?;

    factory.health_check().await?;
    let mut session = factory.create().await?;
    let summary = session.commit().await?;
    session.close();

    println!(
        "✅ {} database reachable, session opened and committed ({} change(s))",
        factory.database_type().as_str(),
        summary.total()
    );

    factory.close().await;
    Ok(())
}
