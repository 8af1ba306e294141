use clap::Parser;
use guidewise::adapters::SqliteStore;
use guidewise::api::auth::{sign_token, Claims};
use guidewise::core::maintenance;
use guidewise::utils::error::ErrorSeverity;
use guidewise::utils::{logger, validation::Validate};
use guidewise::{AppError, CliConfig, Command, TomlConfig};

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI args: {:?}", cli);

    if let Err(e) = run(cli).await {
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn load_config(path: &str) -> Result<TomlConfig, AppError> {
    tracing::info!("📋 Loading configuration from {}", path);
    TomlConfig::from_file(path)
}

async fn run(cli: CliConfig) -> Result<(), AppError> {
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve { port, database } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(database) = database {
                config.database.path = database;
            }
            config.validate()?;
            guidewise::serve(config).await
        }
        Command::CheckConfig => {
            config.validate()?;
            println!("✅ Configuration is valid");
            println!("🌐 Bind address: {}", config.bind_address());
            println!("🗄️ Database: {}", config.database.path);
            println!("🤖 OpenAI: {}", enabled(config.openai.is_some()));
            println!("📍 Google Places: {}", enabled(config.google.is_some()));
            println!("💳 Stripe: {}", enabled(config.stripe.is_some()));
            let (program, args) = config.pdf_program();
            println!("📄 PDF renderer: {} {}", program, args.join(" "));
            Ok(())
        }
        Command::Cleanup { days } => {
            config.validate()?;
            let store = SqliteStore::open(&config.database.path)?;
            let days = days.unwrap_or_else(|| config.stale_draft_days());
            let report = maintenance::purge_stale_drafts(&store, days)?;
            println!(
                "🧹 Removed {} guidebooks, {} hosts, {} properties",
                report.guidebooks, report.hosts, report.properties
            );
            Ok(())
        }
        Command::DevToken {
            user_id,
            email,
            hours,
        } => {
            let claims = Claims {
                sub: user_id,
                email,
                exp: chrono::Utc::now().timestamp() + hours.max(1) * 3600,
                aud: config.auth.audience.clone(),
            };
            println!("{}", sign_token(&config.auth.jwt_secret, &claims)?);
            Ok(())
        }
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "not configured"
    }
}
