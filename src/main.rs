use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tradegate::adapters::{start_api_server, PostgresStore};
use tradegate::api::ApiTokens;
use tradegate::cli::{Cli, Commands};
use tradegate::commission::LoggingLedger;
use tradegate::config::{AppConfig, LoggingConfig, SecretsConfig};
use tradegate::persistence::{MemoryStore, RecordStore, SettingsSource};
use tradegate::secrets::{hash_secret, SecretCipher, SecretString};
use tradegate::services::RotateSettings;
use tradegate::venue::{SimulatedVenue, VenueConnector};
use tradegate::{Components, Dependencies};

const DEFAULT_FILTER: &str = "info,tradegate=debug,sqlx=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenKey => println!("{}", SecretCipher::generate_key()),
        Commands::HashSecret { iterations } => {
            let iterations = iterations.unwrap_or(SecretsConfig::default().hash_iterations);
            let secret = prompt_secret("Password to hash: ")?;
            println!("{}", hash_secret(&secret, iterations));
        }
        command => run_with_gateway(&cli.config, command).await?,
    }
    Ok(())
}

async fn run_with_gateway(config_dir: &str, command: Commands) -> anyhow::Result<()> {
    let config = AppConfig::load_from(config_dir)
        .with_context(|| format!("loading configuration from {config_dir}"))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {e}");
        }
        bail!("invalid configuration ({} problems)", errors.len());
    }
    init_logging(&config.logging);

    let components = Components::assemble(&config, build_dependencies(&config).await?);

    match command {
        Commands::Serve { port } => {
            run_serve(&config, &components, port.unwrap_or(config.api.port)).await?;
        }
        Commands::SyncGroups => {
            let report = components.groups.sync_report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Rotate {
            address,
            login,
            name,
        } => {
            let secret = prompt_secret("Venue manager password: ")?;
            let row = components
                .rotator
                .rotate(RotateSettings {
                    server_address: address,
                    login,
                    secret,
                    display_name: name.unwrap_or_default(),
                })
                .await?;
            println!(
                "Stored settings #{} for {} ({})",
                row.id, row.server_address, row.display_name
            );
        }
        Commands::Balance { login } => {
            let summary = components.gateway.account_summary(login).await?;
            if !summary.found {
                warn!("Account {} not found on the venue", login);
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::GenKey | Commands::HashSecret { .. } => {}
    }

    // drop the venue session before the runtime goes away
    components.connections.invalidate_async().await?;
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.level.eq_ignore_ascii_case("info") {
            EnvFilter::new(DEFAULT_FILTER)
        } else {
            EnvFilter::new(format!("{},sqlx=warn", config.level))
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn prompt_secret(prompt: &str) -> anyhow::Result<SecretString> {
    let raw = rpassword::prompt_password(prompt).context("reading password")?;
    let secret = SecretString::from(raw);
    if secret.is_empty() {
        bail!("password must not be empty");
    }
    Ok(secret)
}

async fn build_dependencies(config: &AppConfig) -> anyhow::Result<Dependencies> {
    let store: Arc<dyn RecordStore>;
    let settings: Arc<dyn SettingsSource>;
    let mut database = None;
    if config.database.is_in_memory() {
        warn!("Using the in-memory store; nothing survives a restart");
        let memory = Arc::new(MemoryStore::new());
        store = memory.clone();
        settings = memory;
    } else {
        let postgres = Arc::new(
            PostgresStore::new(&config.database.url, config.database.max_connections)
                .await
                .context("connecting to PostgreSQL")?,
        );
        postgres.migrate().await.context("running migrations")?;
        store = postgres.clone();
        settings = postgres.clone();
        database = Some(postgres);
    }

    let connector: Arc<dyn VenueConnector> = if config.venue.simulated {
        warn!("Venue calls go to the in-process simulated venue");
        Arc::new(SimulatedVenue::with_demo_data().connector())
    } else {
        bail!("no venue connector is linked into this build; set venue.simulated = true");
    };

    let cipher = SecretCipher::from_env(&config.secrets.master_key_env).with_context(|| {
        format!(
            "loading the settings master key from ${}",
            config.secrets.master_key_env
        )
    })?;

    Ok(Dependencies {
        store,
        settings,
        database,
        connector,
        cipher: Arc::new(cipher),
        ledger: Arc::new(LoggingLedger),
    })
}

async fn run_serve(config: &AppConfig, components: &Components, port: u16) -> anyhow::Result<()> {
    let tokens = ApiTokens::from_env(&config.api);
    if tokens.admin.is_none() {
        warn!(
            "${} is not set; admin endpoints will refuse every request",
            config.api.admin_token_env
        );
    }
    if tokens.webhook.is_none() {
        warn!(
            "${} is not set; the commission webhook will refuse every request",
            config.api.webhook_token_env
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = match components.group_sync_service(config) {
        Some(service) => {
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move { service.run(rx).await }))
        }
        None => {
            info!("Periodic group sync disabled");
            None
        }
    };

    let server_shutdown = {
        let tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            let _ = tx.send(true);
        }
    };

    let state = components.app_state(tokens);
    let served = start_api_server(state, port, server_shutdown).await;
    if let Err(e) = &served {
        error!("API server failed: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            warn!("Group sync task ended abnormally: {}", e);
        }
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
