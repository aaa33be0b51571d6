mod azure;
mod config;
mod error;
mod gateway;
mod mirror;
mod notifier;
mod server;
#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use azure::{ClientSecretCredential, SupportClient, TokenCache};
use config::{Config, Credentials, LogConfig};
use gateway::SupportGateway;
use mirror::{Mirror, NoopMirror, SqliteMirror};
use notifier::Notifier;
use server::AppState;

#[derive(Parser, Debug)]
#[command(name = "casegate")]
#[command(about = "Caching gateway for cloud support tickets with realtime updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/casegate/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on, overriding the config file
  #[arg(short, long)]
  bind: Option<String>,

  /// Run without the local mirror
  #[arg(long)]
  no_mirror: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _ = dotenvy::dotenv();

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(bind) = args.bind {
    config.server.bind = bind;
  }
  if args.no_mirror {
    config.mirror.enabled = false;
  }

  let _log_guard = init_tracing(&config.log);

  let credentials = Credentials::from_env()?;
  let tenant_id = credentials.tenant_id.clone();

  let provider = ClientSecretCredential::new(&config.auth, credentials, config.upstream.timeout())?;
  let tokens = Arc::new(TokenCache::new(
    Arc::new(provider),
    config.auth.safety_margin(),
  ));

  let mirror = open_mirror(&config)?;
  let client = SupportClient::new(&config.upstream, tokens, tenant_id, mirror.clone())?;
  let gateway = SupportGateway::new(client, mirror, Arc::new(Notifier::new()), config.fallback);

  let app = server::router(Arc::new(AppState { gateway }));

  let listener = tokio::net::TcpListener::bind(&config.server.bind)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.server.bind, e))?;
  tracing::info!(
    bind = %config.server.bind,
    upstream = %config.upstream.base_url,
    fallback = ?config.fallback,
    "casegate listening"
  );

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      tracing::info!("shutting down");
    })
    .await?;

  Ok(())
}

/// Console logging plus an optional daily-rolling file.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    EnvFilter::new(
      config
        .filter
        .as_deref()
        .unwrap_or("casegate=info,tower_http=info"),
    )
  });

  let (file_layer, guard) = match &config.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "casegate.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer())
    .with(file_layer)
    .init();

  guard
}

fn open_mirror(config: &Config) -> Result<Mirror> {
  if !config.mirror.enabled {
    tracing::info!("mirror disabled");
    return Ok(Mirror::new(NoopMirror));
  }

  let path = config.mirror.resolved_path()?;
  let store = SqliteMirror::open(&path)?;
  tracing::info!(path = %path.display(), "mirror opened");
  Ok(Mirror::new(store))
}
