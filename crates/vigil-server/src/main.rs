// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_server::config::SystemConfig;
use vigil_server::coordinator::Coordinator;
use vigil_server::forge::{Forge, GithubForge};
use vigil_server::http::{build_router, AppState};
use vigil_server::index::OwnershipIndex;
use vigil_server::notify::{CommentSender, Notifier, Sender, SlackSender};
use vigil_server::provider::{DatadogProvider, Provider};
use vigil_server::vcs::{GitAuth, GitWorkspace, Vcs};
use vigil_server::version::Version;

#[derive(Parser, Debug)]
#[command(name = "vigil-server", version, about = "Reconciles monitoring artifacts with a git repository")]
struct ServerArgs {
    /// Load and validate the environment configuration, then exit.
    #[arg(long, default_value_t = false)]
    validate_config: bool,
    /// Print the build version, then exit.
    #[arg(long, default_value_t = false)]
    print_version: bool,
}

fn init_tracing(cfg: &SystemConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg.logging_level.is_empty() {
            EnvFilter::new("info")
        } else {
            EnvFilter::new(cfg.logging_level.clone())
        }
    });
    if cfg.logging_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), String> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|err| format!("failed to register SIGTERM handler: {err}"))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|err| format!("failed to register SIGINT handler: {err}"))?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| format!("failed to register ctrl-c handler: {err}"))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = ServerArgs::parse();

    let version = Version::from_build_env();
    if args.print_version {
        match &version {
            Some(version) => println!("{version}"),
            None => println!("version unset"),
        }
        return Ok(());
    }

    let cfg = SystemConfig::from_env().map_err(|err| format!("unable to initialize config: {err}"))?;
    init_tracing(&cfg)?;
    if version.is_none() {
        error!("version was not set, inject VIGIL_BUILD_SHA and VIGIL_BUILD_TIME at build time");
    }
    if args.validate_config {
        info!("configuration validated");
        return Ok(());
    }

    let checkout = std::env::temp_dir().join(format!("vigil-checkout-{}", std::process::id()));
    let auth = GitAuth {
        ssh_key_pem: cfg.github_private_key_pem.clone(),
        user: cfg.git_user().to_string(),
        email: cfg.git_email(),
        ignore_known_hosts: cfg.ignore_known_hosts,
    };
    let vcs: Arc<dyn Vcs> = Arc::new(
        GitWorkspace::clone(&cfg.git_url(), checkout, auth)
            .map_err(|err| format!("unable to clone the tracked repository: {err}"))?,
    );

    let index = Arc::new(OwnershipIndex::new(Arc::clone(&vcs), cfg.manifest_base_path()));
    index
        .reload()
        .map_err(|err| format!("unable to load the ownership index: {err}"))?;

    let provider: Arc<dyn Provider> = Arc::new(
        DatadogProvider::new(cfg.datadog_api_key.clone(), cfg.datadog_app_key.clone())
            .map_err(|err| format!("unable to configure the provider client: {err}"))?,
    );
    let forge: Arc<dyn Forge> = Arc::new(
        GithubForge::new(
            cfg.github_api_url(),
            cfg.github_owner.clone(),
            cfg.github_repo.clone(),
            cfg.github_integration_id,
            cfg.github_installation_id,
            cfg.github_private_key_pem.as_bytes(),
        )
        .map_err(|err| format!("unable to configure the forge client: {err}"))?,
    );

    let cancel = CancellationToken::new();
    let mut senders: Vec<Arc<dyn Sender>> = vec![Arc::new(CommentSender::new(
        Arc::clone(&forge),
        3,
        Duration::from_secs(5),
    ))];
    if !cfg.slack_token.is_empty() {
        let slack = SlackSender::spawn(cfg.slack_token.clone(), cancel.clone())
            .map_err(|err| format!("unable to start the chat sink: {err}"))?;
        senders.push(slack);
    }
    let notifier = Notifier::new(senders);

    let cfg = Arc::new(cfg);
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&cfg),
        provider,
        vcs,
        forge,
        index,
        notifier,
    ));

    {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator.run(cancel).await;
        });
    }

    let state = AppState {
        coordinator,
        webhook_secret: cfg.github_webhook_secret.clone(),
        http_secret: cfg.http_secret.clone(),
        version,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("unable to bind {addr}: {err}"))?;
    info!(%addr, "starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = wait_for_shutdown_signal().await {
                warn!(%err, "shutdown signal handler failed");
            }
            cancel.cancel();
        })
        .await
        .map_err(|err| format!("server failed: {err}"))
}
