//! Telecall hub binary entry point
//!
//! Runs the WebSocket signaling hub and the HTTP read API in one process.
//!
//! # Usage
//!
//! ```bash
//! # Minimal: STUN only, no relay
//! telecall-hub --jwt-secret <secret>
//!
//! # With TURN relay credentials
//! telecall-hub \
//!   --jwt-secret <secret> \
//!   --turn-servers turn:relay1.example.org:3478,turn:relay2.example.org:3478 \
//!   --turn-secret <shared-secret>
//! ```

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telecall::api::{build_router, ApiState};
use telecall::auth::JwtVerifier;
use telecall::hub::{HubServer, SessionRegistry};
use telecall::ice::IceProvider;
use telecall::monitor::FaultClassifier;
use telecall::store::MemoryStore;
use telecall::CoreConfig;

/// Telecall signaling hub
///
/// Relays offer/answer/candidate traffic between the two parties of a call,
/// persists the negotiation audit log and chat archive, and serves ICE
/// descriptors with generated relay credentials.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling bind address
    #[arg(long, default_value = "0.0.0.0:8443", env = "TELECALL_HUB_ADDR")]
    hub_addr: String,

    /// HTTP API bind address
    #[arg(long, default_value = "0.0.0.0:8080", env = "TELECALL_API_ADDR")]
    api_addr: String,

    /// HS256 secret for identity token validation
    #[arg(long, env = "TELECALL_JWT_SECRET")]
    jwt_secret: String,

    /// Reflection (STUN) server URLs (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "TELECALL_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// Relay (TURN) server URLs (comma-separated)
    #[arg(long, value_delimiter = ',', env = "TELECALL_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Shared secret for generated relay credentials
    #[arg(long, default_value = "", env = "TELECALL_TURN_SECRET")]
    turn_secret: String,

    /// Idle age in seconds after which open sessions are reaped
    #[arg(long, default_value_t = 4 * 3600, env = "TELECALL_SESSION_IDLE_SECS")]
    session_idle_secs: u64,

    /// Maximum chat body length in characters
    #[arg(long, default_value_t = 1000, env = "TELECALL_MAX_CHAT_CHARS")]
    max_chat_chars: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // First Ctrl+C starts graceful shutdown, second one forces exit
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            std::process::exit(0);
        }
        eprintln!("shutdown requested, press Ctrl+C again to force");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("telecall-hub")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hub_addr = %args.hub_addr,
        api_addr = %args.api_addr,
        "telecall hub starting"
    );

    let mut config = CoreConfig::default();
    config.hub_bind_addr = args.hub_addr;
    config.api_bind_addr = args.api_addr;
    config.ice.stun_urls = args.stun_servers;
    config.ice.turn_urls = args.turn_servers;
    config.ice.shared_secret = args.turn_secret;
    config.hub.session_idle_secs = args.session_idle_secs;
    config.hub.max_chat_body_chars = args.max_chat_chars;
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    let verifier = Arc::new(JwtVerifier::new(args.jwt_secret));
    let faults = Arc::new(FaultClassifier::new());

    // ICE provider: initial credential rotation must succeed before serving
    let ice = IceProvider::new(config.ice.clone());
    ice.set_fault_sink(Arc::clone(&faults));
    ice.rotate()?;
    ice.force_health_check().await;
    let rotation_handle = ice.spawn_rotation();
    let health_handle = ice.spawn_health_checks();

    let registry = Arc::new(SessionRegistry::new(
        store.clone(),
        store.clone(),
        Arc::clone(&ice),
        config.hub.clone(),
    ));
    let reaper_handle = registry.spawn_reaper();

    // WebSocket signaling hub
    let hub_listener = TcpListener::bind(&config.hub_bind_addr).await?;
    let hub = Arc::new(HubServer::new(Arc::clone(&registry), verifier.clone()));
    let hub_handle = tokio::spawn(async move {
        if let Err(e) = hub.run(hub_listener).await {
            error!("signaling hub exited: {}", e);
        }
    });

    // HTTP read API
    let state = ApiState {
        sessions: store.clone(),
        messages: store,
        ice,
        faults,
        metrics: registry.metrics(),
        verifier,
    };
    let router = build_router(state);
    let api_listener = TcpListener::bind(&config.api_bind_addr).await?;
    info!(addr = %config.api_bind_addr, "http api listening");

    let shutdown = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };
    axum::serve(api_listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    warn!("shutting down background tasks");
    hub_handle.abort();
    reaper_handle.abort();
    rotation_handle.abort();
    health_handle.abort();

    info!("telecall hub shutdown complete");
    Ok(())
}
