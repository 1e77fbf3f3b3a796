//! Pair Client
//!
//! Runs two session coordinators against the in-process loopback hub and
//! walks them through one full session.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Register two clients with the hub and spawn their coordinators
//! 4. Assign identities and local streams
//! 5. Both request a connection, get matched and exchange streams
//! 6. Exchange `PAIR_DEMO_MESSAGES` chat lines each way
//! 7. One side skips to the next match; the other sees the peer leave
//! 8. Exit, or earlier on Ctrl+C / SIGTERM

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use common::types::ParticipantId;
use pair_client::actors::{
    SessionContext, SessionCoordinator, SessionCoordinatorHandle, SessionMetrics,
    SessionScreenState, SessionSnapshot,
};
use pair_client::config::Config;
use pair_client::loopback::LoopbackHub;
use pair_client::media::MediaHandle;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the demo waits for any single step.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

struct DemoClient {
    id: ParticipantId,
    handle: SessionCoordinatorHandle,
    metrics: Arc<SessionMetrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("pair_client={},pair={}", config.observability.log_level, config.observability.log_level)
            .into()
    });
    let (json_layer, text_layer) = if config.observability.json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    info!(
        call_initiation = ?config.call_initiation,
        search_timeout = ?config.search_timeout,
        call_timeout = ?config.call_timeout,
        demo_messages = config.demo_messages,
        "Configuration loaded successfully"
    );

    let hub = LoopbackHub::new();
    let shutdown_token = CancellationToken::new();

    let first = spawn_client(&hub, &config, &shutdown_token).await?;
    let second = spawn_client(&hub, &config, &shutdown_token).await?;

    tokio::select! {
        result = run_demo(&hub, &first, &second, config.demo_messages) => {
            if let Err(e) = &result {
                warn!(error = %e, "Demo session failed");
            }
            result?;
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    shutdown_token.cancel();
    for client in [&first, &second] {
        info!(
            id = %client.id,
            metrics = ?client.metrics.snapshot(),
            "Client stopped"
        );
    }
    info!("Pair client shutdown complete");
    Ok(())
}

async fn spawn_client(
    hub: &LoopbackHub,
    config: &Config,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<DemoClient> {
    let id = ParticipantId::random();
    let (endpoint, inbox) = hub.register(id.clone()).await;

    let context = SessionContext {
        signaling: endpoint.clone(),
        connector: endpoint,
    };
    let metrics = SessionMetrics::new();
    let (handle, _task) = SessionCoordinator::spawn(
        context,
        config,
        shutdown_token.child_token(),
        Arc::clone(&metrics),
    );
    inbox.forward_to(handle.clone(), shutdown_token.child_token());

    // The identity provider and the camera both come up asynchronously.
    handle.local_id_assigned(id.clone()).await?;
    handle
        .media_ready(MediaHandle::new(format!("camera:{id}")))
        .await?;

    info!(id = %id, "Client ready");
    Ok(DemoClient {
        id,
        handle,
        metrics,
    })
}

async fn run_demo(
    hub: &LoopbackHub,
    first: &DemoClient,
    second: &DemoClient,
    demo_messages: u32,
) -> anyhow::Result<()> {
    first.handle.request_connection().await?;
    second.handle.request_connection().await?;

    for client in [first, second] {
        let snapshot = wait_until(&client.handle, |s| s.players.len() == 2).await?;
        info!(
            id = %client.id,
            session_id = ?snapshot.session_id,
            remote_id = ?snapshot.remote_id,
            "Connected"
        );
    }

    for n in 0..demo_messages {
        first.handle.submit_chat(format!("hello #{n}")).await?;
        second.handle.submit_chat(format!("hi back #{n}")).await?;
    }

    let expected = usize::try_from(demo_messages)?.saturating_mul(2);
    for client in [first, second] {
        let snapshot = wait_until(&client.handle, |s| s.chat.len() == expected).await?;
        info!(id = %client.id, chat_lines = snapshot.chat.len(), "Chat exchanged");
    }

    // "next": the first client leaves, the second is told its peer left.
    first.handle.request_connection().await?;
    let snapshot = wait_until(&second.handle, |s| {
        s.screen_state == SessionScreenState::Init
    })
    .await?;
    info!(
        id = %second.id,
        last_failure = ?snapshot.last_failure.map(|f| f.as_str()),
        "Partner left"
    );
    info!(waiting = hub.waiting_len().await, "Demo session complete");

    Ok(())
}

async fn wait_until<F>(
    handle: &SessionCoordinatorHandle,
    predicate: F,
) -> anyhow::Result<SessionSnapshot>
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let poll = async {
        loop {
            let snapshot = handle.snapshot().await?;
            if predicate(&snapshot) {
                return Ok::<_, anyhow::Error>(snapshot);
            }
            if snapshot.screen_state == SessionScreenState::Init {
                if let Some(failure) = snapshot.last_failure {
                    bail!("session failed: {}", failure.client_message());
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    tokio::time::timeout(STEP_TIMEOUT, poll)
        .await
        .context("timed out waiting for the session")?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
