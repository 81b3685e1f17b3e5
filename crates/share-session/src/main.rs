//! ScreenShare session runner.
//!
//! Runs a complete two-endpoint session inside one process: a sharer that
//! streams a synthetic test pattern and a viewer that renders it and sends
//! pointer events back over the control data channel.
//!
//! # Usage
//!
//! ```text
//! share-session [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --signaling <MODE>     loopback | relay
//!   --relay-url <URL>      Signaling relay [default: ws://localhost:8080/]
//!   --duration <SECS>      Stop after this many seconds; 0 runs until Ctrl+C
//!   --log-level <FILTER>   tracing filter when RUST_LOG is unset
//! ```
//!
//! In `relay` mode both endpoints still live in this process, but every
//! negotiation payload makes a round trip through a running `share-relay`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use share_core::{EndpointId, PointerEvent, PointerKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use share_session::application::orchestrate::{
    LocalEndpointSpec, SessionAttachments, SessionOrchestrator, SessionRole, SessionSettings, SessionStatus,
};
use share_session::application::signaling::SignalingTransport;
use share_session::infrastructure::frame_source::synthetic::SyntheticFrameSource;
use share_session::infrastructure::loopback_media::LoopbackMediaTransport;
use share_session::infrastructure::signaling::{LoopbackSignalingHub, WebSocketSignaling};
use share_session::infrastructure::sinks::{RecordingInjector, RecordingRenderer};
use share_session::infrastructure::storage::config::{self, AppConfig, ConfigError, SignalingMode};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// ScreenShare two-endpoint session demo.
#[derive(Debug, Parser)]
#[command(name = "share-session", about = "Runs a loopback screen-share session", version)]
struct Cli {
    /// Path of the TOML config file.  Defaults to the platform config dir.
    #[arg(long, env = "SHARE_CONFIG")]
    config: Option<PathBuf>,

    /// How negotiation payloads travel; overrides the config file.
    #[arg(long, value_enum, env = "SHARE_SIGNALING")]
    signaling: Option<SignalingMode>,

    /// WebSocket URL of the signaling relay; overrides the config file.
    #[arg(long, env = "SHARE_RELAY_URL")]
    relay_url: Option<String>,

    /// Seconds to run before stopping.  `0` runs until Ctrl+C.
    #[arg(long, default_value_t = 10, env = "SHARE_DURATION")]
    duration: u64,

    /// Log filter used when `RUST_LOG` is unset; overrides the config file.
    #[arg(long, env = "SHARE_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies the CLI overrides.
    fn resolve_config(&self) -> Result<AppConfig, ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)?,
            None => match config::load_config() {
                Err(ConfigError::NoPlatformConfigDir) => AppConfig::default(),
                other => other?,
            },
        };
        if let Some(mode) = self.signaling {
            cfg.signaling.mode = mode;
        }
        if let Some(url) = &self.relay_url {
            cfg.signaling.relay_url = url.clone();
        }
        if let Some(level) = &self.log_level {
            cfg.session.log_level = level.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let resolved = cli.resolve_config();

    let fallback_level = resolved
        .as_ref()
        .map(|cfg| cfg.session.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level)))
        .init();

    let cfg = resolved.context("failed to load configuration")?;
    let sharer = cfg.session.local_id.clone();
    let viewer = cfg.session.peer_id.clone();
    info!(%sharer, %viewer, mode = ?cfg.signaling.mode, "ScreenShare session starting");

    // ── Collaborators ─────────────────────────────────────────────────────────
    let transport = Arc::new(LoopbackMediaTransport::with_candidate_count(cfg.transport.candidate_count));
    let (sig_sharer, sig_viewer) = connect_signaling(&cfg, &sharer, &viewer).await?;

    let renderer = Arc::new(RecordingRenderer::new());
    let injector = Arc::new(RecordingInjector::new());
    let attachments = SessionAttachments {
        frame_source: Some(Arc::new(SyntheticFrameSource::new())),
        renderer: Some(renderer.clone()),
        injector: Some(injector.clone()),
    };
    let settings = SessionSettings {
        data_channel_label: cfg.session.data_channel_label.clone(),
        video_track_id: cfg.session.video_track_id.clone(),
        capture: cfg.capture,
        bundle_policy: cfg.transport.bundle_policy,
    };

    let session = SessionOrchestrator::new(
        settings,
        transport,
        vec![
            (LocalEndpointSpec::new(sharer.clone(), SessionRole::Sharer, viewer.clone()), sig_sharer),
            (LocalEndpointSpec::new(viewer.clone(), SessionRole::Viewer, sharer), sig_viewer),
        ],
        attachments,
    )
    .await
    .context("failed to create session")?;
    session.start().context("failed to start session")?;

    // ── Viewer pointer traffic ────────────────────────────────────────────────
    let pointer_task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let input = match session.wait_input_channel(&viewer).await {
                Ok(input) => input,
                Err(e) => {
                    warn!("control channel never opened: {e}");
                    return;
                }
            };
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            for step in 0u32.. {
                tick.tick().await;
                let angle = f64::from(step) * 0.1;
                let kind = match step % 20 {
                    0 => PointerKind::Down,
                    1 => PointerKind::Up,
                    _ => PointerKind::Move,
                };
                let Ok(event) = PointerEvent::new(kind, 0.5 + 0.4 * angle.cos(), 0.5 + 0.4 * angle.sin()) else {
                    continue;
                };
                if let Err(e) = input.send_pointer(&event).await {
                    warn!("pointer event not sent: {e}");
                    return;
                }
            }
        })
    };

    // ── Run until Ctrl+C, the deadline, or a failure ──────────────────────────
    let mut status = session.subscribe_status();
    let deadline = async {
        if cli.duration == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(cli.duration)).await;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
            info!("received Ctrl+C, stopping");
        }
        _ = deadline => info!("run time elapsed, stopping"),
        _ = status.wait_for(|s| matches!(s, SessionStatus::Failed(_))) => {}
    }

    let final_status = session.status();
    pointer_task.abort();
    session.stop().await;

    info!(
        frames_rendered = renderer.frame_count(),
        pointer_events = injector.recorded().len(),
        pipeline = ?session.pipeline_stats(),
        "session summary"
    );

    if let SessionStatus::Failed(reason) = final_status {
        anyhow::bail!("session failed: {reason}");
    }
    Ok(())
}

/// Creates one signaling handle per endpoint.
async fn connect_signaling(
    cfg: &AppConfig,
    sharer: &EndpointId,
    viewer: &EndpointId,
) -> anyhow::Result<(Arc<dyn SignalingTransport>, Arc<dyn SignalingTransport>)> {
    match cfg.signaling.mode {
        SignalingMode::Loopback => {
            let hub = LoopbackSignalingHub::new();
            Ok((hub.register(sharer.clone()), hub.register(viewer.clone())))
        }
        SignalingMode::Relay => {
            let url = &cfg.signaling.relay_url;
            let a = WebSocketSignaling::connect(url, sharer.clone())
                .await
                .with_context(|| format!("failed to reach signaling relay at {url}"))?;
            let b = WebSocketSignaling::connect(url, viewer.clone())
                .await
                .with_context(|| format!("failed to reach signaling relay at {url}"))?;
            Ok((a, b))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
