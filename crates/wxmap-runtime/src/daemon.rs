//! Daemon wiring: gateway -> view state, plus the UDS server and shutdown.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use wxmap_core::{LngLat, Message, celsius_to_fahrenheit};
use wxmap_gateway::{Gateway, GatewayStatus, MemoryNetwork, Transport, WsConfig, WsTransport};
use wxmap_markers::{DisplaySurface, MarkerStore};

use crate::cli::DaemonOpts;
use crate::demo;
use crate::server;
use crate::surface::TracingSurface;

/// Most recent reading, as shown in place of the loading state.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    #[serde(flatten)]
    pub message: Message,
    pub fahrenheit: f64,
    pub received_at: DateTime<Utc>,
}

/// Presentation state shared by the delivery tasks and the control socket.
pub struct ViewState {
    pub store: MarkerStore<TracingSurface>,
    pub latest: Option<Reading>,
    /// Messages applied since startup.
    pub received: u64,
    pub status: watch::Receiver<GatewayStatus>,
}

impl ViewState {
    pub fn new(max_markers: usize, status: watch::Receiver<GatewayStatus>) -> Self {
        Self {
            store: MarkerStore::with_capacity(TracingSurface::new(), max_markers),
            latest: None,
            received: 0,
            status,
        }
    }

    /// True until the first message arrives.
    pub fn is_loading(&self) -> bool {
        self.latest.is_none()
    }

    pub fn on_message(&mut self, msg: Message, now: DateTime<Utc>) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string_pretty(&msg) {
                Ok(pretty) => tracing::debug!("received message:\n{pretty}"),
                Err(e) => tracing::debug!("received unprintable message: {e}"),
            }
        }

        if self.is_loading() {
            self.store
                .surface_mut()
                .recenter(LngLat::new(msg.longitude, msg.latitude));
        }
        self.store.on_message(&msg);
        self.latest = Some(Reading {
            message: msg,
            fahrenheit: celsius_to_fahrenheit(msg.ambient_temp),
            received_at: now,
        });
        self.received += 1;
    }
}

/// View state as held by the daemon.
pub type SharedView = Arc<Mutex<ViewState>>;

/// Lock the view, recovering from a poisoned mutex.
///
/// The guard must not be held across an await.
pub(crate) fn lock_view(view: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run the daemon until ctrl-c, SIGTERM or server exit.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    // Claim the socket first so a second daemon starts nothing.
    let (listener, socket_file) = server::bind(socket_path).await?;

    let (transport, publisher) = build_transport(&opts)?;
    let gateway = Gateway::new(opts.topic.clone(), transport);
    let view_state = ViewState::new(opts.max_markers, gateway.status());
    let state: SharedView = Arc::new(Mutex::new(view_state));

    let mut server_handle = tokio::spawn(server::serve(listener, Arc::clone(&state)));

    // Each delivery applies under one lock, so the view never queues readings.
    let view = Arc::clone(&state);
    let started = gateway
        .start(move |msg| lock_view(&view).on_message(msg, Utc::now()))
        .await;
    let mut handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            server_handle.abort();
            if let Some(publisher) = publisher {
                publisher.abort();
            }
            return Err(e.into());
        }
    };

    let outcome = tokio::select! {
        () = shutdown_signal() => {
            server_handle.abort();
            Ok(())
        }
        joined = &mut server_handle => match joined {
            Ok(Ok(())) => Err(anyhow::anyhow!("control socket closed unexpectedly")),
            Ok(Err(e)) => Err(e.context("control socket failed")),
            Err(e) => Err(anyhow::anyhow!("control socket task failed: {e}")),
        },
    };

    handle.stop().await;
    if let Some(publisher) = publisher {
        publisher.abort();
    }
    {
        let mut st = lock_view(&state);
        let detached = st.store.teardown();
        tracing::info!(detached, received = st.received, "marker store torn down");
    }

    let socket = socket_file.path().display().to_string();
    drop(socket_file);
    match outcome {
        Ok(()) => tracing::info!(%socket, "daemon stopped"),
        Err(ref e) => tracing::error!(%socket, "daemon stopped: {e:#}"),
    }
    outcome
}

fn build_transport(
    opts: &DaemonOpts,
) -> anyhow::Result<(Arc<dyn Transport>, Option<JoinHandle<()>>)> {
    if opts.demo {
        let net = MemoryNetwork::new();
        net.create_topic(&opts.topic, opts.demo_partitions);
        let publisher = demo::spawn_publisher(
            net.clone(),
            opts.topic.clone(),
            opts.demo_partitions,
            Duration::from_millis(opts.demo_interval_ms),
        );
        tracing::info!(
            partitions = opts.demo_partitions,
            "demo mode: simulated readings on an in-process broker"
        );
        let transport: Arc<dyn Transport> = Arc::new(net);
        return Ok((transport, Some(publisher)));
    }

    let Some(ref url) = opts.ws_url else {
        anyhow::bail!("no broker configured: pass --ws-url or --demo");
    };
    let Some(partitions) = opts.partitions else {
        anyhow::bail!("--partitions is required with --ws-url");
    };
    tracing::info!(
        partitions,
        "broker has no partition discovery; partition count taken from --partitions"
    );
    let mut config = WsConfig::new(url.clone(), partitions);
    if let Some(ref key) = opts.api_key {
        config = config.with_api_key(key.clone());
    }
    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(config));
    Ok((transport, None))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
