//! UDS JSON-RPC control socket for the daemon.
//! Connection-per-request, newline-delimited JSON.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::daemon::{SharedView, ViewState, lock_view};

/// Socket file bound by this process. Removed on drop.
#[derive(Debug)]
pub struct SocketFile(PathBuf);

impl SocketFile {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!(path = %self.0.display(), "removed socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.0.display(), "cannot remove socket: {e}"),
        }
    }
}

/// Claim `socket_path` for this daemon.
///
/// A socket left behind by a dead daemon is replaced. A socket that still
/// accepts connections belongs to a live daemon and is left untouched.
pub async fn bind(socket_path: &str) -> anyhow::Result<(UnixListener, SocketFile)> {
    let path = Path::new(socket_path);
    let socket_dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path {socket_path}"))?;
    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
        std::fs::remove_file(path)?;
        tracing::info!("removed stale socket at {socket_path}");
    }

    let listener = UnixListener::bind(path)?;
    let file = SocketFile(path.to_path_buf());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("control socket listening on {socket_path}");
    Ok((listener, file))
}

/// Accept connections until the listener fails.
pub async fn serve(listener: UnixListener, state: SharedView) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

fn rpc_error(code: i64, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "code": code, "message": message.into() })
}

async fn handle_connection(stream: UnixStream, state: SharedView) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<serde_json::Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("");
            let id = &request["id"];
            match dispatch(&state, method, &request["params"]) {
                Ok(result) => serde_json::json!({"jsonrpc": "2.0", "result": result, "id": id}),
                Err(error) => serde_json::json!({"jsonrpc": "2.0", "error": error, "id": id}),
            }
        }
        Err(e) => serde_json::json!({
            "jsonrpc": "2.0",
            "error": rpc_error(PARSE_ERROR, format!("parse error: {e}")),
            "id": null,
        }),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// Answer one request. `Err` carries a JSON-RPC error object.
///
/// The view lock is taken and released inside each arm.
pub(crate) fn dispatch(
    state: &Mutex<ViewState>,
    method: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, serde_json::Value> {
    match method {
        "latest" => Ok(build_latest(&lock_view(state))),
        "list_markers" => {
            let limit = params["limit"]
                .as_u64()
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX));
            Ok(build_marker_list(&lock_view(state), limit))
        }
        "gateway_status" => {
            let status = lock_view(state).status.borrow().clone();
            serde_json::to_value(status).map_err(|e| rpc_error(INTERNAL_ERROR, e.to_string()))
        }
        _ => Err(rpc_error(METHOD_NOT_FOUND, "method not found")),
    }
}

/// Loading flag plus the most recent reading and viewport.
pub(crate) fn build_latest(state: &ViewState) -> serde_json::Value {
    let viewport = state.store.surface().viewport().map(|v| {
        serde_json::json!({
            "lng": v.center.lng,
            "lat": v.center.lat,
            "zoom": v.zoom,
        })
    });
    serde_json::json!({
        "loading": state.is_loading(),
        "reading": state.latest,
        "received": state.received,
        "viewport": viewport,
    })
}

/// Retained markers, oldest first. `limit` keeps only the newest N.
pub(crate) fn build_marker_list(state: &ViewState, limit: Option<usize>) -> serde_json::Value {
    let store = &state.store;
    let skip = limit.map_or(0, |n| store.len().saturating_sub(n));
    let markers: Vec<serde_json::Value> = store
        .markers()
        .skip(skip)
        .map(|m| {
            serde_json::json!({
                "id": m.id.to_string(),
                "lng": m.position.lng,
                "lat": m.position.lat,
                "title": m.label.title,
                "lines": m.label.lines(),
            })
        })
        .collect();

    serde_json::json!({
        "count": store.len(),
        "capacity": store.capacity(),
        "evicted_total": store.evicted_total(),
        "attached": store.surface().attached(),
        "markers": markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::rpc_call;
    use crate::daemon::tests::idle_status;
    use chrono::Utc;
    use wxmap_core::Message;

    fn state_with(readings: &[(f64, f64, f64)], cap: usize) -> ViewState {
        let mut st = ViewState::new(cap, idle_status());
        for &(t, lat, lon) in readings {
            st.on_message(Message::new(t, lat, lon), Utc::now());
        }
        st
    }

    // ── 1. Result builders ───────────────────────────────────────────

    #[test]
    fn latest_while_loading() {
        let st = state_with(&[], 10);
        let v = build_latest(&st);
        assert_eq!(v["loading"], true);
        assert!(v["reading"].is_null());
        assert!(v["viewport"].is_null());
    }

    #[test]
    fn latest_after_readings() {
        let st = state_with(&[(10.0, 1.0, 2.0), (25.0, 3.0, 4.0)], 10);
        let v = build_latest(&st);
        assert_eq!(v["loading"], false);
        assert_eq!(v["received"], 2);
        assert_eq!(v["reading"]["ambientTemp"], 25.0);
        assert_eq!(v["reading"]["latitude"], 3.0);
        assert_eq!(v["reading"]["fahrenheit"], 77.0);
        assert!(v["reading"]["received_at"].is_string());
        // Viewport stays where the first reading put it.
        assert_eq!(v["viewport"]["lng"], 2.0);
        assert_eq!(v["viewport"]["zoom"], 2);
    }

    #[test]
    fn marker_list_is_oldest_first() {
        let st = state_with(&[(1.0, 0.0, 0.0), (2.0, 0.0, 0.0), (3.0, 0.0, 0.0)], 2);
        let v = build_marker_list(&st, None);
        assert_eq!(v["count"], 2);
        assert_eq!(v["capacity"], 2);
        assert_eq!(v["evicted_total"], 1);
        assert_eq!(v["attached"], 2);
        let ids: Vec<&str> = v["markers"]
            .as_array()
            .expect("array")
            .iter()
            .map(|m| m["id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, vec!["m2", "m3"]);
        assert_eq!(v["markers"][0]["title"], "Weather Data");
        assert_eq!(v["markers"][0]["lines"][0], "Temperature: 2°C / 35.60°F");
    }

    #[test]
    fn marker_list_limit_keeps_newest() {
        let st = state_with(&[(1.0, 0.0, 0.0), (2.0, 0.0, 0.0), (3.0, 0.0, 0.0)], 10);
        let v = build_marker_list(&st, Some(1));
        let markers = v["markers"].as_array().expect("array");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0]["id"], "m3");
        assert_eq!(v["count"], 3);
    }

    #[test]
    fn dispatch_routes_methods() {
        let state = Mutex::new(state_with(&[(1.0, 0.0, 0.0), (2.0, 0.0, 0.0)], 10));
        let list = dispatch(&state, "list_markers", &serde_json::json!({"limit": 1}))
            .expect("list_markers");
        assert_eq!(list["markers"].as_array().expect("array").len(), 1);

        let status = dispatch(&state, "gateway_status", &serde_json::Value::Null)
            .expect("gateway_status");
        assert_eq!(status["errors"], 0);

        let err = dispatch(&state, "list_panes", &serde_json::Value::Null)
            .expect_err("unknown method");
        assert_eq!(err["code"], METHOD_NOT_FOUND);
    }

    // ── 2. Socket round trip ─────────────────────────────────────────

    async fn serve_in(st: ViewState) -> (tempfile::TempDir, String, SocketFile) {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("wxmap").join("test.sock");
        let socket = socket.to_string_lossy().into_owned();
        let (listener, file) = bind(&socket).await.expect("bind");
        let state = Arc::new(Mutex::new(st));
        tokio::spawn(serve(listener, state));
        (dir, socket, file)
    }

    #[tokio::test]
    async fn serves_each_method() {
        let (_dir, socket, _file) = serve_in(state_with(&[(5.0, 1.0, 2.0)], 10)).await;

        let latest = rpc_call(&socket, "latest", serde_json::json!({}))
            .await
            .expect("latest");
        assert_eq!(latest["reading"]["ambientTemp"], 5.0);

        let markers = rpc_call(&socket, "list_markers", serde_json::json!({"limit": 5}))
            .await
            .expect("list_markers");
        assert_eq!(markers["count"], 1);

        let status = rpc_call(&socket, "gateway_status", serde_json::json!({}))
            .await
            .expect("gateway_status");
        assert_eq!(status["state"]["state"], "uninitialized");
        assert_eq!(status["errors"], 0);
    }

    #[tokio::test]
    async fn unknown_method_is_rpc_error() {
        let (_dir, socket, _file) = serve_in(state_with(&[], 10)).await;
        let err = rpc_call(&socket, "list_panes", serde_json::json!({}))
            .await
            .expect_err("unknown method");
        assert!(err.to_string().contains("method not found"));
    }

    #[tokio::test]
    async fn malformed_request_gets_parse_error() {
        let (_dir, socket, _file) = serve_in(state_with(&[], 10)).await;
        let stream = UnixStream::connect(&socket).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"not json\n").await.expect("write");
        writer.shutdown().await.expect("shutdown");

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.expect("read");
        let response: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
        assert_eq!(response["error"]["code"], PARSE_ERROR);
        assert!(response["id"].is_null());
    }

    // ── 3. Socket ownership ──────────────────────────────────────────

    #[tokio::test]
    async fn live_socket_is_not_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("live.sock");
        let _other = UnixListener::bind(&socket).expect("bind other daemon");

        let err = bind(&socket.to_string_lossy())
            .await
            .expect_err("second bind");
        assert!(err.to_string().contains("already running"));
        assert!(socket.exists());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("stale.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).expect("bind"));
        assert!(socket.exists());

        let (_listener, file) = bind(&socket.to_string_lossy()).await.expect("rebind");
        assert_eq!(file.path(), socket.as_path());
    }

    #[tokio::test]
    async fn dropping_socket_file_removes_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("owned.sock");
        let (listener, file) = bind(&socket.to_string_lossy()).await.expect("bind");
        drop(listener);
        assert!(socket.exists());

        drop(file);
        assert!(!socket.exists());
    }
}
