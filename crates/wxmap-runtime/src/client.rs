//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::{MarkersOpts, OutputOpts};

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `wxmap latest`: the most recent reading, or the loading state.
pub async fn cmd_latest(socket_path: &str, opts: &OutputOpts) -> anyhow::Result<()> {
    let latest = rpc_call(socket_path, "latest", serde_json::json!({})).await?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&latest)?);
    } else {
        println!("{}", format_latest(&latest));
    }
    Ok(())
}

/// `wxmap markers`: retained markers, oldest first.
pub async fn cmd_markers(socket_path: &str, opts: &MarkersOpts) -> anyhow::Result<()> {
    let params = match opts.limit {
        Some(n) => serde_json::json!({ "limit": n }),
        None => serde_json::json!({}),
    };
    let list = rpc_call(socket_path, "list_markers", params).await?;
    if opts.output.json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        print!("{}", format_markers(&list));
    }
    Ok(())
}

/// `wxmap status`: gateway lifecycle and error counters.
pub async fn cmd_status(socket_path: &str, opts: &OutputOpts) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "gateway_status", serde_json::json!({})).await?;
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", format_status(&status));
    }
    Ok(())
}

pub(crate) fn format_latest(latest: &serde_json::Value) -> String {
    if latest["loading"].as_bool().unwrap_or(true) {
        return "Loading...".to_string();
    }
    let reading = &latest["reading"];
    let fahrenheit = reading["fahrenheit"].as_f64().unwrap_or(f64::NAN);
    format!(
        "Latest Temperature: {}°C / {fahrenheit:.2}°F\nLatitude: {}\nLongitude: {}",
        reading["ambientTemp"], reading["latitude"], reading["longitude"],
    )
}

pub(crate) fn format_markers(list: &serde_json::Value) -> String {
    let mut out = String::new();
    if let Some(markers) = list["markers"].as_array() {
        for m in markers {
            let lines: Vec<&str> = m["lines"]
                .as_array()
                .map(|l| l.iter().filter_map(|s| s.as_str()).collect())
                .unwrap_or_default();
            out.push_str(&format!(
                "{:<6} {}\n",
                m["id"].as_str().unwrap_or("?"),
                lines.join("  ")
            ));
        }
    }
    out.push_str(&format!(
        "{} of {} markers ({} evicted)\n",
        list["count"], list["capacity"], list["evicted_total"]
    ));
    out
}

pub(crate) fn format_status(status: &serde_json::Value) -> String {
    let state = &status["state"];
    let mut line = format!(
        "{} {}",
        status["topic"].as_str().unwrap_or("?"),
        state["state"].as_str().unwrap_or("unknown")
    );
    if let (Some(open), Some(total)) = (state["open"].as_u64(), state["partitions"].as_u64()) {
        line.push_str(&format!(" {open}/{total} partitions open"));
    } else if let Some(total) = state["partitions"].as_u64() {
        line.push_str(&format!(" {total} partitions"));
    }
    if let Some(client) = status["client"].as_str() {
        line.push_str(&format!(" client={client}"));
    }
    let errors = status["errors"].as_u64().unwrap_or(0);
    if errors > 0 {
        line.push_str(&format!(" errors={errors}"));
        if let Some(last) = status["last_error"].as_str() {
            line.push_str(&format!(" last_error={last:?}"));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_latest_loading() {
        let v = serde_json::json!({"loading": true, "reading": null});
        assert_eq!(format_latest(&v), "Loading...");
    }

    #[test]
    fn format_latest_reading() {
        let v = serde_json::json!({
            "loading": false,
            "reading": {"ambientTemp": 21.5, "latitude": 52.52, "longitude": 13.405, "fahrenheit": 70.7},
        });
        assert_eq!(
            format_latest(&v),
            "Latest Temperature: 21.5°C / 70.70°F\nLatitude: 52.52\nLongitude: 13.405"
        );
    }

    #[test]
    fn format_markers_lists_and_summarises() {
        let v = serde_json::json!({
            "count": 1,
            "capacity": 100,
            "evicted_total": 4,
            "markers": [{"id": "m5", "lines": ["Temperature: 1°C / 33.80°F", "Latitude: 0", "Longitude: 0"]}],
        });
        let out = format_markers(&v);
        assert!(out.starts_with("m5     Temperature: 1°C / 33.80°F  Latitude: 0"));
        assert!(out.ends_with("1 of 100 markers (4 evicted)\n"));
    }

    #[test]
    fn format_status_subscribed_with_errors() {
        let v = serde_json::json!({
            "state": {"state": "subscribed", "partitions": 3, "open": 2},
            "topic": "t/weather",
            "client": "ab12",
            "errors": 1,
            "last_error": "subscribe to partition 1 failed",
        });
        let line = format_status(&v);
        assert!(line.starts_with("t/weather subscribed 2/3 partitions open client=ab12"));
        assert!(line.contains("errors=1"));
    }

    #[test]
    fn format_status_healthy_omits_errors() {
        let v = serde_json::json!({
            "state": {"state": "resolved", "partitions": 2},
            "topic": "t",
            "client": null,
            "errors": 0,
        });
        assert_eq!(format_status(&v), "t resolved 2 partitions");
    }
}
