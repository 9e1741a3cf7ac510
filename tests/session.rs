use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use gcs_link::settings::{FileSettings, SettingsStore, ENDPOINT_KEY};
use gcs_link::{EndpointChange, GcsLink, LinkOptions, LinkState, Store};

const WAIT: Duration = Duration::from_secs(5);

async fn serve_one(listener: &TcpListener) -> Result<WebSocketStream<TcpStream>> {
    let (tcp, _) = timeout(WAIT, listener.accept()).await??;
    Ok(accept_async(tcp).await?)
}

async fn next_command(ws: &mut WebSocketStream<TcpStream>) -> Result<Value> {
    loop {
        match timeout(WAIT, ws.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => bail!("client went away"),
        }
    }
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() > deadline {
            bail!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn session_lifecycle_against_a_local_backend() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings_path = dir.path().join("settings.json");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}", listener.local_addr()?);

    let store = Store::default();
    let link = GcsLink::new(
        store.clone(),
        Arc::new(FileSettings::new(&settings_path)),
        LinkOptions {
            reconnect_interval: Duration::from_millis(100),
            endpoint_change_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
        },
        &endpoint,
    );
    link.connect()?;

    // Opening the session announces the vehicle.
    let mut ws = serve_one(&listener).await?;
    assert_eq!(next_command(&mut ws).await?["type"], "CMD_CONNECT_VEHICLE");
    wait_for("connected", || link.is_connected()).await?;

    // Binary frames decode like text; garbage is skipped.
    let nav = r#"{"type":"DATA_NAV","payload":{"position":{"lat":45.75,"lon":126.63,"rel_alt":12}}}"#;
    ws.send(Message::Binary(nav.as_bytes().to_vec())).await?;
    ws.send(Message::Text("definitely not json".to_string())).await?;
    ws.send(Message::Text(
        r#"{"type":"DATA_LOG","payload":{"text":"armed","level":"INFO"}}"#.to_string(),
    ))
    .await?;

    wait_for("log entry", || store.logs().map(|l| l.len() == 1).unwrap_or(false)).await?;
    let vehicle = store.vehicle()?;
    assert_eq!(vehicle.position.lat, 45.75);
    assert_eq!(vehicle.trajectory.len(), 1);
    assert!(link.is_connected());

    // Commands go out as enveloped JSON.
    assert!(link.set_relay(true));
    let relay = next_command(&mut ws).await?;
    assert_eq!(relay["type"], "CMD_SET_RELAY");
    assert_eq!(relay["payload"]["state"], 1);

    // Backend drops us; the link retries and comes back.
    ws.close(None).await?;
    drop(ws);
    wait_for("link down", || !link.is_connected()).await?;

    let mut ws = serve_one(&listener).await?;
    assert_eq!(next_command(&mut ws).await?["type"], "CMD_CONNECT_VEHICLE");
    wait_for("reconnected", || link.is_connected()).await?;

    // Switching backends persists the address and dials the new one.
    let second = TcpListener::bind("127.0.0.1:0").await?;
    let second_endpoint = format!("ws://{}", second.local_addr()?);
    let change = link.change_endpoint(&second_endpoint, |_| true).await?;
    assert_eq!(change, EndpointChange::Switched);

    // The old backend sees its socket closed.
    assert!(matches!(
        timeout(WAIT, ws.next()).await?,
        Some(Ok(Message::Close(_))) | None
    ));

    let mut ws2 = serve_one(&second).await?;
    assert_eq!(next_command(&mut ws2).await?["type"], "CMD_CONNECT_VEHICLE");
    wait_for("switched", || link.is_connected()).await?;
    assert_eq!(
        FileSettings::new(&settings_path).load(ENDPOINT_KEY),
        Some(second_endpoint)
    );

    link.disconnect()?;
    assert_eq!(link.state()?, LinkState::Disconnected);
    drop(ws);
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_keeps_retrying() -> Result<()> {
    // Grab a free port, then close it so connects are refused.
    let endpoint = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        format!("ws://{}", listener.local_addr()?)
    };
    let dir = tempfile::tempdir()?;
    let link = GcsLink::new(
        Store::default(),
        Arc::new(FileSettings::new(dir.path().join("settings.json"))),
        LinkOptions {
            reconnect_interval: Duration::from_millis(50),
            endpoint_change_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(500),
        },
        &endpoint,
    );

    link.connect()?;
    wait_for("retry pending", || {
        matches!(link.state(), Ok(LinkState::ReconnectPending))
    })
    .await?;
    assert!(!link.is_connected());

    link.disconnect()?;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(link.state()?, LinkState::Disconnected);
    Ok(())
}
