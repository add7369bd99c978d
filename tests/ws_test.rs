//! Live feed over a real socket: the router is served on an ephemeral port
//! and driven with a WebSocket client.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, Stream, StreamExt};
use machinewatch::models::SensorReading;
use machinewatch::realtime::{Envelope, Hub};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use common::build_test_context;

const FRAME_WAIT: Duration = Duration::from_secs(2);

async fn serve(app: axum::Router) -> Result<SocketAddr> {
    // ---
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

/// Next text frame decoded as JSON, skipping control frames.
async fn next_json<S>(ws: &mut S) -> Result<Value>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = timeout(FRAME_WAIT, ws.next())
            .await
            .context("no frame within the wait")?
            .ok_or_else(|| anyhow!("socket closed"))??;
        match msg {
            Message::Text(_) => return Ok(serde_json::from_str(msg.to_text()?)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame: {other:?}")),
        }
    }
}

async fn wait_for_subscribers(hub: &Hub, expected: usize) -> Result<()> {
    // ---
    timeout(FRAME_WAIT, async {
        while hub.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("subscriber count never reached {expected}"))
}

fn overheated_reading() -> SensorReading {
    SensorReading {
        id: 7,
        machine_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        air_temp: 320.0,
        process_temp: 330.0,
        rotational_speed: 3500,
        torque: 80.0,
        tool_wear: 120,
    }
}

#[tokio::test]
async fn websocket_greets_forwards_anomalies_and_closes() -> Result<()> {
    // ---
    let ctx = build_test_context(None);
    let addr = serve(ctx.app.clone()).await?;

    let (mut ws, _) = connect_async(format!("ws://{addr}/sensors/ws")).await?;

    let welcome = next_json(&mut ws).await?;
    assert_eq!(welcome["event"], "connection");
    assert_eq!(welcome["data"]["message"], "Connected to sensor realtime feed");
    let client_id = welcome["data"]["clientId"]
        .as_str()
        .context("clientId should be a string")?;
    assert!(Uuid::parse_str(client_id).is_ok());
    assert!(welcome["timestamp"].is_string());

    // The greeting is sent after subscribing.
    assert_eq!(ctx.hub.subscriber_count(), 1);

    let reading = overheated_reading();
    let anomalies = vec![
        "Air temperature too high: 320K (max: 310K)".to_string(),
        "Torque too high: 80 Nm (max: 70 Nm)".to_string(),
    ];
    assert_eq!(
        ctx.hub.publish(Envelope::anomaly(reading.clone(), anomalies.clone())),
        1
    );

    let frame = next_json(&mut ws).await?;
    assert_eq!(frame["channel"], "sensor-anomaly");
    assert_eq!(frame["event"], "anomaly-detected");
    assert_eq!(frame["data"]["id"], 7);
    assert_eq!(frame["data"]["machineId"], reading.machine_id.to_string());
    assert_eq!(frame["data"]["airTemp"], 320.0);
    assert_eq!(frame["data"]["rotationalSpeed"], 3500);
    assert_eq!(frame["data"]["anomalies"], serde_json::json!(anomalies));

    // A plain reading follows on the reading channel, without anomalies.
    ctx.hub.publish(Envelope::new_reading(reading));
    let frame = next_json(&mut ws).await?;
    assert_eq!(frame["channel"], "sensor-reading");
    assert_eq!(frame["event"], "new-reading");
    assert!(frame["data"].get("anomalies").is_none());

    ws.send(Message::Close(None)).await?;
    wait_for_subscribers(&ctx.hub, 0).await?;
    Ok(())
}

#[tokio::test]
async fn each_client_gets_every_frame() -> Result<()> {
    // ---
    let ctx = build_test_context(None);
    let addr = serve(ctx.app.clone()).await?;
    let url = format!("ws://{addr}/sensors/ws");

    let (mut first, _) = connect_async(url.as_str()).await?;
    let (mut second, _) = connect_async(url.as_str()).await?;
    next_json(&mut first).await?;
    next_json(&mut second).await?;
    wait_for_subscribers(&ctx.hub, 2).await?;

    assert_eq!(ctx.hub.publish(Envelope::new_reading(overheated_reading())), 2);
    for ws in [&mut first, &mut second] {
        let frame = next_json(ws).await?;
        assert_eq!(frame["event"], "new-reading");
    }

    // Dropping one client without a close frame still releases its cursor.
    drop(first);
    wait_for_subscribers(&ctx.hub, 1).await?;

    second.send(Message::Close(None)).await?;
    wait_for_subscribers(&ctx.hub, 0).await?;
    Ok(())
}
