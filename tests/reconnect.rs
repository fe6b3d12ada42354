//! Reconnect behavior against a local WebSocket server: a transport fault
//! must drive `Connected -> Reconnecting -> Connected` and resend the
//! subscribe frame for every active subscription.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use kraken_stream::{Channel, ClientConfig, ConnectionState, FixedBackoff, KrakenClient};

#[test]
fn reconnect_resubscribes_after_fault() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let listener = rt.block_on(async { TcpListener::bind("127.0.0.1:0").await.unwrap() });
    let port = listener.local_addr().unwrap().port();

    // Accept two sessions; read the first text frame of each, then drop
    // the socket. The drop after session one is the injected fault.
    let server = rt.spawn(async move {
        let mut frames = Vec::new();
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let frame = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("server saw unexpected message: {other:?}"),
                }
            };
            frames.push(frame);
        }
        frames
    });

    let states = Arc::new(Mutex::new(Vec::new()));
    let cb_states = states.clone();

    let config = ClientConfig::builder()
        .url(format!("ws://127.0.0.1:{port}"))
        .connect_timeout(Duration::from_secs(2))
        .backoff(Box::new(FixedBackoff::new(Duration::from_millis(50), 0)))
        .build()
        .unwrap();
    let client = KrakenClient::with_config(config);
    client.on_connection_state(move |state| cb_states.lock().unwrap().push(state));
    client.subscribe(Channel::Ticker, ["BTC/USD"]).unwrap();

    client.run_async();

    let frames = rt
        .block_on(async { tokio::time::timeout(Duration::from_secs(10), server).await })
        .expect("server timed out waiting for both sessions")
        .unwrap();
    client.stop();

    // Both sessions received the same subscribe frame for the same symbol.
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert!(frame.contains(r#""method":"subscribe""#), "frame: {frame}");
        assert!(frame.contains(r#""channel":"ticker""#), "frame: {frame}");
        assert!(frame.contains("BTC/USD"), "frame: {frame}");
    }
    assert_eq!(frames[0], frames[1]);

    // The state machine walked Connected -> Reconnecting -> Connected.
    let states = states.lock().unwrap().clone();
    let connected = states
        .iter()
        .filter(|s| **s == ConnectionState::Connected)
        .count();
    assert!(connected >= 2, "states: {states:?}");
    let first_connected = states
        .iter()
        .position(|s| *s == ConnectionState::Connected)
        .unwrap();
    assert!(
        states[first_connected..].contains(&ConnectionState::Reconnecting),
        "states: {states:?}"
    );

    assert!(client.get_metrics().reconnect_attempts >= 1);
}

#[test]
fn failed_endpoint_reports_and_gives_up() {
    // Nothing listens here; with a two-attempt budget the client must
    // settle in Disconnected rather than spin.
    let states = Arc::new(Mutex::new(Vec::new()));
    let cb_states = states.clone();

    let config = ClientConfig::builder()
        .url("ws://127.0.0.1:9") // discard port, nothing listening
        .connect_timeout(Duration::from_millis(300))
        .backoff(Box::new(FixedBackoff::new(Duration::from_millis(10), 2)))
        .build()
        .unwrap();
    let client = KrakenClient::with_config(config);
    client.on_connection_state(move |state| cb_states.lock().unwrap().push(state));

    client.run_async();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if client.connection_state() == ConnectionState::Disconnected {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let states = states.lock().unwrap().clone();
    assert!(states.contains(&ConnectionState::Connecting), "{states:?}");
    assert!(
        states.contains(&ConnectionState::Reconnecting),
        "{states:?}"
    );
    client.stop();
}
