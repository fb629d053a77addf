use std::time::{Duration, Instant};

use tg_shop_launcher::gate::{wait_until_ready, Endpoint, GateError, GatePolicy, TcpProbe};
use tokio::net::TcpListener;

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn listening_port_passes_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
    let policy = GatePolicy::new(Some(Duration::from_secs(2)), Duration::from_millis(100));

    let waited = wait_until_ready(&TcpProbe, &endpoint, &policy).await.unwrap();
    assert!(waited < Duration::from_millis(100), "{waited:?}");
}

#[tokio::test]
async fn closed_port_fails_after_timeout() {
    let endpoint = Endpoint::new("127.0.0.1", closed_port().await);
    let timeout = Duration::from_millis(400);
    let interval = Duration::from_millis(100);
    let policy = GatePolicy::new(Some(timeout), interval);

    let start = Instant::now();
    let err = wait_until_ready(&TcpProbe, &endpoint, &policy)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(elapsed >= timeout, "{elapsed:?}");
    // Allow for scheduler jitter on top of one interval.
    assert!(elapsed < timeout + interval + Duration::from_millis(250), "{elapsed:?}");
    let message = err.to_string();
    assert!(message.contains(&endpoint.to_string()), "{message}");
    assert!(matches!(err, GateError::Unreachable { attempts, .. } if attempts >= 2));
}

#[tokio::test]
async fn port_opening_mid_wait_is_picked_up() {
    let port = closed_port().await;
    let endpoint = Endpoint::new("127.0.0.1", port);
    let policy = GatePolicy::new(Some(Duration::from_secs(5)), Duration::from_millis(100));

    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(listener);
    });

    let waited = wait_until_ready(&TcpProbe, &endpoint, &policy).await.unwrap();
    assert!(waited >= Duration::from_millis(250), "{waited:?}");
    assert!(waited < Duration::from_millis(250) + Duration::from_millis(100) + Duration::from_millis(250));
    opener.abort();
}
