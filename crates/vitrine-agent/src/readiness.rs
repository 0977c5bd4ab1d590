//! TCP readiness probing
//!
//! A preview is "ready" when its port accepts a TCP connection. The probe is
//! connect-and-close; no bytes are exchanged.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Poll `port` until it accepts a connection, the deadline passes, or `stop`
/// fires. Returns whether the port became reachable.
pub async fn wait_for_port(
    port: u16,
    deadline: Duration,
    interval: Duration,
    stop: &CancellationToken,
) -> bool {
    let until = Instant::now() + deadline;

    while Instant::now() < until {
        tokio::select! {
            _ = stop.cancelled() => return false,
            _ = sleep(interval) => {
                if probe_port(port, interval).await {
                    return true;
                }
            }
        }
    }
    false
}

/// Single connect-and-close attempt with a bounded connect time
pub async fn probe_port(port: u16, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_ready_when_listening() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stop = CancellationToken::new();
        let ready = wait_for_port(
            port,
            Duration::from_secs(2),
            Duration::from_millis(20),
            &stop,
        )
        .await;
        assert!(ready);
        drop(listener);
    }

    #[tokio::test]
    async fn test_times_out_when_nothing_listens() {
        // Bind-then-drop to find a port nothing is listening on
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let stop = CancellationToken::new();
        let ready = wait_for_port(
            port,
            Duration::from_millis(200),
            Duration::from_millis(20),
            &stop,
        )
        .await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn test_aborts_on_stop_signal() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let stop = CancellationToken::new();
        stop.cancel();
        let started = std::time::Instant::now();
        let ready = wait_for_port(
            port,
            Duration::from_secs(30),
            Duration::from_millis(100),
            &stop,
        )
        .await;
        assert!(!ready);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
