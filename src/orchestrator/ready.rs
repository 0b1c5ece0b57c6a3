use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use std::time::Duration;
use tokio::net::TcpStream;

/// Polls a local TCP port until something accepts connections.
///
/// Holds no state between calls, so one probe can be shared by concurrent
/// waits on different ports.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(poll_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            poll_interval,
            connect_timeout,
        }
    }

    /// `true` once `127.0.0.1:port` accepts a connection, `false` if that
    /// does not happen within `timeout`.
    pub async fn wait_ready(&self, port: u16, timeout: Duration) -> bool {
        let attempt = || async { self.try_connect(port).await };
        let result = tokio::time::timeout(
            timeout,
            attempt
                .retry(
                    ConstantBuilder::default()
                        .with_delay(self.poll_interval)
                        .with_max_times(usize::MAX),
                )
                .notify(|err: &anyhow::Error, dur: Duration| {
                    tracing::trace!(port, "not ready: {:#}, retrying in {:?}", err, dur);
                }),
        )
        .await;
        matches!(result, Ok(Ok(())))
    }

    async fn try_connect(&self, port: u16) -> Result<()> {
        tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await
        .context("TCP connect timed out")?
        .context("TCP connect failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn probe() -> ReadinessProbe {
        ReadinessProbe::new(Duration::from_millis(20), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn ready_when_listener_exists() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe().wait_ready(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn times_out_when_nothing_listens() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let start = Instant::now();
        assert!(!probe().wait_ready(port, Duration::from_millis(300)).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn becomes_ready_when_listener_appears_later() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let late = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(listener);
        });
        assert!(probe().wait_ready(port, Duration::from_secs(2)).await);
        late.abort();
    }

    #[tokio::test]
    async fn concurrent_waits_on_different_ports() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let probe = probe();
        let (ra, rb) = tokio::join!(
            probe.wait_ready(a.local_addr().unwrap().port(), Duration::from_secs(1)),
            probe.wait_ready(b.local_addr().unwrap().port(), Duration::from_secs(1)),
        );
        assert!(ra && rb);
    }
}
