//! Per-session keep-alive watchdog
//!
//! Owns the return-port socket allocated at prepare. Any inbound datagram
//! resets the deadline; silence past the window raises an expiry notice
//! exactly once. Releasing the monitor stops the task and closes the
//! socket by dropping it.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Notices sent to the session watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveNotice {
    /// No control packet arrived within the window
    Expired,
    /// The return socket failed while receiving
    SocketError(String),
}

/// Handle to a running keep-alive task
#[derive(Debug)]
pub struct KeepAliveMonitor {
    session_id: String,
    shutdown_tx: mpsc::Sender<()>,
}

impl KeepAliveMonitor {
    /// Arm the watchdog on the session's return socket
    pub fn spawn(
        session_id: String,
        socket: UdpSocket,
        window: Duration,
        notices: mpsc::UnboundedSender<KeepAliveNotice>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(watch(session_id.clone(), socket, window, notices, shutdown_rx));
        tracing::debug!(session_id = %session_id, window_secs = window.as_secs_f64(), "Keep-alive armed");
        Self {
            session_id,
            shutdown_tx,
        }
    }

    /// Release the watchdog, suppressing any pending expiry
    pub fn release(&self) {
        let _ = self.shutdown_tx.try_send(());
        tracing::debug!(session_id = %self.session_id, "Keep-alive released");
    }
}

async fn watch(
    session_id: String,
    socket: UdpSocket,
    window: Duration,
    notices: mpsc::UnboundedSender<KeepAliveNotice>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut buf = [0u8; 2048];
    let mut deadline = Instant::now() + window;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                return;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => {
                    tracing::trace!(session_id = %session_id, len, peer = %peer, "Control packet, deadline reset");
                    deadline = Instant::now() + window;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Keep-alive socket error");
                    let _ = notices.send(KeepAliveNotice::SocketError(e.to_string()));
                    return;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(session_id = %session_id, "Keep-alive window expired");
                let _ = notices.send(KeepAliveNotice::Expired);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    async fn bound_socket() -> (UdpSocket, std::net::SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_expiry_fires_once_after_silence() {
        let (socket, _) = bound_socket().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _monitor = KeepAliveMonitor::spawn(
            "s1".to_string(),
            socket,
            Duration::from_millis(100),
            tx,
        );

        let notice = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice, KeepAliveNotice::Expired);

        // The task exits after the notice, so the channel closes.
        assert!(timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_inbound_packet_resets_deadline() {
        let (socket, addr) = bound_socket().await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _monitor = KeepAliveMonitor::spawn(
            "s1".to_string(),
            socket,
            Duration::from_millis(200),
            tx,
        );

        // Keep the session alive past several windows.
        for _ in 0..6 {
            sender.send_to(b"rtcp", addr).await.unwrap();
            sleep(Duration::from_millis(100)).await;
        }
        assert!(rx.try_recv().is_err());

        // Then go silent.
        let notice = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice, KeepAliveNotice::Expired);
    }

    #[tokio::test]
    async fn test_release_suppresses_expiry() {
        let (socket, _) = bound_socket().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = KeepAliveMonitor::spawn(
            "s1".to_string(),
            socket,
            Duration::from_millis(100),
            tx,
        );

        monitor.release();

        // No notice is ever delivered; the channel just closes.
        assert!(timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .is_none());
    }
}
