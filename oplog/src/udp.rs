//! UDP ingest daemon.
//!
//! Listens for single-datagram JSON operations and routes them to the
//! bounded ingest queue. The reader never blocks on the queue: a full queue
//! drops the datagram with a counter bump, so UDP storms cannot wedge the
//! socket loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::Result;
use crate::ingest::{decode_operation, IngestQueue};
use crate::stats::Stats;

/// Maximum accepted datagram size.
const MAX_DATAGRAM: usize = 1024;

/// UDP daemon feeding the ingest queue.
pub struct UdpDaemon {
    socket: UdpSocket,
    queue: IngestQueue,
    stats: Arc<Stats>,
}

impl UdpDaemon {
    /// Binds the daemon to `addr` (an IPv4 `host:port`).
    pub async fn bind(addr: &str, queue: IngestQueue, stats: Arc<Stats>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            queue,
            stats,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Reads datagrams until the socket fails permanently.
    ///
    /// Invalid records are counted and dropped; transient read errors are
    /// logged and the loop continues.
    pub async fn run(self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let len = match self.socket.recv_from(&mut buf).await {
                Ok((len, _)) => len,
                Err(e) => {
                    tracing::warn!(error = %e, "udp read error");
                    continue;
                }
            };
            self.stats.events_received.inc();
            tracing::debug!(
                datagram = %String::from_utf8_lossy(&buf[..len]),
                "received operation datagram"
            );

            match decode_operation(&buf[..len]) {
                Ok(op) => {
                    self.queue.push(op);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "invalid operation datagram");
                    self.stats.events_error.inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::filter::Filter;
    use crate::ingest::spawn_appender;
    use crate::store::{Store, Tailed};
    use oplog_common::storage::in_memory::InMemoryStorage;
    use std::time::Duration;

    #[tokio::test]
    async fn should_ingest_datagram_end_to_end() {
        // given
        let store = Arc::new(Store::new(
            Arc::new(InMemoryStorage::new()),
            &Config::default(),
        ));
        let stats = Arc::new(Stats::new(16));
        let (queue, rx) = IngestQueue::bounded(16, stats.clone());
        spawn_appender(store.clone(), rx, stats.clone());

        let daemon = UdpDaemon::bind("127.0.0.1:0", queue, stats.clone())
            .await
            .unwrap();
        let addr = daemon.local_addr().unwrap();
        tokio::spawn(daemon.run());

        // when
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(
                br#"{"event":"insert","type":"video","id":"x1","parents":["user/u1"]}"#,
                addr,
            )
            .await
            .unwrap();

        // then
        let mut cursor = store.tail_ops(None, Filter::default());
        let item = tokio::time::timeout(Duration::from_secs(5), cursor.next())
            .await
            .expect("operation should arrive")
            .unwrap();
        match item {
            Tailed::Op(op) => {
                assert_eq!(op.data.object_key(), "video/x1");
                assert_eq!(op.data.parents, vec!["user/u1"]);
            }
            Tailed::Timeout => panic!("expected the ingested operation"),
        }
        assert_eq!(stats.events_received.get(), 1);
    }

    #[tokio::test]
    async fn should_count_invalid_datagrams_without_stopping() {
        // given
        let store = Arc::new(Store::new(
            Arc::new(InMemoryStorage::new()),
            &Config::default(),
        ));
        let stats = Arc::new(Stats::new(16));
        let (queue, rx) = IngestQueue::bounded(16, stats.clone());
        spawn_appender(store.clone(), rx, stats.clone());

        let daemon = UdpDaemon::bind("127.0.0.1:0", queue, stats.clone())
            .await
            .unwrap();
        let addr = daemon.local_addr().unwrap();
        tokio::spawn(daemon.run());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // when - garbage first, then a valid operation
        sender.send_to(b"not json", addr).await.unwrap();
        sender
            .send_to(br#"{"event":"insert","type":"video","id":"x2"}"#, addr)
            .await
            .unwrap();

        // then - the valid operation still lands
        let mut cursor = store.tail_ops(None, Filter::default());
        let item = tokio::time::timeout(Duration::from_secs(5), cursor.next())
            .await
            .expect("operation should arrive")
            .unwrap();
        assert!(matches!(item, Tailed::Op(op) if op.data.id == "x2"));
        assert_eq!(stats.events_error.get(), 1);
        assert_eq!(stats.events_received.get(), 2);
    }
}
