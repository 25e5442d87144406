//! Publisher task: the only place upstream updates leave the process.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nscabuf_gateway::{PublishError, UpstreamPublisher, UpstreamUpdate};

/// Writes each update to the log as a JSON payload. Stands in for a real
/// upstream client.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: u64,
}

impl LogPublisher {
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl UpstreamPublisher for LogPublisher {
    fn publish(&mut self, update: &UpstreamUpdate) -> Result<(), PublishError> {
        let payload = serde_json::to_string(update)
            .map_err(|e| PublishError::Rejected {
                service: update.service.clone(),
                reason: e.to_string(),
            })?;
        info!(
            host = %update.host,
            service = %update.service,
            state = %update.state,
            reason = update.reason.as_str(),
            %payload,
            "upstream update"
        );
        self.published += 1;
        Ok(())
    }
}

/// Publish every update until the channel closes, then hand the publisher
/// back. Failures are logged and skipped.
pub async fn run_publisher<P: UpstreamPublisher>(
    mut publisher: P,
    mut rx: mpsc::Receiver<UpstreamUpdate>,
) -> P {
    while let Some(update) = rx.recv().await {
        if let Err(e) = publisher.publish(&update) {
            warn!(service = %update.service, error = %e, "upstream publish failed");
        }
    }
    debug!("publisher: channel closed, stopping");
    publisher
}

#[cfg(test)]
mod tests {
    use super::*;
    use nscabuf_core::ServiceState;
    use nscabuf_gateway::PushReason;

    fn update(service: &str, state: ServiceState) -> UpstreamUpdate {
        UpstreamUpdate {
            host: "web-01".into(),
            service: service.into(),
            state,
            description: "text".into(),
            reason: PushReason::StateChange,
        }
    }

    /// Fails for one service, accepts the rest.
    struct Picky {
        refuse: &'static str,
        accepted: Vec<String>,
    }

    impl UpstreamPublisher for Picky {
        fn publish(&mut self, update: &UpstreamUpdate) -> Result<(), PublishError> {
            if update.service == self.refuse {
                return Err(PublishError::Unavailable("connection refused".into()));
            }
            self.accepted.push(update.service.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn publishes_in_order_until_closed() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(update("a", ServiceState::Critical)).await.unwrap();
        tx.send(update("b", ServiceState::Ok)).await.unwrap();
        drop(tx);

        let sink = run_publisher(Vec::<UpstreamUpdate>::new(), rx).await;
        let services: Vec<_> = sink.iter().map(|u| u.service.as_str()).collect();
        assert_eq!(services, ["a", "b"]);
    }

    #[tokio::test]
    async fn failures_do_not_stop_publishing() {
        let (tx, rx) = mpsc::channel(8);
        for service in ["a", "bad", "c"] {
            tx.send(update(service, ServiceState::Warning)).await.unwrap();
        }
        drop(tx);

        let picky = run_publisher(
            Picky {
                refuse: "bad",
                accepted: Vec::new(),
            },
            rx,
        )
        .await;
        assert_eq!(picky.accepted, ["a", "c"]);
    }

    #[test]
    fn log_publisher_counts() {
        let mut publisher = LogPublisher::default();
        publisher
            .publish(&update("a", ServiceState::Critical))
            .expect("log publish");
        assert_eq!(publisher.published(), 1);
    }
}
