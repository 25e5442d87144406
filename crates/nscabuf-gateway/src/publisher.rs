//! Upstream delivery seam.
//!
//! The gateway only decides. Whatever actually talks to the upstream system
//! implements [`UpstreamPublisher`] and runs outside the decision loop.

use thiserror::Error;

use crate::gateway::UpstreamUpdate;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("upstream rejected update for {service}: {reason}")]
    Rejected { service: String, reason: String },

    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

pub trait UpstreamPublisher: Send {
    fn publish(&mut self, update: &UpstreamUpdate) -> Result<(), PublishError>;
}

impl<P: UpstreamPublisher + ?Sized> UpstreamPublisher for Box<P> {
    fn publish(&mut self, update: &UpstreamUpdate) -> Result<(), PublishError> {
        (**self).publish(update)
    }
}

/// Collects every update. Handy as a test double.
impl UpstreamPublisher for Vec<UpstreamUpdate> {
    fn publish(&mut self, update: &UpstreamUpdate) -> Result<(), PublishError> {
        self.push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PushReason;
    use nscabuf_core::ServiceState;

    fn update(service: &str) -> UpstreamUpdate {
        UpstreamUpdate {
            host: "web-01".into(),
            service: service.into(),
            state: ServiceState::Critical,
            description: "down".into(),
            reason: PushReason::NewState,
        }
    }

    #[test]
    fn vec_collects_in_order() {
        let mut sink: Vec<UpstreamUpdate> = Vec::new();
        sink.publish(&update("a")).expect("vec never fails");
        sink.publish(&update("b")).expect("vec never fails");
        let services: Vec<_> = sink.iter().map(|u| u.service.as_str()).collect();
        assert_eq!(services, ["a", "b"]);
    }

    #[test]
    fn boxed_publisher_delegates() {
        let mut boxed: Box<dyn UpstreamPublisher> = Box::new(Vec::<UpstreamUpdate>::new());
        assert!(boxed.publish(&update("a")).is_ok());
    }

    #[test]
    fn errors_name_the_service() {
        let err = PublishError::Rejected {
            service: "http".into(),
            reason: "unknown host".into(),
        };
        assert_eq!(err.to_string(), "upstream rejected update for http: unknown host");
    }
}
