//! Baseline strategy that forwards everything untouched.

use async_trait::async_trait;

use faultline_core::params::ParamSchema;
use faultline_core::{ActionDecision, PacketEvent, StrategyError};

use super::Strategy;

/// Forwards every message immediately and unmodified. Useful as the
/// control arm of a campaign and for exercising the plumbing itself.
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }

    /// No parameters.
    pub fn schema() -> ParamSchema {
        ParamSchema {
            strategy: "passthrough",
            specs: Vec::new(),
        }
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Strategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn decide(&self, event: &PacketEvent) -> Result<ActionDecision, StrategyError> {
        Ok(ActionDecision::send(event.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_unchanged() {
        let strategy = Passthrough::new();
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: vec![0xDE, 0xAD],
            sequence: 1,
        };
        let decision = strategy.decide(&event).await.unwrap();
        assert_eq!(decision, ActionDecision::send(vec![0xDE, 0xAD]));
    }
}
