//! Payload corruption fuzzing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use faultline_core::params::{ParamKind, ParamSchema, ParamSpec, ParamValue, StrategyParams};
use faultline_core::{ActionDecision, ConfigError, PacketEvent, StrategyError};

use super::Strategy;

/// Flips random payload bytes at a configured probability, forwarding
/// everything immediately. Exercises codec robustness rather than timing.
pub struct ByteMutator {
    mutation_probability: f64,
    max_mutated_bytes: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl ByteMutator {
    pub fn schema() -> ParamSchema {
        ParamSchema {
            strategy: "byte_mutator",
            specs: vec![
                ParamSpec::optional(
                    "mutation_probability",
                    ParamKind::Float,
                    ParamValue::Float(0.1),
                ),
                ParamSpec::optional("max_mutated_bytes", ParamKind::Int, ParamValue::Int(1)),
                ParamSpec::optional_no_default("seed", ParamKind::Int),
            ],
        }
    }

    pub fn from_params(params: &StrategyParams) -> Result<Self, ConfigError> {
        let mutation_probability = params.float("mutation_probability")?;
        if !(0.0..=1.0).contains(&mutation_probability) {
            return Err(ConfigError::InvalidParameter {
                key: "mutation_probability".to_string(),
                reason: format!("{mutation_probability} is outside [0, 1]"),
            });
        }
        let max_mutated_bytes = params.int("max_mutated_bytes")?;
        if max_mutated_bytes < 1 {
            return Err(ConfigError::InvalidParameter {
                key: "max_mutated_bytes".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let rng = match params.opt_int("seed") {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed as u64),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            mutation_probability,
            max_mutated_bytes: max_mutated_bytes as usize,
            rng: Mutex::new(rng),
        })
    }
}

#[async_trait]
impl Strategy for ByteMutator {
    fn name(&self) -> &'static str {
        "byte_mutator"
    }

    async fn decide(&self, event: &PacketEvent) -> Result<ActionDecision, StrategyError> {
        let mut payload = event.payload.clone();
        if !payload.is_empty() {
            let mut rng = self.rng.lock();
            if rng.gen::<f64>() < self.mutation_probability {
                for _ in 0..self.max_mutated_bytes {
                    let index = rng.gen_range(0..payload.len());
                    // XOR with a non-zero mask always changes the byte.
                    payload[index] ^= rng.gen_range(1..=u8::MAX);
                }
            }
        }
        Ok(ActionDecision::send(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutator(probability: f64, max_bytes: i64, seed: i64) -> ByteMutator {
        let table = [
            (
                "mutation_probability".to_string(),
                toml::Value::Float(probability),
            ),
            ("max_mutated_bytes".to_string(), toml::Value::Integer(max_bytes)),
            ("seed".to_string(), toml::Value::Integer(seed)),
        ]
        .into_iter()
        .collect::<toml::value::Table>();
        ByteMutator::from_params(&ByteMutator::schema().validate(&table, &[]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn certain_mutation_changes_payload() {
        let strategy = mutator(1.0, 1, 3);
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: vec![0u8; 16],
            sequence: 1,
        };
        let decision = strategy.decide(&event).await.unwrap();
        assert_ne!(decision.payload, event.payload);
        assert_eq!(decision.payload.len(), event.payload.len());
        assert!(!decision.is_drop());
    }

    #[tokio::test]
    async fn zero_probability_never_mutates() {
        let strategy = mutator(0.0, 4, 3);
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: b"stable".to_vec(),
            sequence: 1,
        };
        for _ in 0..16 {
            assert_eq!(strategy.decide(&event).await.unwrap().payload, b"stable");
        }
    }

    #[tokio::test]
    async fn empty_payload_passes_through() {
        let strategy = mutator(1.0, 2, 3);
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: Vec::new(),
            sequence: 1,
        };
        let decision = strategy.decide(&event).await.unwrap();
        assert!(decision.payload.is_empty());
    }
}
