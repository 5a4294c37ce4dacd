//! Probabilistic drop/delay fuzzing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use faultline_core::params::{ParamKind, ParamSchema, ParamSpec, ParamValue, StrategyParams};
use faultline_core::{ActionDecision, ConfigError, PacketEvent, StrategyError, DROP_DELAY};

use super::Strategy;

/// Drops or delays messages at configured probabilities, forwarding the
/// rest untouched. A fixed seed reproduces the whole verdict sequence.
pub struct RandomFuzzer {
    send_probability: f64,
    drop_probability: f64,
    min_delay_ms: u32,
    max_delay_ms: u32,
    rng: Mutex<ChaCha8Rng>,
}

impl RandomFuzzer {
    /// Parameter schema: probabilities are required, the delay window and
    /// seed are optional.
    pub fn schema() -> ParamSchema {
        ParamSchema {
            strategy: "random_fuzzer",
            specs: vec![
                ParamSpec::required("drop_probability", ParamKind::Float),
                ParamSpec::required("delay_probability", ParamKind::Float),
                ParamSpec::optional("min_delay_ms", ParamKind::Int, ParamValue::Int(10)),
                ParamSpec::optional("max_delay_ms", ParamKind::Int, ParamValue::Int(150)),
                ParamSpec::optional_no_default("seed", ParamKind::Int),
            ],
        }
    }

    /// Build from validated parameters, applying the range checks the
    /// schema cannot express.
    pub fn from_params(params: &StrategyParams) -> Result<Self, ConfigError> {
        let drop_probability = params.float("drop_probability")?;
        let delay_probability = params.float("delay_probability")?;
        for (key, value) in [
            ("drop_probability", drop_probability),
            ("delay_probability", delay_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidParameter {
                    key: key.to_string(),
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if drop_probability + delay_probability > 1.0 {
            return Err(ConfigError::InvalidParameter {
                key: "delay_probability".to_string(),
                reason: "drop_probability + delay_probability exceeds 1".to_string(),
            });
        }

        let min_delay = params.int("min_delay_ms")?;
        let max_delay = params.int("max_delay_ms")?;
        if min_delay < 0 || max_delay < min_delay || max_delay >= i64::from(DROP_DELAY) {
            return Err(ConfigError::InvalidParameter {
                key: "max_delay_ms".to_string(),
                reason: format!("window {min_delay}..{max_delay} is not a valid delay range"),
            });
        }

        let rng = match params.opt_int("seed") {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed as u64),
            None => ChaCha8Rng::from_entropy(),
        };

        Ok(Self {
            send_probability: 1.0 - drop_probability - delay_probability,
            drop_probability,
            min_delay_ms: min_delay as u32,
            max_delay_ms: max_delay as u32,
            rng: Mutex::new(rng),
        })
    }
}

#[async_trait]
impl Strategy for RandomFuzzer {
    fn name(&self) -> &'static str {
        "random_fuzzer"
    }

    async fn decide(&self, event: &PacketEvent) -> Result<ActionDecision, StrategyError> {
        let (roll, delay) = {
            let mut rng = self.rng.lock();
            let roll: f64 = rng.gen();
            let delay = rng.gen_range(self.min_delay_ms..=self.max_delay_ms);
            (roll, delay)
        };
        let decision = if roll < self.send_probability {
            ActionDecision::send(event.payload.clone())
        } else if roll < self.send_probability + self.drop_probability {
            ActionDecision::drop(event.payload.clone())
        } else {
            ActionDecision::delay(event.payload.clone(), delay)
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, toml::Value)]) -> StrategyParams {
        let table = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect::<toml::value::Table>();
        RandomFuzzer::schema().validate(&table, &[]).unwrap()
    }

    #[tokio::test]
    async fn always_drop_drops_everything() {
        let fuzzer = RandomFuzzer::from_params(&params(&[
            ("drop_probability", toml::Value::Float(1.0)),
            ("delay_probability", toml::Value::Float(0.0)),
            ("seed", toml::Value::Integer(1)),
        ]))
        .unwrap();
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: b"m".to_vec(),
            sequence: 1,
        };
        for _ in 0..32 {
            assert!(fuzzer.decide(&event).await.unwrap().is_drop());
        }
    }

    #[tokio::test]
    async fn delays_stay_in_window() {
        let fuzzer = RandomFuzzer::from_params(&params(&[
            ("drop_probability", toml::Value::Float(0.0)),
            ("delay_probability", toml::Value::Float(1.0)),
            ("min_delay_ms", toml::Value::Integer(20)),
            ("max_delay_ms", toml::Value::Integer(30)),
            ("seed", toml::Value::Integer(7)),
        ]))
        .unwrap();
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: b"m".to_vec(),
            sequence: 1,
        };
        for _ in 0..64 {
            let decision = fuzzer.decide(&event).await.unwrap();
            assert!((20..=30).contains(&decision.delay_ms));
        }
    }

    #[tokio::test]
    async fn seeded_runs_repeat_exactly() {
        let build = || {
            RandomFuzzer::from_params(&params(&[
                ("drop_probability", toml::Value::Float(0.3)),
                ("delay_probability", toml::Value::Float(0.3)),
                ("seed", toml::Value::Integer(42)),
            ]))
            .unwrap()
        };
        let first = build();
        let second = build();
        let event = PacketEvent {
            from: 0,
            to: 1,
            payload: b"m".to_vec(),
            sequence: 1,
        };
        for _ in 0..64 {
            assert_eq!(
                first.decide(&event).await.unwrap(),
                second.decide(&event).await.unwrap()
            );
        }
    }

    #[test]
    fn rejects_probability_sum_above_one() {
        let table = [
            ("drop_probability".to_string(), toml::Value::Float(0.7)),
            ("delay_probability".to_string(), toml::Value::Float(0.7)),
        ]
        .into_iter()
        .collect::<toml::value::Table>();
        let validated = RandomFuzzer::schema().validate(&table, &[]).unwrap();
        assert!(matches!(
            RandomFuzzer::from_params(&validated),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn rejects_inverted_delay_window() {
        let table = [
            ("drop_probability".to_string(), toml::Value::Float(0.0)),
            ("delay_probability".to_string(), toml::Value::Float(1.0)),
            ("min_delay_ms".to_string(), toml::Value::Integer(50)),
            ("max_delay_ms".to_string(), toml::Value::Integer(10)),
        ]
        .into_iter()
        .collect::<toml::value::Table>();
        let validated = RandomFuzzer::schema().validate(&table, &[]).unwrap();
        assert!(RandomFuzzer::from_params(&validated).is_err());
    }
}
