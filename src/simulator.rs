//! Deploy simulation.
//!
//! A [`DeploySimulator`] watches `commitPushed` envelopes and, after a fixed
//! delay, emits a `commitDeployed` envelope for its environment. Everything
//! else is ignored.
//!
//! Delays are drawn once per process by [`DeployDelays::draw`]. Production
//! waits for the staging delay plus an extra amount, so staging always
//! deploys first.
//!
//! ```text
//! commitPushed (t)
//!     ├── staging:    sleep(s)     -> commitDeployed(staging,    t + s)
//!     └── production: sleep(s + x) -> commitDeployed(production, t + s + x)
//! ```

use crate::envelope::{Envelope, EventKind};
use crate::event::{CommitDeployed, CommitPushed, Environment};
use crate::handlers::{parse_timestamp, Handler, HandlerError};
use async_trait::async_trait;
use chrono::SecondsFormat;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

/// Staging delay range in seconds, end exclusive
const STAGING_DELAY_SECS: std::ops::Range<u64> = 30..90;

/// Extra production delay range in seconds, end exclusive
const PRODUCTION_EXTRA_SECS: std::ops::Range<u64> = 60..180;

/// Smallest gap kept between the staging and production deploys
const MIN_PRODUCTION_EXTRA: Duration = Duration::from_millis(1);

/// The pair of simulated deploy delays for one process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployDelays {
    staging: Duration,
    production: Duration,
}

impl DeployDelays {
    /// Production waits `staging + extra`. An `extra` below 1ms is raised
    /// to 1ms so production always deploys after staging.
    pub fn new(staging: Duration, extra: Duration) -> Self {
        Self {
            staging,
            production: staging + extra.max(MIN_PRODUCTION_EXTRA),
        }
    }

    /// Draw staging from [30s, 90s) and the extra production wait from
    /// [60s, 180s), in whole seconds.
    pub fn draw<R: Rng>(rng: &mut R) -> Self {
        let staging = Duration::from_secs(rng.gen_range(STAGING_DELAY_SECS));
        let extra = Duration::from_secs(rng.gen_range(PRODUCTION_EXTRA_SECS));
        Self::new(staging, extra)
    }

    pub fn staging(&self) -> Duration {
        self.staging
    }

    pub fn production(&self) -> Duration {
        self.production
    }

    /// The staging and production simulators, in that order.
    pub fn simulators(&self) -> [DeploySimulator; 2] {
        [
            DeploySimulator::new(Environment::Staging, self.staging),
            DeploySimulator::new(Environment::Production, self.production),
        ]
    }
}

/// Emits a delayed `commitDeployed` for every `commitPushed` it sees.
#[derive(Debug, Clone)]
pub struct DeploySimulator {
    env: Environment,
    delay: Duration,
    name: String,
}

impl DeploySimulator {
    pub fn new(env: Environment, delay: Duration) -> Self {
        Self {
            env,
            delay,
            name: format!("deploy-{}-simulator", env),
        }
    }

    pub fn env(&self) -> Environment {
        self.env
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Compute the deploy event for a push without waiting.
    pub fn deployment_for(&self, pushed: &CommitPushed) -> Result<CommitDeployed, HandlerError> {
        let base = parse_timestamp(&pushed.occurred_on)?;
        let overflow = || HandlerError::TimestampOverflow {
            value: pushed.occurred_on.clone(),
            delay: self.delay,
        };

        let offset = chrono::Duration::from_std(self.delay).map_err(|_| overflow())?;
        let deployed_at = base.checked_add_signed(offset).ok_or_else(overflow)?;

        Ok(CommitDeployed {
            id: pushed.id.clone(),
            env: self.env,
            occurred_on: deployed_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        })
    }
}

#[async_trait]
impl Handler for DeploySimulator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        if envelope.event_kind() != EventKind::CommitPushed {
            return Ok(Vec::new());
        }

        let pushed: CommitPushed = envelope.decode().map_err(HandlerError::Decode)?;
        let deployed = self.deployment_for(&pushed)?;

        info!(
            env = %self.env,
            commit = %pushed.id,
            delay_secs = self.delay.as_secs(),
            "Simulating deploy"
        );

        tokio::time::sleep(self.delay).await;

        debug!(env = %self.env, commit = %deployed.id, occurred_on = %deployed.occurred_on, "Deploy finished");

        let out = Envelope::encode(&deployed).map_err(HandlerError::Encode)?;
        Ok(vec![out])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EVENT_TYPE_KEY;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pushed_at(occurred_on: &str) -> Envelope {
        Envelope::encode(&CommitPushed {
            id: "abc123".to_string(),
            message: "fix bug".to_string(),
            author: "alice".to_string(),
            occurred_on: occurred_on.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_draw_ranges_and_ordering() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let delays = DeployDelays::draw(&mut rng);
            let staging = delays.staging().as_secs();
            let extra = delays.production().as_secs() - staging;

            assert!((30..90).contains(&staging));
            assert!((60..180).contains(&extra));
            assert!(delays.staging() < delays.production());
        }
    }

    #[test]
    fn test_fixed_delays() {
        let delays = DeployDelays::new(Duration::from_secs(45), Duration::from_secs(60));
        assert_eq!(delays.production(), Duration::from_secs(105));

        let [staging, production] = delays.simulators();
        assert_eq!(staging.env(), Environment::Staging);
        assert_eq!(staging.delay(), Duration::from_secs(45));
        assert_eq!(production.env(), Environment::Production);
        assert_eq!(production.name(), "deploy-production-simulator");
    }

    #[test]
    fn test_zero_extra_keeps_production_after_staging() {
        let delays = DeployDelays::new(Duration::from_secs(45), Duration::ZERO);
        assert!(delays.staging() < delays.production());
        assert_eq!(delays.production(), Duration::from_millis(45_001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_scenario() {
        let simulator = DeploySimulator::new(Environment::Staging, Duration::from_secs(45));
        let started = tokio::time::Instant::now();

        let out = simulator.handle(&pushed_at("2024-01-01T10:00:00Z")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(45));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata().get(EVENT_TYPE_KEY), Some("commitDeployed"));
        assert_eq!(
            out[0].decode::<CommitDeployed>().unwrap(),
            CommitDeployed {
                id: "abc123".to_string(),
                env: Environment::Staging,
                occurred_on: "2024-01-01T10:00:45Z".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_other_event_kinds() {
        let simulator = DeploySimulator::new(Environment::Staging, Duration::from_secs(45));
        let started = tokio::time::Instant::now();

        let deployed = Envelope::encode(&CommitDeployed {
            id: "abc123".to_string(),
            env: Environment::Staging,
            occurred_on: "2024-01-01T10:00:45Z".to_string(),
        })
        .unwrap();
        assert!(simulator.handle(&deployed).await.unwrap().is_empty());

        let garbage = Envelope::new(b"not json".to_vec());
        assert!(simulator.handle(&garbage).await.unwrap().is_empty());

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_timestamp_fails_without_waiting() {
        let simulator = DeploySimulator::new(Environment::Production, Duration::from_secs(120));
        let started = tokio::time::Instant::now();

        let err = simulator.handle(&pushed_at("not a date")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timestamp { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_malformed_push() {
        let simulator = DeploySimulator::new(Environment::Staging, Duration::from_secs(45));
        let envelope = Envelope::new(b"[]".to_vec()).with_metadata(EVENT_TYPE_KEY, "commitPushed");

        let err = simulator.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[test]
    fn test_offset_preserved() {
        let simulator = DeploySimulator::new(Environment::Production, Duration::from_secs(150));
        let pushed = CommitPushed {
            id: "abc123".to_string(),
            message: "fix bug".to_string(),
            author: "alice".to_string(),
            occurred_on: "2024-01-01T23:59:00+02:00".to_string(),
        };

        let deployed = simulator.deployment_for(&pushed).unwrap();
        assert_eq!(deployed.occurred_on, "2024-01-02T00:01:30+02:00");
    }
}
