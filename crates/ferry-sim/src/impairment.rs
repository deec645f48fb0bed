use std::time::Duration;

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;

/// Impairment applied to one direction of a simulated link.
///
/// Everything is inactive by default, so `ImpairmentConfig::default()` is a
/// perfect, instantaneous link.
#[derive(Debug, Clone, Default)]
pub struct ImpairmentConfig {
    /// Probability in `[0, 1]` that a datagram is lost.
    pub loss_rate: f64,
    /// Probability in `[0, 1]` that a delivered datagram arrives twice.
    pub duplicate_rate: f64,
    /// Fixed one-way delay.
    pub delay: Duration,
    /// Extra delay drawn uniformly from `[0, jitter]` per copy. Enough jitter
    /// reorders datagrams.
    pub jitter: Duration,
    /// Deterministically drop the n-th, 2n-th, ... datagram (1-based).
    pub drop_every_nth: Option<u64>,
    /// Extra delay for the i-th datagram (0-based); datagrams past the end get
    /// none. Used to script an exact arrival order.
    pub delay_schedule: Vec<Duration>,
    pub seed: u64,
}

impl ImpairmentConfig {
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        ImpairmentConfig {
            loss_rate,
            seed,
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.loss_rate > 0.0
            || self.duplicate_rate > 0.0
            || !self.delay.is_zero()
            || !self.jitter.is_zero()
            || self.drop_every_nth.is_some()
            || !self.delay_schedule.is_empty()
    }
}

/// Decides the fate of each datagram entering a link direction.
#[derive(Debug)]
pub struct Impairer {
    config: ImpairmentConfig,
    rng: StdRng,
    ordinal: u64,
}

impl Impairer {
    pub fn new(config: ImpairmentConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Impairer {
            config,
            rng,
            ordinal: 0,
        }
    }

    pub fn config(&self) -> &ImpairmentConfig {
        &self.config
    }

    /// Delivery delays for the next datagram, one per copy. Empty means the
    /// datagram is lost.
    pub fn plan(&mut self) -> Vec<Duration> {
        let ordinal = self.ordinal;
        self.ordinal += 1;

        if let Some(n) = self.config.drop_every_nth {
            if n > 0 && (ordinal + 1) % n == 0 {
                return Vec::new();
            }
        }
        if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
            return Vec::new();
        }

        let scheduled = self
            .config
            .delay_schedule
            .get(ordinal as usize)
            .copied()
            .unwrap_or_default();
        let copies = if self.config.duplicate_rate > 0.0
            && self.rng.random::<f64>() < self.config.duplicate_rate
        {
            2
        } else {
            1
        };

        (0..copies)
            .map(|_| self.config.delay + scheduled + self.jitter())
            .collect()
    }

    fn jitter(&mut self) -> Duration {
        if self.config.jitter.is_zero() {
            return Duration::ZERO;
        }
        self.config.jitter.mul_f64(self.rng.random::<f64>())
    }
}
