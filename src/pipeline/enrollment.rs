//! Passive enrollment sampling policy.
//!
//! When face recognition confirms who a track is, the frames around that
//! moment are ground truth for the weaker modalities. This controller decides
//! when to turn such a frame into a stored body or gait sample: at most one
//! sample per `(identity, modality)` per interval, and at most `max_samples`
//! over the identity's lifetime. The storage cap is a separate concern
//! ([`crate::matching::EmbeddingStore`]); sampling keeps running past it so
//! the retained set tracks the subject's most recent appearance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::domain::{IdentityId, Modality};

#[derive(Debug)]
struct SampleState {
    last_sample: Instant,
    count: u32,
}

/// Decides when a confirmed identity is due for a new reference sample.
#[derive(Debug)]
pub struct PassiveEnrollmentController {
    samples: HashMap<(IdentityId, Modality), SampleState>,
    sample_interval: Duration,
    max_samples: u32,
}

impl PassiveEnrollmentController {
    /// Create a controller sampling each `(identity, modality)` at most once
    /// per `sample_interval`, up to `max_samples` times.
    pub fn new(sample_interval: Duration, max_samples: u32) -> Self {
        Self {
            samples: HashMap::new(),
            sample_interval,
            max_samples: max_samples.max(1),
        }
    }

    /// True when `(identity, modality)` is due for a sample at `now`.
    ///
    /// Checking does not consume the interval; callers confirm with
    /// [`PassiveEnrollmentController::record_sample`] only once the encoder
    /// actually produced an embedding, so a failed encode does not burn the
    /// sampling slot.
    pub fn should_sample(&self, identity: IdentityId, modality: Modality, now: Instant) -> bool {
        match self.samples.get(&(identity, modality)) {
            None => true,
            Some(state) => {
                state.count < self.max_samples
                    && now.duration_since(state.last_sample) >= self.sample_interval
            }
        }
    }

    /// Record that a sample was stored for `(identity, modality)` at `now`.
    pub fn record_sample(&mut self, identity: IdentityId, modality: Modality, now: Instant) {
        let state = self
            .samples
            .entry((identity, modality))
            .or_insert(SampleState {
                last_sample: now,
                count: 0,
            });
        state.last_sample = now;
        state.count += 1;
        tracing::debug!(
            identity = %identity,
            modality = %modality,
            count = state.count,
            "passive enrollment sample recorded"
        );
    }

    /// Samples recorded so far for `(identity, modality)`.
    pub fn sample_count(&self, identity: IdentityId, modality: Modality) -> u32 {
        self.samples
            .get(&(identity, modality))
            .map(|s| s.count)
            .unwrap_or(0)
    }
}
