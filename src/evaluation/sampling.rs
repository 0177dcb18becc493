use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::config::SamplingRates;
use crate::transform::{ContentSource, TransformType, TransformationRecord};

/// Bucket a transformation is sampled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingKey {
    ExpandPregenerated,
    ExpandLive,
    Rewrite(u8),
}

impl SamplingKey {
    pub fn of(record: &TransformationRecord) -> Self {
        match record.transform_type {
            TransformType::Expand => match record.source {
                ContentSource::Live => SamplingKey::ExpandLive,
                ContentSource::Pregenerated | ContentSource::ContentMap => {
                    SamplingKey::ExpandPregenerated
                }
            },
            TransformType::Rewrite => SamplingKey::Rewrite(record.level.unwrap_or(1)),
        }
    }

    pub fn rate(&self, rates: &SamplingRates) -> f64 {
        let rate = match self {
            SamplingKey::ExpandPregenerated => rates.expand_pregenerated,
            SamplingKey::ExpandLive => rates.expand_live,
            SamplingKey::Rewrite(level) => usize::from(*level)
                .checked_sub(1)
                .and_then(|index| rates.rewrite_levels.get(index))
                .copied()
                .unwrap_or(rates.rewrite_fallback),
        };
        rate.clamp(0.0, 1.0)
    }
}

/// Seed derived from the batch id, so re-scoring a batch samples the same
/// records.
pub fn batch_seed(batch_id: &str) -> u64 {
    let digest = Sha256::digest(batch_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Pick the records to send for scoring. Rates of exactly 0 and 1 never
/// consult the rng.
pub fn sample_for_scoring(
    records: &[TransformationRecord],
    rates: &SamplingRates,
    rng: &mut StdRng,
) -> Vec<TransformationRecord> {
    records
        .iter()
        .filter(|record| {
            let rate = SamplingKey::of(record).rate(rates);
            if rate <= 0.0 {
                false
            } else if rate >= 1.0 {
                true
            } else {
                rng.gen_bool(rate)
            }
        })
        .cloned()
        .collect()
}

/// [`sample_for_scoring`] with the rng seeded from the batch id.
pub fn sample_batch(
    batch_id: &str,
    records: &[TransformationRecord],
    rates: &SamplingRates,
) -> Vec<TransformationRecord> {
    let mut rng = StdRng::seed_from_u64(batch_seed(batch_id));
    sample_for_scoring(records, rates, &mut rng)
}
