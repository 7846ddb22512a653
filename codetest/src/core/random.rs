//! Seedable pseudo-random source for input generation.
//!
//! A fixed seed reproduces the same sequence of draws, so a generated input
//! file is identical byte for byte across runs.

use anyhow::{Result, anyhow, bail};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform integer in `min..=max`.
    pub fn range(&mut self, min: i64, max: i64) -> Result<i64> {
        if min > max {
            bail!("random range {min}..{max} is empty");
        }
        Ok(self.rng.gen_range(min..=max))
    }

    /// Uniform pick among `choices`.
    pub fn choice<'a, T>(&mut self, choices: &'a [T]) -> Result<&'a T> {
        if choices.is_empty() {
            bail!("choice needs at least one alternative");
        }
        let index = self.rng.gen_range(0..choices.len());
        Ok(&choices[index])
    }

    /// Pick among `choices` proportionally to their weights.
    pub fn weighted_choice<'a, T>(&mut self, choices: &'a [(T, u32)]) -> Result<&'a T> {
        let dist = WeightedIndex::new(choices.iter().map(|(_, weight)| *weight))
            .map_err(|err| anyhow!("invalid weighted choice: {err}"))?;
        Ok(&choices[dist.sample(&mut self.rng)].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut left = RandomSource::new(42);
        let mut right = RandomSource::new(42);
        let a: Vec<i64> = (0..32).map(|_| left.range(0, 1000).unwrap()).collect();
        let b: Vec<i64> = (0..32).map(|_| right.range(0, 1000).unwrap()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn range_is_inclusive_and_rejects_empty() {
        let mut random = RandomSource::new(1);
        for _ in 0..100 {
            let value = random.range(3, 4).unwrap();
            assert!((3..=4).contains(&value));
        }
        assert_eq!(random.range(7, 7).unwrap(), 7);
        assert!(random.range(2, 1).is_err());
    }

    #[test]
    fn weighted_choice_never_picks_zero_weight() {
        let mut random = RandomSource::new(9);
        let choices = [("never", 0), ("always", 5)];
        for _ in 0..50 {
            assert_eq!(*random.weighted_choice(&choices).unwrap(), "always");
        }
        assert!(random.weighted_choice(&[("x", 0)]).is_err());
        assert!(random.weighted_choice::<&str>(&[]).is_err());
    }

    #[test]
    fn choice_rejects_empty() {
        let mut random = RandomSource::new(0);
        assert!(random.choice::<i32>(&[]).is_err());
        assert_eq!(*random.choice(&["only"]).unwrap(), "only");
    }
}
