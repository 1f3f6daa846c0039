//! Input generation, chunking and sampling.

use common::config::Settings;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Seeded when `seed` is given, from OS entropy otherwise.
pub fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// `settings.count` keys drawn uniformly from `[xi, xf]`.
pub fn generate<R: Rng>(settings: &Settings, rng: &mut R) -> Vec<i64> {
    (0..settings.count)
        .map(|_| rng.gen_range(settings.xi..=settings.xf))
        .collect()
}

/// Splits `data` into at most `n` consecutive chunks of `ceil(len / n)` keys.
pub fn split(data: &[i64], n: usize) -> Vec<Vec<i64>> {
    if data.is_empty() || n == 0 {
        return Vec::new();
    }
    let size = data.len().div_ceil(n);
    data.chunks(size).map(<[i64]>::to_vec).collect()
}

/// Random sample of `fraction` of the data, never fewer than `min` keys
/// unless the data itself is smaller.
pub fn draw_sample<R: Rng>(data: &[i64], fraction: f64, min: usize, rng: &mut R) -> Vec<i64> {
    let wanted = (data.len() as f64 * fraction).ceil() as usize;
    let amount = wanted.max(min).min(data.len());
    data.choose_multiple(rng, amount).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(count: usize) -> Settings {
        Settings {
            num_mappers: 2,
            num_reducers: 2,
            xi: -3,
            xf: 3,
            count,
            seed: Some(7),
            sample_fraction: 0.1,
        }
    }

    #[test]
    fn generated_keys_stay_in_bounds() {
        let data = generate(&settings(500), &mut rng(Some(1)));
        assert_eq!(data.len(), 500);
        assert!(data.iter().all(|k| (-3..=3).contains(k)));
    }

    #[test]
    fn same_seed_same_data() {
        let a = generate(&settings(50), &mut rng(Some(42)));
        let b = generate(&settings(50), &mut rng(Some(42)));
        assert_eq!(a, b);
    }

    #[test]
    fn split_uses_ceiling_chunk_size() {
        assert_eq!(split(&[7, 2, 9, 4, 1, 8], 2), vec![vec![7, 2, 9], vec![4, 1, 8]]);
        assert_eq!(
            split(&[1, 2, 3, 4, 5], 3),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
        // Fewer keys than mappers: one key per chunk.
        assert_eq!(split(&[1, 2], 4), vec![vec![1], vec![2]]);
        assert!(split(&[], 4).is_empty());
    }

    #[test]
    fn sample_respects_minimum_and_data_size() {
        let data: Vec<i64> = (0..100).collect();
        let mut rng = rng(Some(3));
        assert_eq!(draw_sample(&data, 0.1, 2, &mut rng).len(), 10);
        assert_eq!(draw_sample(&data, 0.01, 5, &mut rng).len(), 5);
        assert_eq!(draw_sample(&data[..3], 0.1, 5, &mut rng).len(), 3);

        let sample = draw_sample(&data, 0.2, 1, &mut rng);
        assert!(sample.iter().all(|k| data.contains(k)));
    }
}
