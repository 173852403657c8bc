/// Frame indices to sample from a video of `total` frames.
///
/// Index `i` for `i` in `1..=count` is `floor(i * total / (count + 1))`, so
/// samples are spread evenly and never touch the very first or last frame of
/// a long clip. Short clips yield fewer, distinct indices rather than an error.
#[must_use]
pub fn keyframe_indices(total: u64, count: usize) -> Vec<u64> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    let slots = count as u64 + 1;
    let mut indices: Vec<u64> = (1..=count as u64)
        .map(|i| (i * total / slots).min(total - 1))
        .collect();
    indices.dedup();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_clip_is_spread_evenly() {
        assert_eq!(keyframe_indices(100, 5), vec![16, 33, 50, 66, 83]);
        assert_eq!(keyframe_indices(60, 1), vec![30]);
    }

    #[test]
    fn short_clip_yields_distinct_frames() {
        let indices = keyframe_indices(3, 5);
        assert!(indices.len() <= 3);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(keyframe_indices(1, 5), vec![0]);
    }

    #[test]
    fn empty_inputs_yield_nothing() {
        assert!(keyframe_indices(0, 5).is_empty());
        assert!(keyframe_indices(10, 0).is_empty());
    }
}
