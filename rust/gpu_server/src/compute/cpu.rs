use std::time::Instant;

use rayon::prelude::*;

use super::{group_count, AddBackend, AddOutput, GROUP_SIZE};
use crate::error::DeviceError;

/// Runs the grouped add on the rayon pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AddBackend for CpuBackend {
    fn label(&self) -> &'static str {
        "CPU"
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<AddOutput, DeviceError> {
        debug_assert_eq!(a.len(), b.len());
        let n = a.len();
        if n == 0 {
            return Ok(AddOutput::empty());
        }

        let mut c = vec![0.0f32; n];

        let start = Instant::now();
        // par_chunks_mut returns only once every group has finished
        c.par_chunks_mut(GROUP_SIZE)
            .enumerate()
            .for_each(|(group, out)| {
                let base = group * GROUP_SIZE;
                for lane in 0..GROUP_SIZE {
                    let i = base + lane;
                    if i < n {
                        out[lane] = a[i] + b[i];
                    }
                }
            });
        let elapsed = start.elapsed();

        tracing::trace!("cpu add: n={} groups={} in {:?}", n, group_count(n), elapsed);

        Ok(AddOutput { values: c, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_example_matrices() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [5.0f32, 6.0, 7.0, 8.0];

        let out = CpuBackend::new().add(&a, &b).unwrap();
        assert_eq!(out.values, vec![6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn test_empty_input_skips_launch() {
        let out = CpuBackend::new().add(&[], &[]).unwrap();
        assert!(out.values.is_empty());
        assert_eq!(out.elapsed, std::time::Duration::ZERO);
    }

    #[test]
    fn test_partial_last_group() {
        let n = GROUP_SIZE * 3 + 17;
        let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..n).map(|i| (2 * i) as f32).collect();

        let out = CpuBackend::new().add(&a, &b).unwrap();
        assert_eq!(out.values.len(), n);
        for (i, v) in out.values.iter().enumerate() {
            assert_eq!(*v, (3 * i) as f32);
        }
    }

    #[test]
    fn test_ieee_edge_values() {
        let a = [0.0f32, -0.0, f32::NAN, f32::INFINITY, f32::MAX, f32::INFINITY];
        let b = [-0.0f32, -0.0, 1.0, 1.0, f32::MAX, f32::NEG_INFINITY];

        let out = CpuBackend::new().add(&a, &b).unwrap().values;
        assert_eq!(out[0].to_bits(), 0.0f32.to_bits());
        assert_eq!(out[1].to_bits(), (-0.0f32).to_bits());
        assert!(out[2].is_nan());
        assert_eq!(out[3], f32::INFINITY);
        assert_eq!(out[4], f32::INFINITY);
        assert!(out[5].is_nan());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_matches_scalar_add(
            pairs in proptest::collection::vec((any::<f32>(), any::<f32>()), 0..2000)
        ) {
            let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
            let out = CpuBackend::new().add(&a, &b).unwrap();

            prop_assert_eq!(out.values.len(), a.len());
            for i in 0..a.len() {
                let expected = a[i] + b[i];
                if expected.is_nan() {
                    prop_assert!(out.values[i].is_nan());
                } else {
                    prop_assert_eq!(out.values[i].to_bits(), expected.to_bits());
                }
            }
        }
    }
}
