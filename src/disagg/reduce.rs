//! Keyed partial results and their map-reduce combination.

use std::sync::Arc;

use ahash::AHashMap;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rayon::prelude::*;

use crate::error::Result;

use super::matrix::DisaggMatrix;

/// A probability of exceedance usable as a map key (compared bitwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Poe(u64);

impl Poe {
    pub fn new(value: f64) -> Self {
        Poe(value.to_bits())
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    pub site_id: usize,
    pub rlz_id: usize,
    pub poe: Poe,
    pub imt: Arc<str>,
    pub trt_names: Arc<[String]>,
}

/// One matrix per [`ResultKey`]; the accumulator of the reduce phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisaggResults {
    matrices: AHashMap<ResultKey, DisaggMatrix>,
}

impl DisaggResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the matrix if the key is new, otherwise merges it into the
    /// stored one with the product rule.
    pub fn insert_or_merge(&mut self, key: ResultKey, matrix: DisaggMatrix) -> Result<()> {
        match self.matrices.get_mut(&key) {
            Some(existing) => existing.merge(&matrix),
            None => {
                self.matrices.insert(key, matrix);
                Ok(())
            }
        }
    }

    /// Reduce step: folds every key of `partial` into `self`.
    ///
    /// Associative and commutative, but not idempotent: merging the same
    /// partial twice counts its ruptures twice.
    pub fn merge(mut self, partial: DisaggResults) -> Result<DisaggResults> {
        if self.matrices.len() < partial.matrices.len() {
            return partial.merge(self);
        }
        for (key, matrix) in partial.matrices {
            self.insert_or_merge(key, matrix)?;
        }
        Ok(self)
    }

    pub fn get(&self, key: &ResultKey) -> Option<&DisaggMatrix> {
        self.matrices.get(key)
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResultKey> {
        self.matrices.keys()
    }

    /// Entries in key order, for deterministic output.
    pub fn sorted(&self) -> Vec<(&ResultKey, &DisaggMatrix)> {
        self.matrices
            .iter()
            .sorted_by(|a, b| a.0.cmp(b.0))
            .collect()
    }
}

/// Runs `worker` over every task and folds the results with `combine`,
/// starting from `zero()`.
///
/// `combine` must be associative and commutative: results may be combined
/// in any order and grouping. Each worker result is combined exactly once.
pub trait MapReduce {
    fn map_reduce<T, A, W, Z, C>(&self, tasks: Vec<T>, worker: W, zero: Z, combine: C) -> Result<A>
    where
        T: Send,
        A: Send,
        W: Fn(T) -> Result<A> + Sync + Send,
        Z: Fn() -> A + Sync + Send,
        C: Fn(A, A) -> Result<A> + Sync + Send;
}

/// In-order, single-threaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialMapReduce;

impl MapReduce for SequentialMapReduce {
    fn map_reduce<T, A, W, Z, C>(&self, tasks: Vec<T>, worker: W, zero: Z, combine: C) -> Result<A>
    where
        T: Send,
        A: Send,
        W: Fn(T) -> Result<A> + Sync + Send,
        Z: Fn() -> A + Sync + Send,
        C: Fn(A, A) -> Result<A> + Sync + Send,
    {
        tasks
            .into_iter()
            .try_fold(zero(), |acc, task| combine(acc, worker(task)?))
    }
}

/// Tasks on the rayon pool; partial results are folded per thread as they
/// complete and the per-thread accumulators reduced pairwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonMapReduce {
    pub progress: bool,
}

impl MapReduce for RayonMapReduce {
    fn map_reduce<T, A, W, Z, C>(&self, tasks: Vec<T>, worker: W, zero: Z, combine: C) -> Result<A>
    where
        T: Send,
        A: Send,
        W: Fn(T) -> Result<A> + Sync + Send,
        Z: Fn() -> A + Sync + Send,
        C: Fn(A, A) -> Result<A> + Sync + Send,
    {
        let pb = if self.progress {
            let pb = ProgressBar::new(tasks.len() as u64);
            if let Ok(style) =
                ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} tasks {msg}")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let out = tasks
            .into_par_iter()
            .map(|task| {
                let res = worker(task);
                pb.inc(1);
                res
            })
            .try_fold(&zero, |acc, part| combine(acc, part?))
            .try_reduce(&zero, &combine);
        pb.finish_and_clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array6;
    use proptest::prelude::*;

    const SHAPE: [usize; 6] = [2, 2, 1, 1, 1, 2];

    fn key(site_id: usize) -> ResultKey {
        ResultKey {
            site_id,
            rlz_id: 0,
            poe: Poe::new(0.1),
            imt: Arc::from("PGA"),
            trt_names: Arc::from(vec!["Active Shallow Crust".to_string()]),
        }
    }

    fn matrix(poes: &[f64]) -> DisaggMatrix {
        let arr = Array6::from_shape_vec(SHAPE, poes.to_vec()).unwrap();
        DisaggMatrix::from_poes(arr, 0.2).unwrap()
    }

    fn results(entries: Vec<(ResultKey, DisaggMatrix)>) -> DisaggResults {
        let mut out = DisaggResults::new();
        for (k, m) in entries {
            out.insert_or_merge(k, m).unwrap();
        }
        out
    }

    fn assert_close(a: &DisaggResults, b: &DisaggResults) {
        assert_eq!(a.len(), b.len());
        for (k, m) in a.sorted() {
            let other = b.get(k).expect("key present in both");
            for (x, y) in m.non_exceedance().iter().zip(other.non_exceedance().iter()) {
                assert_abs_diff_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn merging_worker_outputs_for_a_shared_key() {
        let mut p1 = vec![0.0; 8];
        p1[3] = 0.1;
        let mut p2 = vec![0.0; 8];
        p2[3] = 0.2;
        let a = results(vec![(key(0), matrix(&p1))]);
        let b = results(vec![(key(0), matrix(&p2)), (key(1), matrix(&p2))]);
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.len(), 2);
        let m = merged.get(&key(0)).unwrap();
        let poes = m.poes();
        for (i, p) in poes.iter().enumerate() {
            if i == 3 {
                assert_abs_diff_eq!(*p, 0.28, epsilon = 1e-12);
            } else {
                assert_eq!(*p, 0.0);
            }
        }
        assert_abs_diff_eq!(merged.get(&key(1)).unwrap().poes().iter().sum::<f64>(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn empty_accumulator_is_identity() {
        let a = results(vec![(key(0), matrix(&[0.1, 0.0, 0.3, 0.0, 0.5, 0.0, 0.0, 0.9]))]);
        assert_eq!(DisaggResults::new().merge(a.clone()).unwrap(), a);
        assert_eq!(a.clone().merge(DisaggResults::new()).unwrap(), a);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let tasks: Vec<usize> = (0..20).collect();
        let worker = |i: usize| -> Result<DisaggResults> {
            let mut poes = vec![0.0; 8];
            poes[i % 8] = 0.01 * (i + 1) as f64;
            Ok(results(vec![(key(i % 3), matrix(&poes))]))
        };
        let seq = SequentialMapReduce
            .map_reduce(tasks.clone(), worker, DisaggResults::new, DisaggResults::merge)
            .unwrap();
        let par = RayonMapReduce { progress: false }
            .map_reduce(tasks, worker, DisaggResults::new, DisaggResults::merge)
            .unwrap();
        assert_eq!(seq.len(), 3);
        assert_close(&seq, &par);
    }

    #[test]
    fn worker_errors_abort_the_reduction() {
        let out = SequentialMapReduce.map_reduce(
            vec![0usize, 1, 2],
            |i| {
                if i == 1 {
                    Err(crate::DisaggError::config("boom"))
                } else {
                    Ok(DisaggResults::new())
                }
            },
            DisaggResults::new,
            DisaggResults::merge,
        );
        assert!(out.is_err());
    }

    fn prob_vec() -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(0.0f64..=1.0, 8)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn merge_is_commutative(a in prob_vec(), b in prob_vec()) {
            let ra = results(vec![(key(0), matrix(&a))]);
            let rb = results(vec![(key(0), matrix(&b)), (key(1), matrix(&a))]);
            let ab = ra.clone().merge(rb.clone()).unwrap();
            let ba = rb.merge(ra).unwrap();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_is_associative(a in prob_vec(), b in prob_vec(), c in prob_vec()) {
            let ra = results(vec![(key(0), matrix(&a))]);
            let rb = results(vec![(key(0), matrix(&b))]);
            let rc = results(vec![(key(0), matrix(&c)), (key(2), matrix(&c))]);
            let left = ra.clone().merge(rb.clone()).unwrap().merge(rc.clone()).unwrap();
            let right = ra.merge(rb.merge(rc).unwrap()).unwrap();
            assert_close(&left, &right);
        }

        #[test]
        fn merged_cells_stay_probabilities_and_grow(a in prob_vec(), b in prob_vec()) {
            let ra = results(vec![(key(0), matrix(&a))]);
            let rb = results(vec![(key(0), matrix(&b))]);
            let merged = ra.clone().merge(rb).unwrap();
            let before = ra.get(&key(0)).unwrap().poes();
            let after = merged.get(&key(0)).unwrap().poes();
            for (x, y) in before.iter().zip(after.iter()) {
                prop_assert!((0.0..=1.0).contains(y));
                prop_assert!(*y >= *x - 1e-15);
            }
        }
    }
}
