//! Splitting rules: choose the best (variable, threshold) for a node.

use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::data::Data;
use crate::node::VariableIndex;

/// Size and balance constraints every split must satisfy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConstraints {
    /// Target minimum number of samples per child.
    pub min_node_size: usize,
    /// Minimum fraction of the node's samples on each side.
    pub alpha: f64,
    /// Penalty `imbalance_penalty * (1/n_left + 1/n_right)` subtracted from each score.
    pub imbalance_penalty: f64,
}

impl SplitConstraints {
    /// Smallest child allowed for a node holding `n_samples`.
    #[must_use]
    pub fn min_child_size(&self, n_samples: usize) -> usize {
        let balanced = (self.alpha * n_samples as f64).ceil() as usize;
        balanced.max(self.min_node_size).max(1)
    }

    fn penalty(&self, n_left: usize, n_right: usize) -> f64 {
        self.imbalance_penalty * (1.0 / n_left as f64 + 1.0 / n_right as f64)
    }
}

/// Best split found for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    /// Column to split on.
    pub variable: VariableIndex,
    /// Non-missing values `<= threshold` go left; `NaN` means "split on missingness".
    pub threshold: f64,
    /// Direction for rows whose value is missing.
    pub send_missing_left: bool,
    /// Penalized improvement of the split (always positive).
    pub score: f64,
}

/// Proposes the best split of a node.
///
/// Implementations scan every candidate variable and return the split with
/// the highest positive score, keeping the first one found on ties. `None`
/// means no candidate satisfies the constraints and the node becomes a leaf.
pub trait SplittingRule: Send + Sync + fmt::Debug {
    /// Find the best split of `samples` using one response per sample.
    fn find_best_split(
        &self,
        data: &Data,
        samples: &[usize],
        responses: &[f64],
        candidate_variables: &[usize],
        constraints: &SplitConstraints,
    ) -> Option<SplitCandidate>;
}

/// Variance-reduction splitting on real-valued responses.
///
/// Score: `S_l²/n_l + S_r²/n_r - S²/n - penalty`, where `S` is a response sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionSplittingRule;

impl SplittingRule for RegressionSplittingRule {
    fn find_best_split(
        &self,
        data: &Data,
        samples: &[usize],
        responses: &[f64],
        candidate_variables: &[usize],
        constraints: &SplitConstraints,
    ) -> Option<SplitCandidate> {
        find_best_split_with(
            data,
            samples,
            responses,
            candidate_variables,
            constraints,
            ResponseSum::default,
            |parent: &ResponseSum, left: &ResponseSum, right: &ResponseSum| {
                left.sum_of_squares_term() + right.sum_of_squares_term()
                    - parent.sum_of_squares_term()
            },
        )
    }
}

/// Gini-decrease splitting on class-label responses (`0..num_classes` as `f64`).
#[derive(Debug, Clone, Copy)]
pub struct ProbabilitySplittingRule {
    num_classes: usize,
}

impl ProbabilitySplittingRule {
    /// Create a rule for responses in `0..num_classes`.
    #[must_use]
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl SplittingRule for ProbabilitySplittingRule {
    fn find_best_split(
        &self,
        data: &Data,
        samples: &[usize],
        responses: &[f64],
        candidate_variables: &[usize],
        constraints: &SplitConstraints,
    ) -> Option<SplitCandidate> {
        let num_classes = self.num_classes;
        find_best_split_with(
            data,
            samples,
            responses,
            candidate_variables,
            constraints,
            || ClassCounts::new(num_classes),
            |parent: &ClassCounts, left: &ClassCounts, right: &ClassCounts| {
                // MDI formula (matches scikit-learn).
                parent.total as f64 * parent.gini()
                    - left.total as f64 * left.gini()
                    - right.total as f64 * right.gini()
            },
        )
    }
}

/// Additive summary of the responses on one side of a split.
trait NodeStatistic: Clone {
    fn add(&mut self, response: f64);
    fn remove(&mut self, response: f64);
    fn absorb(&mut self, other: &Self);
    fn count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
struct ResponseSum {
    sum: f64,
    count: usize,
}

impl ResponseSum {
    fn sum_of_squares_term(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum * self.sum / self.count as f64
        }
    }
}

impl NodeStatistic for ResponseSum {
    fn add(&mut self, response: f64) {
        self.sum += response;
        self.count += 1;
    }

    fn remove(&mut self, response: f64) {
        self.sum -= response;
        self.count -= 1;
    }

    fn absorb(&mut self, other: &Self) {
        self.sum += other.sum;
        self.count += other.count;
    }

    fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone)]
struct ClassCounts {
    counts: Vec<usize>,
    total: usize,
}

impl ClassCounts {
    fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![0; num_classes],
            total: 0,
        }
    }

    /// Gini impurity: 1 - Σ(p_i²); zero for an empty side.
    fn gini(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let n = self.total as f64;
        let sum_sq: f64 = self
            .counts
            .iter()
            .map(|&c| {
                let p = c as f64 / n;
                p * p
            })
            .sum();
        1.0 - sum_sq
    }

    fn class_of(&self, response: f64) -> usize {
        (response.max(0.0) as usize).min(self.counts.len() - 1)
    }
}

impl NodeStatistic for ClassCounts {
    fn add(&mut self, response: f64) {
        let class = self.class_of(response);
        self.counts[class] += 1;
        self.total += 1;
    }

    fn remove(&mut self, response: f64) {
        let class = self.class_of(response);
        self.counts[class] -= 1;
        self.total -= 1;
    }

    fn absorb(&mut self, other: &Self) {
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    fn count(&self) -> usize {
        self.total
    }
}

/// Scan every candidate variable for the best-scoring valid split.
///
/// For each variable, non-missing values are sorted and every boundary
/// between distinct values is tried twice: once with missing rows on the
/// right and once on the left. A final candidate separates missing rows from
/// all observed ones.
fn find_best_split_with<S, F, G>(
    data: &Data,
    samples: &[usize],
    responses: &[f64],
    candidate_variables: &[usize],
    constraints: &SplitConstraints,
    empty: F,
    score: G,
) -> Option<SplitCandidate>
where
    S: NodeStatistic,
    F: Fn() -> S,
    G: Fn(&S, &S, &S) -> f64,
{
    let n_samples = samples.len();
    if n_samples < 2 || responses.len() != n_samples {
        return None;
    }
    let min_child = constraints.min_child_size(n_samples);

    let mut parent = empty();
    for &r in responses {
        parent.add(r);
    }

    let mut best_score = 0.0;
    let mut best: Option<SplitCandidate> = None;

    let mut consider = |left: &S, right: &S, threshold: f64, send_missing_left: bool, variable: usize| {
        let (n_left, n_right) = (left.count(), right.count());
        if n_left < min_child || n_right < min_child {
            return;
        }
        let value = score(&parent, left, right) - constraints.penalty(n_left, n_right);
        if value > best_score {
            best_score = value;
            best = Some(SplitCandidate {
                variable: VariableIndex::new(variable),
                threshold,
                send_missing_left,
                score: value,
            });
        }
    };

    let mut observed: Vec<(f64, f64)> = Vec::with_capacity(n_samples);
    for &variable in candidate_variables {
        let column = data.column(variable);
        observed.clear();
        let mut missing = empty();
        for (&s, &r) in samples.iter().zip(responses) {
            let value = column[s];
            if value.is_nan() {
                missing.add(r);
            } else {
                observed.push((value, r));
            }
        }
        observed.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = empty();
        let mut right = empty();
        for &(_, r) in &observed {
            right.add(r);
        }

        // Incremental scan: left grows from empty, right shrinks from full.
        for i in 0..observed.len().saturating_sub(1) {
            let (value, r) = observed[i];
            left.add(r);
            right.remove(r);

            let next = observed[i + 1].0;
            if value == next {
                continue;
            }
            let threshold = (value + next) / 2.0;

            let mut right_with_missing = right.clone();
            right_with_missing.absorb(&missing);
            consider(&left, &right_with_missing, threshold, false, variable);

            if missing.count() > 0 {
                let mut left_with_missing = left.clone();
                left_with_missing.absorb(&missing);
                consider(&left_with_missing, &right, threshold, true, variable);
            }
        }

        if missing.count() > 0 && !observed.is_empty() {
            let mut all_observed = empty();
            for &(_, r) in &observed {
                all_observed.add(r);
            }
            consider(&missing, &all_observed, f64::NAN, true, variable);
        }
    }

    best
}

/// Draw up to `mtry` distinct split variables.
pub(crate) fn draw_candidate_variables(
    split_variables: &[usize],
    mtry: usize,
    rng: &mut impl Rng,
) -> Vec<usize> {
    let mut order = split_variables.to_vec();
    let take = mtry.min(order.len());
    let (chosen, _) = order.partial_shuffle(rng, take);
    chosen.to_vec()
}
