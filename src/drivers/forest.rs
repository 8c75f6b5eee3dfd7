//! Random forest of CART trees (Gini impurity, bootstrap rows, random
//! feature subsets per split). Classes are dense indices `0..n_classes`.
use std::cmp::Ordering;

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Flat node arena; the root is node 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict(&self, features: &[f64]) -> Option<usize> {
        let mut idx = 0;
        // a well-formed tree reaches a leaf within nodes.len() steps
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                Node::Leaf { class } => return Some(*class),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if *features.get(*feature)? <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
        None
    }

    /// Checks node links, feature indices and class indices.
    pub fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { class } if *class >= n_classes => {
                    return Err(format!("node {i}: class {class} out of range"));
                }
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i}: feature {feature} out of range"));
                    }
                    // children are always pushed after their parent
                    if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(format!("node {i}: bad child link"));
                    }
                }
                Node::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub n_classes: usize,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fits a forest on the rows of `x` with class indices `y`.
    pub fn fit<'a>(
        x: ArrayView2<'a, f64>,
        y: &'a [usize],
        n_classes: usize,
        params: &'a ForestParams,
    ) -> Self {
        let n_rows = x.nrows();
        let n_features = x.ncols();
        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);
        let trees = (0..params.n_trees)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut grower = TreeGrower {
                    x,
                    y,
                    n_classes,
                    max_features,
                    params,
                    rng,
                    nodes: Vec::new(),
                };
                if !rows.is_empty() {
                    grower.grow(rows, 0);
                }
                DecisionTree {
                    nodes: grower.nodes,
                }
            })
            .collect();
        Self {
            n_features,
            n_classes,
            trees,
        }
    }

    /// Majority vote over all trees; ties go to the lowest class index.
    pub fn predict(&self, features: &[f64]) -> Option<usize> {
        let mut votes = vec![0usize; self.n_classes];
        for tree in &self.trees {
            if let Some(class) = tree.predict(features) {
                if let Some(slot) = votes.get_mut(class) {
                    *slot += 1;
                }
            }
        }
        argmax(&votes).filter(|c| votes[*c] > 0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".into());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.n_classes)
                .map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }
}

struct TreeGrower<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeGrower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&rows);
        let majority = argmax(&counts).unwrap_or(0);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { class: majority });

        let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.map_or(false, |d| depth >= d);
        if pure || depth_reached || rows.len() < self.params.min_samples_split {
            return id;
        }
        let Some((feature, threshold)) = self.best_split(&rows) else {
            return id;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|r| self.x[[*r, feature]] <= threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for r in rows {
            counts[self.y[*r]] += 1;
        }
        counts
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<(usize, f64)> {
        let n_features = self.x.ncols();
        // Visit features in random order; constant features do not count
        // toward max_features, so a node only gives up once every feature
        // has been tried without finding a split.
        let order = rand::seq::index::sample(&mut self.rng, n_features, n_features);
        let total = self.class_counts(rows);
        let n = rows.len() as f64;
        let mut best: Option<(f64, usize, f64)> = None;
        let mut visited = 0;

        for feature in order.iter() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            let mut sorted = rows.to_vec();
            sorted.sort_by(|a, b| {
                self.x[[*a, feature]]
                    .partial_cmp(&self.x[[*b, feature]])
                    .unwrap_or(Ordering::Equal)
            });
            let first = self.x[[sorted[0], feature]];
            let last = self.x[[sorted[sorted.len() - 1], feature]];
            if first == last {
                continue;
            }
            visited += 1;
            let mut left = vec![0usize; self.n_classes];
            for pos in 0..sorted.len() - 1 {
                left[self.y[sorted[pos]]] += 1;
                let here = self.x[[sorted[pos], feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if here == next {
                    continue;
                }
                let n_left = (pos + 1) as f64;
                let right: Vec<usize> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let score = (n_left * gini(&left) + (n - n_left) * gini(&right)) / n;
                if best.map_or(true, |(s, _, _)| score < s) {
                    best = Some((score, feature, here + (next - here) * 0.5));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

fn gini(counts: &[usize]) -> f64 {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|c| (*c as f64 / n).powi(2)).sum::<f64>()
}

fn argmax(counts: &[usize]) -> Option<usize> {
    counts
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (i, &c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((i, c)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_blobs() -> (Array2<f64>, Vec<usize>) {
        let mut flat = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let jitter = (i % 5) as f64 * 0.01;
            flat.extend_from_slice(&[0.0 + jitter, 1.0, 5.0 - jitter]);
            y.push(0);
            flat.extend_from_slice(&[1.0 + jitter, 1.0, 4.0 - jitter]);
            y.push(1);
            flat.extend_from_slice(&[2.0 + jitter, 1.0, 3.0 - jitter]);
            y.push(2);
        }
        (Array2::from_shape_vec((y.len(), 3), flat).unwrap(), y)
    }

    #[test]
    fn separable_classes_are_learned() {
        let (x, y) = two_blobs();
        let params = ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(x.view(), &y, 3, &params);
        assert_eq!(forest.trees.len(), 15);
        forest.validate().unwrap();
        assert_eq!(forest.predict(&[0.02, 1.0, 4.98]), Some(0));
        assert_eq!(forest.predict(&[1.02, 1.0, 3.98]), Some(1));
        assert_eq!(forest.predict(&[2.02, 1.0, 2.98]), Some(2));
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = two_blobs();
        let params = ForestParams {
            n_trees: 5,
            ..ForestParams::default()
        };
        let a = RandomForest::fit(x.view(), &y, 3, &params);
        let b = RandomForest::fit(x.view(), &y, 3, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[2, 5, 5]), Some(1));
        assert_eq!(argmax(&[]), None);
        assert!((gini(&[5, 5]) - 0.5).abs() < 1e-12);
        assert_eq!(gini(&[4, 0, 0]), 0.0);
    }

    #[test]
    fn validate_rejects_dangling_links() {
        let tree = DecisionTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 0.0,
                left: 1,
                right: 2,
            }],
        };
        assert!(tree.validate(1, 3).is_err());
        assert_eq!(tree.predict(&[0.0]), None);
    }
}
