//! Regression model families understood by the JSON loader

use serde::{Deserialize, Serialize};

use crate::traits::InferenceModel;

/// Fixed bookkeeping cost charged to every model
const BASE_OVERHEAD: u64 = 256;

/// Serialized form of an artifact, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

impl ModelSpec {
    /// Check structural consistency, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ModelSpec::Linear(m) => m.validate(),
            ModelSpec::TreeEnsemble(m) => m.validate(),
        }
    }

    pub fn into_model(self) -> Box<dyn InferenceModel> {
        match self {
            ModelSpec::Linear(m) => Box::new(m),
            ModelSpec::TreeEnsemble(m) => Box::new(m),
        }
    }
}

/// `intercept + Σ coefficient·feature`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() {
            return Err("linear model has no coefficients".to_string());
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("linear model has non-finite parameters".to_string());
        }
        Ok(())
    }
}

impl InferenceModel for LinearModel {
    fn num_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, features: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .fold(self.intercept, |acc, (c, x)| acc + c * x)
    }

    fn footprint_bytes(&self) -> u64 {
        BASE_OVERHEAD + ((self.coefficients.len() + 1) * std::mem::size_of::<f64>()) as u64
    }

    fn kind(&self) -> &'static str {
        "linear"
    }
}

/// One node of a regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// `feature < threshold` goes to `left`, everything else to `right`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { leaf: f64 },
}

/// Sum of regression trees on top of a base score (gradient boosted trees)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub num_features: usize,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Vec<TreeNode>>,
}

impl TreeEnsemble {
    fn validate(&self) -> Result<(), String> {
        if self.num_features == 0 {
            return Err("tree ensemble declares zero features".to_string());
        }
        if !self.base_score.is_finite() {
            return Err("tree ensemble base_score is not finite".to_string());
        }
        if self.trees.is_empty() {
            return Err("tree ensemble has no trees".to_string());
        }

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.is_empty() {
                return Err(format!("tree {} is empty", t));
            }
            for (n, node) in tree.iter().enumerate() {
                match node {
                    TreeNode::Leaf { leaf } if !leaf.is_finite() => {
                        return Err(format!("tree {} node {}: leaf is not finite", t, n));
                    }
                    TreeNode::Leaf { .. } => {}
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= self.num_features {
                            return Err(format!(
                                "tree {} node {}: feature {} out of range",
                                t, n, feature
                            ));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("tree {} node {}: threshold is not finite", t, n));
                        }
                        // Children strictly after the parent keeps every walk finite.
                        for child in [*left, *right] {
                            if child <= n || child >= tree.len() {
                                return Err(format!(
                                    "tree {} node {}: child {} must be in {}..{}",
                                    t,
                                    n,
                                    child,
                                    n + 1,
                                    tree.len()
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn score_tree(tree: &[TreeNode], features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &tree[idx] {
                TreeNode::Leaf { leaf } => return *leaf,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn node_count(&self) -> usize {
        self.trees.iter().map(Vec::len).sum()
    }
}

impl InferenceModel for TreeEnsemble {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, tree| acc + Self::score_tree(tree, features))
    }

    fn footprint_bytes(&self) -> u64 {
        BASE_OVERHEAD + (self.node_count() * std::mem::size_of::<TreeNode>()) as u64
    }

    fn kind(&self) -> &'static str {
        "tree_ensemble"
    }
}
