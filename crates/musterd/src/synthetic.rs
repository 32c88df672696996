//! Synthetic least-squares task — a linear model trained with SGD on a
//! locally generated regression dataset.
//!
//! Every agent draws from the same ground truth but sees its own sample
//! partition and noise, so local models genuinely diverge and consensus
//! has something to average.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use muster_agent::{EpochMetrics, Metrics, Trainer};
use muster_core::consensus::ParameterBlock;
use muster_core::config::TrainingConfig;

const GROUND_TRUTH_SEED: u64 = 0x6d75_7374_6572;

struct Split {
    features: Vec<Vec<f32>>,
    targets: Vec<f32>,
}

pub struct SyntheticTrainer {
    weights: Vec<f32>,
    bias: f32,
    train: Split,
    validation: Split,
    test: Split,
    epochs: u32,
    learning_rate: f32,
}

impl SyntheticTrainer {
    pub fn new(config: &TrainingConfig, agent_index: u64) -> Self {
        let dim = config.feature_dim;

        // shared ground truth, per-agent data
        let mut truth_rng = StdRng::seed_from_u64(GROUND_TRUTH_SEED);
        let true_weights: Vec<f32> = (0..dim).map(|_| truth_rng.gen_range(-1.0..1.0)).collect();
        let true_bias: f32 = truth_rng.gen_range(-0.5..0.5);

        let mut rng = StdRng::seed_from_u64(GROUND_TRUTH_SEED ^ (agent_index + 1));
        let mut draw = |count: usize| {
            let mut features = Vec::with_capacity(count);
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let x: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let noise: f32 = rng.gen_range(-0.05..0.05);
                let y = dot(&true_weights, &x) + true_bias + noise;
                features.push(x);
                targets.push(y);
            }
            Split { features, targets }
        };

        let samples = config.samples_per_agent.max(10);
        let train = draw(samples * 8 / 10);
        let validation = draw(samples / 10);
        let test = draw(samples / 10);

        Self {
            weights: vec![0.0; dim],
            bias: 0.0,
            train,
            validation,
            test,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
        }
    }

    fn evaluate(&self, split: &Split) -> Metrics {
        let mut squared = 0.0f64;
        for (x, y) in split.features.iter().zip(&split.targets) {
            let err = (dot(&self.weights, x) + self.bias - y) as f64;
            squared += err * err;
        }
        let loss = squared / split.features.len().max(1) as f64;
        Metrics {
            // bounded proxy in [0, 1]; exact fit scores 1
            accuracy: 1.0 / (1.0 + loss),
            loss,
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Trainer for SyntheticTrainer {
    fn train(&mut self) -> Vec<EpochMetrics> {
        let mut out = Vec::with_capacity(self.epochs as usize);
        for _ in 0..self.epochs {
            let started_at = Utc::now();
            for (x, y) in self.train.features.iter().zip(&self.train.targets) {
                let err = dot(&self.weights, x) + self.bias - y;
                for (w, xi) in self.weights.iter_mut().zip(x) {
                    *w -= self.learning_rate * err * xi;
                }
                self.bias -= self.learning_rate * err;
            }
            let metrics = self.evaluate(&self.train);
            out.push(EpochMetrics {
                accuracy: metrics.accuracy,
                loss: metrics.loss,
                started_at,
                finished_at: Utc::now(),
            });
        }
        out
    }

    fn validate(&mut self) -> Metrics {
        self.evaluate(&self.validation)
    }

    fn test(&mut self) -> Metrics {
        self.evaluate(&self.test)
    }

    fn current_parameters(&self) -> ParameterBlock {
        let mut block = ParameterBlock::new();
        block.insert("weights".into(), self.weights.clone());
        block.insert("bias".into(), vec![self.bias]);
        block
    }

    fn replace_parameters(&mut self, block: ParameterBlock) {
        if let Some(w) = block.get("weights") {
            if w.len() == self.weights.len() {
                self.weights = w.clone();
            }
        }
        if let Some(b) = block.get("bias") {
            if let Some(first) = b.first() {
                self.bias = *first;
            }
        }
    }
}
