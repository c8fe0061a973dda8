//! Biased matrix factorization trained with stochastic gradient descent.
//!
//! A trained [`PredictorModel`] estimates `μ + b_u + b_i + p_u·q_i` for every
//! (user, item) pair seen during training and falls back to the bias terms for
//! unseen users or items. Models are immutable once fitted; retraining
//! produces a new model.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Serialize;
use tracing::instrument;

use crate::{
    error::{AppError, AppResult},
    models::{ItemId, RatingSet, UserId},
};

/// Training configuration for the factorization model
///
/// Training assumes a valid configuration (see [`Hyperparameters::validate`]).
/// An inverted or NaN scale does not panic, but clipped predictions are then
/// meaningless.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperparameters {
    /// Latent dimension of user and item embeddings
    pub rank: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    /// Standard deviation of the initial embedding noise
    pub init_std: f32,
    pub rating_min: f32,
    pub rating_max: f32,
    pub seed: u64,
    /// SGD passes used when folding an ephemeral user into a trained model
    pub fold_in_epochs: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            rank: 100,
            epochs: 20,
            learning_rate: 0.005,
            regularization: 0.02,
            init_std: 0.1,
            rating_min: 1.0,
            rating_max: 5.0,
            seed: 42,
            fold_in_epochs: 50,
        }
    }
}

impl Hyperparameters {
    /// Middle of the rating scale, served when no ratings exist at all
    pub fn midpoint(&self) -> f32 {
        (self.rating_min + self.rating_max) / 2.0
    }

    pub fn in_range(&self, rating: f32) -> bool {
        rating >= self.rating_min && rating <= self.rating_max
    }

    /// Rejects a scale that is not finite or not increasing, and a zero rank
    pub fn validate(&self) -> AppResult<()> {
        if !self.rating_min.is_finite() || !self.rating_max.is_finite() {
            return Err(AppError::InvalidInput(format!(
                "Rating scale bounds must be finite, got [{}, {}]",
                self.rating_min, self.rating_max
            )));
        }
        if self.rating_min >= self.rating_max {
            return Err(AppError::InvalidInput(format!(
                "Rating minimum {} must be below the maximum {}",
                self.rating_min, self.rating_max
            )));
        }
        if self.rank == 0 {
            return Err(AppError::InvalidInput("Rank must be positive".to_string()));
        }
        Ok(())
    }

    // Unlike `f32::clamp` this never panics on bad bounds, and maps NaN to the minimum.
    fn clip(&self, value: f32) -> f32 {
        value.max(self.rating_min).min(self.rating_max)
    }
}

/// Non-fatal conditions detected while training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingWarning {
    /// Fewer than two distinct users or items; the model serves bias-only predictions
    DegenerateModel { users: usize, items: usize },
}

/// Error metrics over a held-out rating set
///
/// `rmse` and `mae` are NaN when `count` is zero.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Evaluation {
    pub rmse: f64,
    pub mae: f64,
    pub count: usize,
}

impl Evaluation {
    pub fn is_defined(&self) -> bool {
        self.count > 0
    }
}

/// A user folded into a trained model from transient ratings
#[derive(Debug, Clone)]
pub struct FoldedUser {
    bias: f32,
    factors: Array1<f32>,
}

impl FoldedUser {
    pub fn bias(&self) -> f32 {
        self.bias
    }
}

/// Trained latent factor model
#[derive(Debug, Clone)]
pub struct PredictorModel {
    hyper: Hyperparameters,
    global_mean: f32,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    user_bias: Array1<f32>,
    item_bias: Array1<f32>,
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
    warnings: Vec<TrainingWarning>,
}

/// Fits a model on the deduplicated view of `ratings`
///
/// Deterministic for a given rating order and `hyper.seed`. Non-finite ratings
/// are dropped before training. `hyper` should pass [`Hyperparameters::validate`].
#[instrument(skip_all, fields(rows = ratings.len(), rank = hyper.rank, epochs = hyper.epochs))]
pub fn train_predictor(ratings: &RatingSet, hyper: &Hyperparameters) -> PredictorModel {
    let mut samples = ratings.deduplicated();
    let before = samples.len();
    samples.retain(|r| r.rating.is_finite());
    if samples.len() < before {
        tracing::warn!(
            dropped = before - samples.len(),
            "Dropped non-finite ratings before training"
        );
    }

    if samples.is_empty() {
        tracing::warn!(
            default_prediction = hyper.midpoint(),
            "No ratings to train on, serving the scale midpoint"
        );
        return PredictorModel::empty(hyper.clone());
    }

    let mut user_index: HashMap<UserId, usize> = HashMap::new();
    let mut item_index: HashMap<ItemId, usize> = HashMap::new();
    let mut triples: Vec<(usize, usize, f32)> = Vec::with_capacity(samples.len());
    let mut total = 0.0f64;

    for sample in &samples {
        let next_user = user_index.len();
        let u = *user_index.entry(sample.user_id).or_insert(next_user);
        let next_item = item_index.len();
        let i = *item_index.entry(sample.item_id).or_insert(next_item);
        triples.push((u, i, sample.rating));
        total += sample.rating as f64;
    }

    let num_users = user_index.len();
    let num_items = item_index.len();
    let global_mean = (total / samples.len() as f64) as f32;

    let mut warnings = Vec::new();
    let degenerate = num_users < 2 || num_items < 2;
    if degenerate {
        tracing::warn!(
            users = num_users,
            items = num_items,
            "Degenerate training set, embeddings disabled and predictions are bias-only"
        );
        warnings.push(TrainingWarning::DegenerateModel {
            users: num_users,
            items: num_items,
        });
    }

    let k = hyper.rank;
    let mut rng = StdRng::seed_from_u64(hyper.seed);
    let (mut user_factors, mut item_factors) = if degenerate {
        (Array2::zeros((num_users, k)), Array2::zeros((num_items, k)))
    } else {
        (
            init_embeddings(&mut rng, num_users, k, hyper.init_std),
            init_embeddings(&mut rng, num_items, k, hyper.init_std),
        )
    };
    let mut user_bias = Array1::<f32>::zeros(num_users);
    let mut item_bias = Array1::<f32>::zeros(num_items);

    let lr = hyper.learning_rate;
    let reg = hyper.regularization;
    let mut order: Vec<usize> = (0..triples.len()).collect();

    for epoch in 0..hyper.epochs {
        order.shuffle(&mut rng);
        let mut squared_error = 0.0f64;

        for &idx in &order {
            let (u, i, rating) = triples[idx];

            let interaction = if degenerate {
                0.0
            } else {
                user_factors.row(u).dot(&item_factors.row(i))
            };
            let err = rating - (global_mean + user_bias[u] + item_bias[i] + interaction);
            squared_error += (err * err) as f64;

            let bu = user_bias[u];
            let bi = item_bias[i];
            user_bias[u] = bu + lr * (err - reg * bu);
            item_bias[i] = bi + lr * (err - reg * bi);

            if !degenerate {
                let mut pu = user_factors.row_mut(u);
                let mut qi = item_factors.row_mut(i);
                for f in 0..k {
                    let p = pu[f];
                    let q = qi[f];
                    pu[f] = p + lr * (err * q - reg * p);
                    qi[f] = q + lr * (err * p - reg * q);
                }
            }
        }

        tracing::debug!(
            epoch,
            train_rmse = (squared_error / triples.len() as f64).sqrt(),
            "SGD epoch finished"
        );
    }

    tracing::info!(
        users = num_users,
        items = num_items,
        ratings = triples.len(),
        global_mean,
        "Predictor trained"
    );

    PredictorModel {
        hyper: hyper.clone(),
        global_mean,
        user_index,
        item_index,
        user_bias,
        item_bias,
        user_factors,
        item_factors,
        warnings,
    }
}

fn init_embeddings(rng: &mut StdRng, rows: usize, cols: usize, std: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), || {
        let noise: f32 = rng.sample(StandardNormal);
        noise * std
    })
}

impl PredictorModel {
    /// Equivalent to [`train_predictor`]
    pub fn fit(ratings: &RatingSet, hyper: &Hyperparameters) -> Self {
        train_predictor(ratings, hyper)
    }

    fn empty(hyper: Hyperparameters) -> Self {
        Self {
            global_mean: hyper.midpoint(),
            user_index: HashMap::new(),
            item_index: HashMap::new(),
            user_bias: Array1::zeros(0),
            item_bias: Array1::zeros(0),
            user_factors: Array2::zeros((0, hyper.rank)),
            item_factors: Array2::zeros((0, hyper.rank)),
            warnings: vec![TrainingWarning::DegenerateModel { users: 0, items: 0 }],
            hyper,
        }
    }

    /// Predicted rating, clipped to the rating scale
    ///
    /// Unseen entities fall back to the bias terms that are known:
    /// unseen user gives `μ + b_i`, unseen item gives `μ + b_u`, both unseen gives `μ`.
    pub fn predict(&self, user_id: UserId, item_id: ItemId) -> f32 {
        let user = self.user_index.get(&user_id).copied();
        let item = self.item_index.get(&item_id).copied();

        let raw = match (user, item) {
            (Some(u), Some(i)) => {
                self.global_mean
                    + self.user_bias[u]
                    + self.item_bias[i]
                    + self.interaction(self.user_factors.row(u), i)
            }
            (None, Some(i)) => self.global_mean + self.item_bias[i],
            (Some(u), None) => self.global_mean + self.user_bias[u],
            (None, None) => self.global_mean,
        };

        self.hyper.clip(raw)
    }

    /// Root-mean-squared and mean-absolute error over `test`
    pub fn evaluate(&self, test: &RatingSet) -> Evaluation {
        let rows = test.deduplicated();
        if rows.is_empty() {
            tracing::warn!("Evaluation requested on an empty test set, metrics are undefined");
            return Evaluation {
                rmse: f64::NAN,
                mae: f64::NAN,
                count: 0,
            };
        }

        let (squared, absolute) = rows.iter().fold((0.0f64, 0.0f64), |(sq, abs), r| {
            let err = (r.rating - self.predict(r.user_id, r.item_id)) as f64;
            (sq + err * err, abs + err.abs())
        });
        let n = rows.len() as f64;

        Evaluation {
            rmse: (squared / n).sqrt(),
            mae: absolute / n,
            count: rows.len(),
        }
    }

    /// Learns a transient user against the frozen item parameters
    ///
    /// A user already known to the model starts from their trained parameters.
    /// Ratings of items the model has never seen carry no signal and are skipped.
    pub fn fold_in(&self, user_id: Option<UserId>, ratings: &[(ItemId, f32)]) -> FoldedUser {
        let k = self.hyper.rank;
        let mut rng = StdRng::seed_from_u64(self.hyper.seed);

        let known_user = user_id.and_then(|id| self.user_index.get(&id).copied());
        let (mut bias, mut factors) = match known_user {
            Some(u) => (self.user_bias[u], self.user_factors.row(u).to_owned()),
            None if self.is_degenerate() => (0.0, Array1::zeros(k)),
            None => (
                0.0,
                Array1::from_shape_simple_fn(k, || {
                    let noise: f32 = rng.sample(StandardNormal);
                    noise * self.hyper.init_std
                }),
            ),
        };

        let mut samples: Vec<(usize, f32)> = ratings
            .iter()
            .filter_map(|&(item_id, rating)| self.item_index.get(&item_id).map(|&i| (i, rating)))
            .collect();

        let lr = self.hyper.learning_rate;
        let reg = self.hyper.regularization;

        for _ in 0..self.hyper.fold_in_epochs {
            samples.shuffle(&mut rng);
            for &(i, rating) in &samples {
                let interaction = self.interaction(factors.view(), i);
                let err = rating - (self.global_mean + bias + self.item_bias[i] + interaction);

                bias += lr * (err - reg * bias);
                if !self.is_degenerate() {
                    let qi = self.item_factors.row(i);
                    for f in 0..k {
                        let p = factors[f];
                        factors[f] = p + lr * (err * qi[f] - reg * p);
                    }
                }
            }
        }

        tracing::debug!(
            used = samples.len(),
            supplied = ratings.len(),
            bias,
            "Folded ephemeral user into model"
        );

        FoldedUser { bias, factors }
    }

    /// Prediction for a folded user; unseen items fall back to `μ + b_u`
    pub fn predict_folded(&self, user: &FoldedUser, item_id: ItemId) -> f32 {
        let raw = match self.item_index.get(&item_id) {
            Some(&i) => {
                self.global_mean
                    + user.bias
                    + self.item_bias[i]
                    + self.interaction(user.factors.view(), i)
            }
            None => self.global_mean + user.bias,
        };

        self.hyper.clip(raw)
    }

    fn interaction(&self, user_factors: ArrayView1<f32>, item: usize) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            user_factors.dot(&self.item_factors.row(item))
        }
    }

    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    pub fn user_bias(&self, user_id: UserId) -> Option<f32> {
        self.user_index.get(&user_id).map(|&u| self.user_bias[u])
    }

    pub fn item_bias(&self, item_id: ItemId) -> Option<f32> {
        self.item_index.get(&item_id).map(|&i| self.item_bias[i])
    }

    pub fn user_embedding(&self, user_id: UserId) -> Option<Vec<f32>> {
        self.user_index
            .get(&user_id)
            .map(|&u| self.user_factors.row(u).to_vec())
    }

    pub fn item_embedding(&self, item_id: ItemId) -> Option<Vec<f32>> {
        self.item_index
            .get(&item_id)
            .map(|&i| self.item_factors.row(i).to_vec())
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.user_index.contains_key(&user_id)
    }

    pub fn knows_item(&self, item_id: ItemId) -> bool {
        self.item_index.contains_key(&item_id)
    }

    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_index.len()
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub fn warnings(&self) -> &[TrainingWarning] {
        &self.warnings
    }

    pub fn is_degenerate(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, TrainingWarning::DegenerateModel { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn hyper() -> Hyperparameters {
        Hyperparameters {
            rank: 8,
            epochs: 100,
            learning_rate: 0.02,
            ..Hyperparameters::default()
        }
    }

    fn corpus() -> RatingSet {
        let mut ratings = Vec::new();
        for user in 1..=6u32 {
            for item in 1..=8u32 {
                if (user + item) % 3 == 0 {
                    continue;
                }
                let taste = if item <= 4 { 4.5 } else { 1.5 };
                let generosity = if user % 2 == 0 { 0.5 } else { 0.0 };
                ratings.push(Rating::new(user, item, taste + generosity));
            }
        }
        RatingSet::from(ratings)
    }

    #[test]
    fn test_empty_training_set_predicts_midpoint() {
        let model = train_predictor(&RatingSet::new(), &hyper());
        assert!(model.is_degenerate());
        assert_eq!(model.predict(1, 1), 3.0);
        assert_eq!(model.predict(77, 12), 3.0);
    }

    #[test]
    fn test_predictions_are_clipped() {
        let wide = Hyperparameters {
            learning_rate: 0.2,
            ..hyper()
        };
        let model = train_predictor(&corpus(), &wide);
        for user in 1..=6 {
            for item in 1..=8 {
                let score = model.predict(user, item);
                assert!((1.0..=5.0).contains(&score), "score {} out of range", score);
            }
        }
    }

    #[test]
    fn test_non_finite_ratings_do_not_poison_the_model() {
        let mut ratings = corpus();
        ratings.push(Rating::new(1, 2, f32::NAN));
        ratings.push(Rating::new(3, 5, f32::INFINITY));

        let model = train_predictor(&ratings, &hyper());

        assert!(model.global_mean().is_finite());
        for (user, item) in [(1, 1), (999, 2), (2, 999), (999, 999)] {
            let score = model.predict(user, item);
            assert!((1.0..=5.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_invalid_scale_is_rejected_without_panicking() {
        let inverted = Hyperparameters {
            rating_min: 5.0,
            rating_max: 1.0,
            ..hyper()
        };
        assert!(matches!(inverted.validate(), Err(AppError::InvalidInput(_))));

        let nan = Hyperparameters {
            rating_max: f32::NAN,
            ..hyper()
        };
        assert!(nan.validate().is_err());
        assert!(Hyperparameters {
            rank: 0,
            ..hyper()
        }
        .validate()
        .is_err());
        assert!(hyper().validate().is_ok());

        // Prediction still returns instead of panicking
        let model = train_predictor(&corpus(), &inverted);
        assert!(model.predict(1, 1).is_finite());
        let model = train_predictor(&corpus(), &nan);
        let _ = model.predict(999, 999);
    }

    #[test]
    fn test_unseen_entities_use_bias_fallbacks() {
        let model = train_predictor(&corpus(), &hyper());
        let mu = model.global_mean();

        assert_eq!(model.predict(999, 2), mu + model.item_bias(2).unwrap());
        assert_eq!(model.predict(2, 999), mu + model.user_bias(2).unwrap());
        assert_eq!(model.predict(999, 999), mu);
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let a = train_predictor(&corpus(), &hyper());
        let b = train_predictor(&corpus(), &hyper());
        let c = train_predictor(
            &corpus(),
            &Hyperparameters {
                seed: 7,
                ..hyper()
            },
        );

        for user in 1..=6 {
            assert_eq!(a.user_embedding(user), b.user_embedding(user));
            assert_eq!(a.user_bias(user), b.user_bias(user));
        }
        for item in 1..=8 {
            assert_eq!(a.item_embedding(item), b.item_embedding(item));
        }
        assert_ne!(a.user_embedding(1), c.user_embedding(1));
    }

    #[test]
    fn test_training_beats_global_mean_baseline() {
        let data = corpus();
        let model = train_predictor(&data, &hyper());
        let mu = model.global_mean();

        let baseline = (data
            .raw()
            .iter()
            .map(|r| ((r.rating - mu) as f64).powi(2))
            .sum::<f64>()
            / data.len() as f64)
            .sqrt();
        let fitted = model.evaluate(&data);

        assert_eq!(fitted.count, data.len());
        assert!(fitted.rmse < baseline, "{} >= {}", fitted.rmse, baseline);
        assert!(fitted.mae <= fitted.rmse);
    }

    #[test]
    fn test_single_user_is_degenerate_and_bias_only() {
        let ratings = RatingSet::from(vec![
            Rating::new(1, 1, 5.0),
            Rating::new(1, 2, 3.0),
            Rating::new(1, 3, 4.0),
        ]);
        let model = train_predictor(&ratings, &hyper());

        assert_eq!(
            model.warnings(),
            &[TrainingWarning::DegenerateModel { users: 1, items: 3 }]
        );
        let expected = model.global_mean() + model.user_bias(1).unwrap() + model.item_bias(2).unwrap();
        assert_eq!(model.predict(1, 2), expected.clamp(1.0, 5.0));
        assert!(model.user_embedding(1).unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_empty_evaluation_is_reported_as_nan() {
        let model = train_predictor(&corpus(), &hyper());
        let eval = model.evaluate(&RatingSet::new());

        assert_eq!(eval.count, 0);
        assert!(!eval.is_defined());
        assert!(eval.rmse.is_nan());
        assert!(eval.mae.is_nan());
    }

    #[test]
    fn test_fold_in_tracks_ephemeral_taste() {
        let model = train_predictor(&corpus(), &hyper());

        let fan = model.fold_in(None, &[(1, 5.0), (2, 5.0), (5, 5.0)]);
        let critic = model.fold_in(None, &[(1, 1.0), (2, 1.0), (5, 1.0)]);

        assert!(fan.bias() > critic.bias());
        assert!(model.predict_folded(&fan, 3) > model.predict_folded(&critic, 3));
    }

    #[test]
    fn test_fold_in_without_known_items_matches_unseen_user() {
        let model = train_predictor(&corpus(), &hyper());
        let folded = model.fold_in(None, &[(404, 5.0)]);

        assert_eq!(folded.bias(), 0.0);
        assert_eq!(model.predict_folded(&folded, 999), model.global_mean());
        // Item known, user vector untrained: only the dot product separates it from μ + b_i
        let score = model.predict_folded(&folded, 2);
        assert!((score - model.predict(999, 2)).abs() < 0.5);
    }
}
