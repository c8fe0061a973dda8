//! Versioned model and catalog snapshots.
//!
//! Readers clone an `Arc` to the current snapshot and never hold a lock while
//! computing. Writers build a complete replacement off the async runtime and
//! swap the pointer, so a reader sees either the old or the new snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{Mutex, RwLock};

use super::catalog::{build_catalog, Catalog};
use super::predictor::{train_predictor, Evaluation, Hyperparameters, PredictorModel};
use super::recommendations::{recommend, Recommendation};
use super::similarity::{build_similarity_index, SimilarityIndex};
use crate::{
    error::{AppError, AppResult},
    models::{Item, ItemId, ItemRecord, Rating, RatingSet, UserId},
};

/// Catalog and the similarity index derived from it
#[derive(Debug)]
pub struct ContentSnapshot {
    pub generation: u64,
    pub catalog: Catalog,
    pub similarity: SimilarityIndex,
}

/// A trained predictor with its hold-out metrics
#[derive(Debug)]
pub struct ModelSnapshot {
    pub generation: u64,
    pub predictor: PredictorModel,
    pub evaluation: Evaluation,
    /// Deduplicated ratings in the training split
    pub trained_on: usize,
    /// Corpus rows at the time the snapshot was taken
    pub corpus_size: usize,
    pub trained_at: DateTime<Utc>,
}

/// Owner of the live snapshots and the rating corpus
#[derive(Debug)]
pub struct Engine {
    hyper: Hyperparameters,
    test_fraction: f32,
    content: RwLock<Arc<ContentSnapshot>>,
    model: RwLock<Arc<ModelSnapshot>>,
    ratings: Mutex<Arc<RatingSet>>,
    /// Serialises writers (retrain, catalog reload)
    writer: Mutex<()>,
}

fn build_content(records: Vec<ItemRecord>, generation: u64) -> ContentSnapshot {
    let catalog = build_catalog(records);
    let similarity = build_similarity_index(&catalog);
    ContentSnapshot {
        generation,
        catalog,
        similarity,
    }
}

/// Splits, trains and evaluates one model generation
fn train_snapshot(
    ratings: &RatingSet,
    hyper: &Hyperparameters,
    test_fraction: f32,
    generation: u64,
) -> ModelSnapshot {
    let mut rng = StdRng::seed_from_u64(hyper.seed);
    let (train, test) = ratings.train_test_split(&mut rng, test_fraction);

    let predictor = train_predictor(&train, hyper);
    let evaluation = predictor.evaluate(&test);

    tracing::info!(
        generation,
        train = train.len(),
        test = test.len(),
        rmse = evaluation.rmse,
        mae = evaluation.mae,
        "Model generation ready"
    );

    ModelSnapshot {
        generation,
        predictor,
        evaluation,
        trained_on: train.len(),
        corpus_size: ratings.len(),
        trained_at: Utc::now(),
    }
}

impl Engine {
    /// Builds the first catalog and model generation
    ///
    /// Compute-bound; call from a blocking context.
    pub fn bootstrap(
        records: Vec<ItemRecord>,
        ratings: RatingSet,
        hyper: Hyperparameters,
        test_fraction: f32,
    ) -> Self {
        let content = build_content(records, 1);
        let model = train_snapshot(&ratings, &hyper, test_fraction, 1);

        Self {
            hyper,
            test_fraction,
            content: RwLock::new(Arc::new(content)),
            model: RwLock::new(Arc::new(model)),
            ratings: Mutex::new(Arc::new(ratings)),
            writer: Mutex::new(()),
        }
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub async fn content(&self) -> Arc<ContentSnapshot> {
        self.content.read().await.clone()
    }

    pub async fn model(&self) -> Arc<ModelSnapshot> {
        self.model.read().await.clone()
    }

    pub async fn ratings(&self) -> Arc<RatingSet> {
        self.ratings.lock().await.clone()
    }

    /// Appends a rating to the corpus; takes effect for predictions after the next retrain
    pub async fn submit_rating(&self, rating: Rating) -> AppResult<usize> {
        self.validate_rating(rating.rating)?;
        if !self.content().await.catalog.contains(rating.item_id) {
            return Err(AppError::NotFound(format!(
                "Movie {} not found",
                rating.item_id
            )));
        }

        let mut corpus = self.ratings.lock().await;
        Arc::make_mut(&mut *corpus).push(rating);

        tracing::info!(
            user_id = rating.user_id,
            movie_id = rating.item_id,
            rating = rating.rating,
            total = corpus.len(),
            "Rating recorded"
        );

        Ok(corpus.len())
    }

    /// Trains a new generation on the current corpus and swaps it in
    ///
    /// Reads keep being served from the previous generation while training runs.
    pub async fn retrain(&self) -> AppResult<Arc<ModelSnapshot>> {
        let _writer = self.writer.lock().await;

        let ratings = self.ratings().await;
        let generation = self.model().await.generation + 1;
        let hyper = self.hyper.clone();
        let test_fraction = self.test_fraction;

        tracing::info!(generation, ratings = ratings.len(), "Retraining model");

        let snapshot = tokio::task::spawn_blocking(move || {
            train_snapshot(&ratings, &hyper, test_fraction, generation)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))?;

        let snapshot = Arc::new(snapshot);
        *self.model.write().await = snapshot.clone();

        Ok(snapshot)
    }

    /// Rebuilds catalog and similarity index from fresh item records
    pub async fn reload_catalog(&self, records: Vec<ItemRecord>) -> AppResult<Arc<ContentSnapshot>> {
        let _writer = self.writer.lock().await;

        let generation = self.content().await.generation + 1;
        let snapshot = tokio::task::spawn_blocking(move || build_content(records, generation))
            .await
            .map_err(|e| AppError::Internal(format!("Catalog rebuild failed: {}", e)))?;

        let snapshot = Arc::new(snapshot);
        *self.content.write().await = snapshot.clone();

        tracing::info!(
            generation,
            movies = snapshot.catalog.len(),
            "Catalog snapshot swapped"
        );

        Ok(snapshot)
    }

    /// Top-`n` recommendations against the current snapshots
    pub async fn recommend(
        &self,
        user_id: UserId,
        n: usize,
        ephemeral: Option<&[(ItemId, f32)]>,
    ) -> AppResult<Vec<Recommendation>> {
        let content = self.content().await;

        if let Some(extra) = ephemeral {
            for &(item_id, rating) in extra {
                self.validate_rating(rating)?;
                content.catalog.lookup(item_id)?;
            }
        }

        let model = self.model().await;
        let ratings = self.ratings().await;

        recommend(
            user_id,
            n,
            &model.predictor,
            &content.catalog,
            &ratings,
            ephemeral,
        )
    }

    /// The `k` most similar movies with their cosine similarity
    pub async fn similar(&self, item_id: ItemId, k: usize) -> AppResult<Vec<(Item, f32)>> {
        let content = self.content().await;
        content
            .similarity
            .similar(item_id, k)?
            .into_iter()
            .map(|(id, score)| content.catalog.lookup(id).map(|item| (item.clone(), score)))
            .collect()
    }

    fn validate_rating(&self, rating: f32) -> AppResult<()> {
        if self.hyper.in_range(rating) {
            Ok(())
        } else {
            Err(AppError::InvalidInput(format!(
                "Rating {} outside the scale [{}, {}]",
                rating, self.hyper.rating_min, self.hyper.rating_max
            )))
        }
    }
}
