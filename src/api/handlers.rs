use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::data;
use crate::error::{AppError, AppResult};
use crate::models::{Item, ItemId, Rating, UserId};
use crate::services::{Evaluation, ModelSnapshot, Recommendation, TrainingWarning};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MovieResponse {
    pub movie_id: ItemId,
    pub title: String,
    pub genres: String,
    pub year: Option<i32>,
}

impl From<&Item> for MovieResponse {
    fn from(item: &Item) -> Self {
        Self {
            movie_id: item.id,
            title: item.title.clone(),
            genres: item.genres_display().to_string(),
            year: item.year,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MovieDetailsResponse {
    #[serde(flatten)]
    pub movie: MovieResponse,
    pub average_rating: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    #[serde(flatten)]
    pub movie: MovieResponse,
    pub predicted_rating: f32,
}

impl From<&Recommendation> for RecommendationResponse {
    fn from(rec: &Recommendation) -> Self {
        Self {
            movie: MovieResponse::from(&rec.item),
            predicted_rating: rec.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimilarMovieResponse {
    #[serde(flatten)]
    pub movie: MovieResponse,
    pub similarity: f32,
}

#[derive(Debug, Deserialize)]
pub struct RatingInput {
    pub user_id: UserId,
    pub movie_id: ItemId,
    pub rating: f32,
}

/// Transient ratings for a one-off recommendation request
#[derive(Debug, Deserialize)]
pub struct EphemeralRatingsRequest {
    pub user_id: UserId,
    pub ratings: BTreeMap<ItemId, f32>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    5
}

#[derive(Debug, Serialize)]
pub struct RatedMovie {
    pub movie_id: ItemId,
    pub title: String,
    pub rating: f32,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: UserId,
    pub average_rating: f32,
    pub rated_movies: Vec<RatedMovie>,
}

#[derive(Debug, Serialize)]
pub struct TopRatedResponse {
    #[serde(flatten)]
    pub movie: MovieResponse,
    pub rating: f32,
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    pub model_type: &'static str,
    pub generation: u64,
    pub num_ratings: usize,
    pub trained_on: usize,
    pub trained_at: DateTime<Utc>,
    pub rank: usize,
    pub rmse_on_test: Option<f64>,
    pub mae_on_test: Option<f64>,
    pub warnings: Vec<TrainingWarning>,
}

#[derive(Debug, Serialize)]
pub struct RetrainResponse {
    pub message: String,
    pub generation: u64,
    pub rmse_on_test: Option<f64>,
    pub mae_on_test: Option<f64>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

fn round2(value: f32) -> f32 {
    round_to(value as f64, 2) as f32
}

/// Undefined metrics (empty test split) are reported as null
fn metric(evaluation: &Evaluation, value: f64) -> Option<f64> {
    evaluation.is_defined().then(|| round_to(value, 4))
}

fn model_type(snapshot: &ModelSnapshot) -> &'static str {
    if snapshot.predictor.is_degenerate() {
        "BiasOnlyBaseline"
    } else {
        "BiasedMatrixFactorization"
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// All movies in catalog order
pub async fn get_movies(State(state): State<AppState>) -> Json<Vec<MovieResponse>> {
    let content = state.engine.content().await;
    Json(
        content
            .catalog
            .all_items()
            .iter()
            .map(MovieResponse::from)
            .collect(),
    )
}

/// Single movie with its average rating
pub async fn get_movie(
    State(state): State<AppState>,
    Path(movie_id): Path<ItemId>,
) -> AppResult<Json<MovieDetailsResponse>> {
    let content = state.engine.content().await;
    let item = content.catalog.lookup(movie_id)?;
    let ratings = state.engine.ratings().await;

    Ok(Json(MovieDetailsResponse {
        movie: MovieResponse::from(item),
        average_rating: ratings.item_average(item.id).map(round2),
    }))
}

/// Case-insensitive lookup by exact title
pub async fn get_movie_by_title(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> AppResult<Json<MovieDetailsResponse>> {
    let content = state.engine.content().await;
    let item = content.catalog.find_by_title(&title)?;
    let ratings = state.engine.ratings().await;

    Ok(Json(MovieDetailsResponse {
        movie: MovieResponse::from(item),
        average_rating: ratings.item_average(item.id).map(round2),
    }))
}

/// Top-N recommendations for a user in the rating corpus
pub async fn recommend_movies(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<CountQuery>,
) -> AppResult<Json<Vec<RecommendationResponse>>> {
    let n = query.n.unwrap_or(5);
    tracing::info!(user_id, n, "Processing recommendation request");

    let recommendations = state.engine.recommend(user_id, n, None).await?;
    Ok(Json(
        recommendations
            .iter()
            .map(RecommendationResponse::from)
            .collect(),
    ))
}

/// Recommendations from ratings supplied with the request; nothing is stored
pub async fn recommend_from_ratings(
    State(state): State<AppState>,
    Json(request): Json<EphemeralRatingsRequest>,
) -> AppResult<Json<Vec<RecommendationResponse>>> {
    if request.ratings.is_empty() {
        return Err(AppError::InvalidInput(
            "Provide at least one rating".to_string(),
        ));
    }

    tracing::info!(
        user_id = request.user_id,
        supplied = request.ratings.len(),
        top_n = request.top_n,
        "Processing ephemeral recommendation request"
    );

    let ephemeral: Vec<(ItemId, f32)> = request.ratings.into_iter().collect();
    let recommendations = state
        .engine
        .recommend(request.user_id, request.top_n, Some(&ephemeral))
        .await?;

    Ok(Json(
        recommendations
            .iter()
            .map(RecommendationResponse::from)
            .collect(),
    ))
}

/// Content neighbours by genre similarity
pub async fn similar_movies(
    State(state): State<AppState>,
    Path(movie_id): Path<ItemId>,
    Query(query): Query<CountQuery>,
) -> AppResult<Json<Vec<SimilarMovieResponse>>> {
    let n = query.n.unwrap_or(5);
    let similar = state.engine.similar(movie_id, n).await?;

    Ok(Json(
        similar
            .iter()
            .map(|(item, score)| SimilarMovieResponse {
                movie: MovieResponse::from(item),
                similarity: round_to(*score as f64, 4) as f32,
            })
            .collect(),
    ))
}

/// Records a rating in the corpus; the model picks it up on the next retrain
pub async fn rate_movie(
    State(state): State<AppState>,
    Json(input): Json<RatingInput>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let total = state
        .engine
        .submit_rating(Rating::new(input.user_id, input.movie_id, input.rating))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Rating submitted successfully!",
            "total_ratings": total,
        })),
    ))
}

/// A user's rating history
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<UserResponse>> {
    let ratings = state.engine.ratings().await;
    let user_ratings = ratings.for_user(user_id);
    let average = ratings
        .user_average(user_id)
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

    let content = state.engine.content().await;
    let rated_movies = user_ratings
        .iter()
        .filter_map(|r| {
            content.catalog.lookup(r.item_id).ok().map(|item| RatedMovie {
                movie_id: item.id,
                title: item.title.clone(),
                rating: r.rating,
            })
        })
        .collect();

    Ok(Json(UserResponse {
        user_id,
        average_rating: round2(average),
        rated_movies,
    }))
}

/// Movies with the highest average rating
pub async fn top_rated(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Json<Vec<TopRatedResponse>> {
    let n = query.n.unwrap_or(10);
    let ratings = state.engine.ratings().await;
    let content = state.engine.content().await;

    Json(
        ratings
            .top_rated_where(n, |item_id| content.catalog.contains(item_id))
            .into_iter()
            .filter_map(|(item_id, average)| {
                content.catalog.lookup(item_id).ok().map(|item| TopRatedResponse {
                    movie: MovieResponse::from(item),
                    rating: round2(average),
                })
            })
            .collect(),
    )
}

/// Current model generation and its hold-out metrics
pub async fn model_info(State(state): State<AppState>) -> Json<ModelInfoResponse> {
    let snapshot = state.engine.model().await;
    let num_ratings = state.engine.ratings().await.len();
    let evaluation = &snapshot.evaluation;

    Json(ModelInfoResponse {
        model_type: model_type(&snapshot),
        generation: snapshot.generation,
        num_ratings,
        trained_on: snapshot.trained_on,
        trained_at: snapshot.trained_at,
        rank: snapshot.predictor.hyperparameters().rank,
        rmse_on_test: metric(evaluation, evaluation.rmse),
        mae_on_test: metric(evaluation, evaluation.mae),
        warnings: snapshot.predictor.warnings().to_vec(),
    })
}

/// Retrains on the training split of the current corpus and swaps the live model
pub async fn retrain_model(State(state): State<AppState>) -> AppResult<Json<RetrainResponse>> {
    let snapshot = state.engine.retrain().await?;
    let evaluation = &snapshot.evaluation;

    Ok(Json(RetrainResponse {
        message: "Model retrained successfully!".to_string(),
        generation: snapshot.generation,
        rmse_on_test: metric(evaluation, evaluation.rmse),
        mae_on_test: metric(evaluation, evaluation.mae),
    }))
}

/// Re-reads the movies file and rebuilds the catalog and similarity index
pub async fn reload_catalog(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let path = state.config.movies_path.clone();
    let records = tokio::task::spawn_blocking(move || data::load_movies(&path))
        .await
        .map_err(|e| AppError::Internal(format!("Catalog load failed: {}", e)))??;

    let snapshot = state.engine.reload_catalog(records).await?;

    Ok(Json(json!({
        "message": "Catalog reloaded",
        "generation": snapshot.generation,
        "movies": snapshot.catalog.len(),
    })))
}
