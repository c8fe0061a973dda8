use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{
    make_span_with_request_id, propagate_request_id_layer, set_request_id_layer,
};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Catalog
        .route("/movies", get(handlers::get_movies))
        .route("/movies/:movie_id", get(handlers::get_movie))
        .route("/movies/title/:title", get(handlers::get_movie_by_title))
        .route("/similar/:movie_id", get(handlers::similar_movies))
        .route("/top-rated", get(handlers::top_rated))
        .route("/catalog/reload", post(handlers::reload_catalog))
        // Recommendations
        .route("/recommend/:user_id", get(handlers::recommend_movies))
        .route("/rate", post(handlers::recommend_from_ratings))
        // Ratings & users
        .route("/rate-movie", post(handlers::rate_movie))
        .route("/users/:user_id", get(handlers::get_user))
        // Model lifecycle
        .route("/model-info", get(handlers::model_info))
        .route("/retrain", post(handlers::retrain_model))
        .layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(propagate_request_id_layer())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
