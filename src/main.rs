use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use movie_rec_api::api::{create_router, AppState};
use movie_rec_api::config::Config;
use movie_rec_api::data;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "movie_rec_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Load data and train the first model generation off the async runtime
    let state = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<AppState> {
            let records = data::load_movies(&config.movies_path)
                .with_context(|| format!("loading movies from {}", config.movies_path.display()))?;
            let scale = config.rating_min..=config.rating_max;
            let ratings = data::load_ratings(&config.ratings_path, scale).with_context(|| {
                format!("loading ratings from {}", config.ratings_path.display())
            })?;
            tracing::info!(
                movies = records.len(),
                ratings = ratings.len(),
                "Data loaded, training initial model"
            );
            Ok(AppState::from_data(records, ratings, config))
        })
        .await??
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
