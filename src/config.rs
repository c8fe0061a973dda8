use std::path::PathBuf;

use serde::Deserialize;

use crate::services::Hyperparameters;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// CSV with movieId, title and genres (or one-hot genre columns)
    #[serde(default = "default_movies_path")]
    pub movies_path: PathBuf,

    /// CSV with userId, movieId, rating
    #[serde(default = "default_ratings_path")]
    pub ratings_path: PathBuf,

    /// Latent dimension of the factorization model
    #[serde(default = "default_rank")]
    pub model_rank: usize,

    #[serde(default = "default_epochs")]
    pub model_epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub model_learning_rate: f32,

    #[serde(default = "default_regularization")]
    pub model_regularization: f32,

    #[serde(default = "default_init_std")]
    pub model_init_std: f32,

    /// SGD passes for folding ephemeral ratings into the model
    #[serde(default = "default_fold_in_epochs")]
    pub model_fold_in_epochs: usize,

    /// Seed for embedding initialisation, shuffling and the hold-out split
    #[serde(default = "default_seed")]
    pub model_seed: u64,

    #[serde(default = "default_rating_min")]
    pub rating_min: f32,

    #[serde(default = "default_rating_max")]
    pub rating_max: f32,

    /// Share of ratings held out for evaluation on every training run
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_movies_path() -> PathBuf {
    PathBuf::from("data/movies.csv")
}

fn default_ratings_path() -> PathBuf {
    PathBuf::from("data/ratings.csv")
}

fn default_rank() -> usize {
    100
}

fn default_epochs() -> usize {
    20
}

fn default_learning_rate() -> f32 {
    0.005
}

fn default_regularization() -> f32 {
    0.02
}

fn default_init_std() -> f32 {
    0.1
}

fn default_fold_in_epochs() -> usize {
    50
}

fn default_seed() -> u64 {
    42
}

fn default_rating_min() -> f32 {
    1.0
}

fn default_rating_max() -> f32 {
    5.0
}

fn default_test_fraction() -> f32 {
    0.2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            movies_path: default_movies_path(),
            ratings_path: default_ratings_path(),
            model_rank: default_rank(),
            model_epochs: default_epochs(),
            model_learning_rate: default_learning_rate(),
            model_regularization: default_regularization(),
            model_init_std: default_init_std(),
            model_fold_in_epochs: default_fold_in_epochs(),
            model_seed: default_seed(),
            rating_min: default_rating_min(),
            rating_max: default_rating_max(),
            test_fraction: default_test_fraction(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.rating_min < self.rating_max) {
            anyhow::bail!(
                "RATING_MIN ({}) must be below RATING_MAX ({})",
                self.rating_min,
                self.rating_max
            );
        }
        if self.model_rank == 0 {
            anyhow::bail!("MODEL_RANK must be positive");
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            anyhow::bail!("TEST_FRACTION must be in [0, 1), got {}", self.test_fraction);
        }
        if !self.model_init_std.is_finite() || self.model_init_std < 0.0 {
            anyhow::bail!("MODEL_INIT_STD must be a non-negative number");
        }
        self.hyperparameters().validate()?;
        Ok(())
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            rank: self.model_rank,
            epochs: self.model_epochs,
            learning_rate: self.model_learning_rate,
            regularization: self.model_regularization,
            init_std: self.model_init_std,
            rating_min: self.rating_min,
            rating_max: self.rating_max,
            seed: self.model_seed,
            fold_in_epochs: self.model_fold_in_epochs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_hyperparameter_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hyperparameters(), Hyperparameters::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars = vec![
            ("PORT".to_string(), "9100".to_string()),
            ("MODEL_RANK".to_string(), "16".to_string()),
            ("RATING_MIN".to_string(), "0.5".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.hyperparameters().rank, 16);
        assert_eq!(config.rating_min, 0.5);
        assert_eq!(config.model_epochs, 20);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let config = Config {
            rating_min: 5.0,
            rating_max: 1.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            test_fraction: 1.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            rating_max: f32::INFINITY,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
