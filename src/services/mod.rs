pub mod catalog;
pub mod engine;
pub mod predictor;
pub mod recommendations;
pub mod similarity;

pub use catalog::{build_catalog, Catalog};
pub use engine::{ContentSnapshot, Engine, ModelSnapshot};
pub use predictor::{
    train_predictor, Evaluation, FoldedUser, Hyperparameters, PredictorModel, TrainingWarning,
};
pub use recommendations::{recommend, Recommendation};
pub use similarity::{build_similarity_index, SimilarityIndex};
