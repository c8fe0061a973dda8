pub mod csv_loader;

pub use csv_loader::{load_movies, load_movies_from_reader, load_ratings, load_ratings_from_reader};
