mod movie;
mod rating;

pub use movie::{Item, ItemRecord};
pub use rating::{Rating, RatingSet};

/// Identifier of a user in the rating corpus
pub type UserId = u32;

/// Identifier of a movie in the catalog
pub type ItemId = u32;
