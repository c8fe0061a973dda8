use std::fs::File;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    error::{AppError, AppResult},
    models::{ItemId, ItemRecord, Rating, RatingSet, UserId},
};

/// In the MovieLens 100K layout the first six columns are metadata
/// (id, title, release dates, IMDb URL, "unknown"); one-hot genres follow.
const ONE_HOT_START: usize = 6;

#[derive(Debug, Deserialize)]
struct RatingRow {
    #[serde(rename = "userId", alias = "user_id")]
    user_id: UserId,
    #[serde(rename = "movieId", alias = "movie_id")]
    movie_id: ItemId,
    rating: f32,
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_ratings(path: &Path, scale: RangeInclusive<f32>) -> AppResult<RatingSet> {
    load_ratings_from_reader(File::open(path)?, scale)
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_movies(path: &Path) -> AppResult<Vec<ItemRecord>> {
    load_movies_from_reader(File::open(path)?)
}

/// Reads `userId,movieId,rating[,timestamp]` rows
///
/// Malformed rows and ratings that are not finite or fall outside `scale` are skipped.
pub fn load_ratings_from_reader<R: Read>(
    reader: R,
    scale: RangeInclusive<f32>,
) -> AppResult<RatingSet> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let headers = rdr.headers()?.clone();
    for required in [["userId", "user_id"], ["movieId", "movie_id"], ["rating", "rating"]] {
        if column(&headers, &required).is_none() {
            return Err(AppError::InvalidInput(format!(
                "ratings file is missing the '{}' column",
                required[0]
            )));
        }
    }

    let mut ratings = RatingSet::new();
    let mut skipped = 0usize;
    let mut out_of_scale = 0usize;

    for row in rdr.deserialize::<RatingRow>() {
        match row {
            // NaN fails `contains`, infinities sit outside any finite scale
            Ok(row) if scale.contains(&row.rating) => {
                ratings.push(Rating::new(row.user_id, row.movie_id, row.rating))
            }
            Ok(row) => {
                out_of_scale += 1;
                tracing::debug!(
                    user_id = row.user_id,
                    movie_id = row.movie_id,
                    rating = row.rating,
                    "Rating outside the scale"
                );
            }
            Err(e) => {
                skipped += 1;
                tracing::debug!(error = %e, "Malformed rating row");
            }
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped, "Skipped malformed rating rows");
    }
    if out_of_scale > 0 {
        tracing::warn!(
            out_of_scale,
            min = *scale.start(),
            max = *scale.end(),
            "Skipped ratings outside the rating scale"
        );
    }
    tracing::info!(ratings = ratings.len(), "Ratings loaded");

    Ok(ratings)
}

/// Reads movie metadata, normalising one-hot genre columns into a pipe-delimited tag string
pub fn load_movies_from_reader<R: Read>(reader: R) -> AppResult<Vec<ItemRecord>> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let id_col = column(&headers, &["movieId", "movie_id"])
        .ok_or_else(|| AppError::InvalidInput("movies file is missing 'movieId'".to_string()))?;
    let title_col = column(&headers, &["title"])
        .ok_or_else(|| AppError::InvalidInput("movies file is missing 'title'".to_string()))?;
    let genres_col = column(&headers, &["genres"]);

    let rows: Vec<StringRecord> = rdr.records().collect::<Result<_, _>>()?;

    let one_hot = match genres_col {
        Some(_) => Vec::new(),
        None => one_hot_genre_columns(&headers, &rows),
    };
    if genres_col.is_none() {
        tracing::info!(
            genre_columns = one_hot.len(),
            "No genres column, deriving tags from one-hot columns"
        );
    }

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in &rows {
        let Some(id) = row.get(id_col).and_then(|v| v.parse::<ItemId>().ok()) else {
            skipped += 1;
            continue;
        };
        let title = row.get(title_col).unwrap_or_default();
        let tags = match genres_col {
            Some(col) => row.get(col).unwrap_or_default().to_string(),
            None => one_hot
                .iter()
                .filter(|&&col| row.get(col) == Some("1"))
                .map(|&col| &headers[col])
                .collect::<Vec<_>>()
                .join("|"),
        };
        records.push(ItemRecord::new(id, title, tags));
    }

    if skipped > 0 {
        tracing::warn!(skipped, "Skipped movie rows without a numeric id");
    }
    tracing::info!(movies = records.len(), "Movies loaded");

    Ok(records)
}

fn column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| names.contains(&h))
}

fn one_hot_genre_columns(headers: &StringRecord, rows: &[StringRecord]) -> Vec<usize> {
    (ONE_HOT_START..headers.len())
        .filter(|&col| {
            rows.iter()
                .all(|row| matches!(row.get(col), Some("0") | Some("1")))
        })
        .collect()
}
