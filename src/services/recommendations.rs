use std::collections::HashMap;

use serde::Serialize;

use super::catalog::Catalog;
use super::predictor::{FoldedUser, PredictorModel};
use crate::{
    error::{AppError, AppResult},
    models::{Item, ItemId, RatingSet, UserId},
};

/// A recommended movie with its predicted rating rounded to two decimals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub item: Item,
    pub score: f32,
}

enum Scorer<'a> {
    Trained(&'a PredictorModel, UserId),
    Folded(&'a PredictorModel, FoldedUser),
}

impl Scorer<'_> {
    fn score(&self, item_id: ItemId) -> f32 {
        match self {
            Scorer::Trained(model, user_id) => model.predict(*user_id, item_id),
            Scorer::Folded(model, user) => model.predict_folded(user, item_id),
        }
    }
}

/// Top-`n` unrated catalog items for a user
///
/// Items the user rated in `ratings` or in `ephemeral` are never recommended.
/// When ephemeral ratings are supplied they are folded into a throwaway copy
/// of the user's parameters; `ratings` and `predictor` are left untouched.
/// Ranking is by raw predicted score, ties broken by ascending item id.
pub fn recommend(
    user_id: UserId,
    n: usize,
    predictor: &PredictorModel,
    catalog: &Catalog,
    ratings: &RatingSet,
    ephemeral: Option<&[(ItemId, f32)]>,
) -> AppResult<Vec<Recommendation>> {
    let ephemeral = ephemeral.filter(|extra| !extra.is_empty());

    let mut rated: Vec<(ItemId, f32)> = Vec::new();
    let mut positions: HashMap<ItemId, usize> = HashMap::new();
    let persisted = ratings.for_user(user_id).into_iter().map(|r| (r.item_id, r.rating));
    for (item_id, rating) in persisted.chain(ephemeral.unwrap_or_default().iter().copied()) {
        match positions.get(&item_id) {
            Some(&idx) => rated[idx].1 = rating,
            None => {
                positions.insert(item_id, rated.len());
                rated.push((item_id, rating));
            }
        }
    }

    if rated.is_empty() {
        return Err(AppError::UnknownUser(user_id));
    }

    let scorer = match ephemeral {
        Some(_) => Scorer::Folded(predictor, predictor.fold_in(Some(user_id), &rated)),
        None => Scorer::Trained(predictor, user_id),
    };

    let mut candidates: Vec<(&Item, f32)> = catalog
        .all_items()
        .iter()
        .filter(|item| !positions.contains_key(&item.id))
        .map(|item| (item, scorer.score(item.id)))
        .collect();

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
    candidates.truncate(n);

    tracing::debug!(
        user_id,
        rated = rated.len(),
        ephemeral = ephemeral.map_or(0, |extra| extra.len()),
        returned = candidates.len(),
        "Recommendations ranked"
    );

    Ok(candidates
        .into_iter()
        .map(|(item, score)| Recommendation {
            item: item.clone(),
            score: round2(score),
        })
        .collect())
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
