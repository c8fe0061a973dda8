use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{ItemId, UserId};

/// A single observed (user, item, rating) triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: f32,
}

impl Rating {
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32) -> Self {
        Self {
            user_id,
            item_id,
            rating,
        }
    }
}

/// Append-only rating corpus
///
/// Every submitted row is retained, but all read operations go through a
/// last-write-wins view: for a repeated (user, item) pair the most recently
/// appended rating is authoritative. Pairs keep the position of their first
/// appearance so the view is stable for training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingSet {
    ratings: Vec<Rating>,
}

impl From<Vec<Rating>> for RatingSet {
    fn from(ratings: Vec<Rating>) -> Self {
        Self { ratings }
    }
}

impl RatingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rating: Rating) {
        self.ratings.push(rating);
    }

    pub fn extend(&mut self, ratings: impl IntoIterator<Item = Rating>) {
        self.ratings.extend(ratings);
    }

    /// Number of stored rows, duplicates included
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// All stored rows in insertion order
    pub fn raw(&self) -> &[Rating] {
        &self.ratings
    }

    /// Last-write-wins view of the corpus
    pub fn deduplicated(&self) -> Vec<Rating> {
        last_write_wins(self.ratings.iter())
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.ratings.iter().any(|r| r.user_id == user_id)
    }

    /// Deduplicated ratings of one user
    pub fn for_user(&self, user_id: UserId) -> Vec<Rating> {
        last_write_wins(self.ratings.iter().filter(|r| r.user_id == user_id))
    }

    pub fn user_average(&self, user_id: UserId) -> Option<f32> {
        mean(self.for_user(user_id).iter().map(|r| r.rating))
    }

    pub fn item_average(&self, item_id: ItemId) -> Option<f32> {
        let ratings = last_write_wins(self.ratings.iter().filter(|r| r.item_id == item_id));
        mean(ratings.iter().map(|r| r.rating))
    }

    pub fn distinct_users(&self) -> usize {
        let mut users: Vec<UserId> = self.ratings.iter().map(|r| r.user_id).collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    /// Items ordered by average rating, highest first, ties by ascending id
    pub fn top_rated(&self, n: usize) -> Vec<(ItemId, f32)> {
        self.top_rated_where(n, |_| true)
    }

    /// Like [`RatingSet::top_rated`], restricted to items accepted by `keep` before truncating to `n`
    pub fn top_rated_where(&self, n: usize, keep: impl Fn(ItemId) -> bool) -> Vec<(ItemId, f32)> {
        let mut sums: HashMap<ItemId, (f64, usize)> = HashMap::new();
        for rating in self.deduplicated().into_iter().filter(|r| keep(r.item_id)) {
            let entry = sums.entry(rating.item_id).or_insert((0.0, 0));
            entry.0 += rating.rating as f64;
            entry.1 += 1;
        }

        let mut averages: Vec<(ItemId, f32)> = sums
            .into_iter()
            .map(|(item_id, (sum, count))| (item_id, (sum / count as f64) as f32))
            .collect();
        averages.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        averages.truncate(n);
        averages
    }

    /// Random hold-out split of the deduplicated view
    ///
    /// Returns `(train, test)`; `test_fraction` of the shuffled rows go to test.
    pub fn train_test_split<R: Rng>(&self, rng: &mut R, test_fraction: f32) -> (Self, Self) {
        let mut rows = self.deduplicated();
        rows.shuffle(rng);

        let test_len = ((test_fraction.clamp(0.0, 1.0) * rows.len() as f32) as usize).min(rows.len());
        let train = rows.split_off(test_len);

        (Self::from(train), Self::from(rows))
    }
}

fn last_write_wins<'a>(ratings: impl Iterator<Item = &'a Rating>) -> Vec<Rating> {
    let mut positions: HashMap<(UserId, ItemId), usize> = HashMap::new();
    let mut out: Vec<Rating> = Vec::new();

    for rating in ratings {
        match positions.get(&(rating.user_id, rating.item_id)) {
            Some(&idx) => out[idx].rating = rating.rating,
            None => {
                positions.insert((rating.user_id, rating.item_id), out.len());
                out.push(*rating);
            }
        }
    }

    out
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
    (count > 0).then(|| (sum / count as f64) as f32)
}
