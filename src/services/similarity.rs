//! Content similarity over genre tags.
//!
//! Each tag label is one term (no stop-word filtering: labels are a closed
//! vocabulary). Items are embedded as L2-normalised TF-IDF vectors and compared
//! by cosine similarity, which reduces to a sparse dot product.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::instrument;

use super::catalog::Catalog;
use crate::{
    error::{AppError, AppResult},
    models::{Item, ItemId},
};

/// Sparse TF-IDF vector: (term index, weight), sorted by term index
type SparseVector = Vec<(usize, f32)>;

/// Precomputed nearest-neighbour rows for every catalog item
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    item_ids: Vec<ItemId>,
    positions: HashMap<ItemId, usize>,
    vocabulary: Vec<String>,
    vectors: Vec<SparseVector>,
    /// Non-zero neighbours per item, best first, self excluded
    rows: Vec<Vec<(usize, f32)>>,
    /// Item positions ordered by ascending id, used to pad results with zero-score items
    by_id: Vec<usize>,
}

#[instrument(skip_all, fields(movies = catalog.len()))]
pub fn build_similarity_index(catalog: &Catalog) -> SimilarityIndex {
    let items = catalog.all_items();
    let n = items.len();

    let mut term_ids: HashMap<String, usize> = HashMap::new();
    let mut vocabulary: Vec<String> = Vec::new();
    let mut doc_freq: Vec<usize> = Vec::new();

    let term_counts: Vec<Vec<(usize, f32)>> = items
        .iter()
        .map(|item| {
            let mut counts: Vec<(usize, f32)> = Vec::new();
            for term in tokenize(item) {
                let id = *term_ids.entry(term.clone()).or_insert_with(|| {
                    vocabulary.push(term);
                    doc_freq.push(0);
                    vocabulary.len() - 1
                });
                match counts.iter_mut().find(|(t, _)| *t == id) {
                    Some((_, count)) => *count += 1.0,
                    None => {
                        counts.push((id, 1.0));
                        doc_freq[id] += 1;
                    }
                }
            }
            counts.sort_by_key(|(t, _)| *t);
            counts
        })
        .collect();

    // Smoothed IDF: ln((1 + n) / (1 + df)) + 1
    let idf: Vec<f32> = doc_freq
        .iter()
        .map(|&df| ((1.0 + n as f32) / (1.0 + df as f32)).ln() + 1.0)
        .collect();

    let vectors: Vec<SparseVector> = term_counts
        .into_iter()
        .map(|counts| {
            let mut vector: SparseVector = counts
                .into_iter()
                .map(|(t, tf)| (t, tf * idf[t]))
                .collect();
            normalize(&mut vector);
            vector
        })
        .collect();

    let mut postings: Vec<Vec<(usize, f32)>> = vec![Vec::new(); vocabulary.len()];
    for (pos, vector) in vectors.iter().enumerate() {
        for &(t, weight) in vector {
            postings[t].push((pos, weight));
        }
    }

    let item_ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();

    let rows: Vec<Vec<(usize, f32)>> = (0..n)
        .into_par_iter()
        .map(|pos| similarity_row(pos, &vectors[pos], &postings, &item_ids))
        .collect();

    let mut by_id: Vec<usize> = (0..n).collect();
    by_id.sort_by_key(|&pos| item_ids[pos]);

    let positions = item_ids
        .iter()
        .enumerate()
        .map(|(pos, &id)| (id, pos))
        .collect();

    let index = SimilarityIndex {
        item_ids,
        positions,
        vocabulary,
        vectors,
        rows,
        by_id,
    };

    if index.has_signal() {
        tracing::info!(
            movies = n,
            terms = index.vocabulary.len(),
            "Similarity index built"
        );
    } else {
        tracing::warn!(movies = n, "No genre tags in catalog, similarity is unavailable");
    }

    index
}

fn tokenize(item: &Item) -> Vec<String> {
    item.tag_labels().map(str::to_lowercase).collect()
}

fn normalize(vector: &mut SparseVector) {
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
}

fn similarity_row(
    pos: usize,
    vector: &SparseVector,
    postings: &[Vec<(usize, f32)>],
    item_ids: &[ItemId],
) -> Vec<(usize, f32)> {
    let mut scores = vec![0.0f32; item_ids.len()];
    let mut touched: Vec<usize> = Vec::new();

    for &(t, weight) in vector {
        for &(other, other_weight) in &postings[t] {
            if other == pos {
                continue;
            }
            if scores[other] == 0.0 {
                touched.push(other);
            }
            scores[other] += weight * other_weight;
        }
    }

    let mut row: Vec<(usize, f32)> = touched
        .into_iter()
        .map(|other| (other, scores[other]))
        .filter(|&(_, score)| score > 0.0)
        .collect();
    row.sort_by(|a, b| b.1.total_cmp(&a.1).then(item_ids[a.0].cmp(&item_ids[b.0])));
    row
}

impl SimilarityIndex {
    /// The `k` items closest to `item_id`, best first, ties by ascending id
    ///
    /// Items with no shared tags still qualify (score 0) after every non-zero
    /// neighbour, so fewer than `k` results means the catalog ran out of items.
    pub fn similar(&self, item_id: ItemId, k: usize) -> AppResult<Vec<(ItemId, f32)>> {
        if !self.has_signal() {
            return Err(AppError::Unavailable(
                "Genre similarity data not available".to_string(),
            ));
        }

        let pos = *self
            .positions
            .get(&item_id)
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", item_id)))?;

        let row = &self.rows[pos];
        let mut results: Vec<(ItemId, f32)> = row
            .iter()
            .take(k)
            .map(|&(other, score)| (self.item_ids[other], score))
            .collect();

        if results.len() < k {
            let mut in_row = vec![false; self.item_ids.len()];
            for &(other, _) in row {
                in_row[other] = true;
            }
            let padding = self
                .by_id
                .iter()
                .filter(|&&other| other != pos && !in_row[other])
                .take(k - results.len())
                .map(|&other| (self.item_ids[other], 0.0));
            results.extend(padding);
        }

        Ok(results)
    }

    /// Cosine similarity between two catalog items
    pub fn similarity(&self, a: ItemId, b: ItemId) -> AppResult<f32> {
        let lookup = |id: ItemId| {
            self.positions
                .get(&id)
                .map(|&pos| &self.vectors[pos])
                .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", id)))
        };
        Ok(sparse_dot(lookup(a)?, lookup(b)?))
    }

    /// False when every item's tag string is empty
    pub fn has_signal(&self) -> bool {
        !self.vocabulary.is_empty()
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let (mut i, mut j, mut sum) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}
