use std::collections::HashMap;

use crate::{
    error::{AppError, AppResult},
    models::{Item, ItemId, ItemRecord},
};

/// Movie catalog keyed by id, iterable in source order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<Item>,
    positions: HashMap<ItemId, usize>,
}

/// Builds the catalog from raw item records
///
/// The first record for an id wins; later duplicates are dropped.
pub fn build_catalog(records: impl IntoIterator<Item = ItemRecord>) -> Catalog {
    let mut items = Vec::new();
    let mut positions = HashMap::new();
    let mut duplicates = 0usize;

    for record in records {
        if positions.contains_key(&record.id) {
            duplicates += 1;
            tracing::warn!(movie_id = record.id, "Duplicate movie id in catalog, skipping");
            continue;
        }
        positions.insert(record.id, items.len());
        items.push(Item::from(record));
    }

    tracing::info!(movies = items.len(), duplicates, "Catalog built");

    Catalog { items, positions }
}

impl Catalog {
    pub fn lookup(&self, item_id: ItemId) -> AppResult<&Item> {
        self.positions
            .get(&item_id)
            .map(|&idx| &self.items[idx])
            .ok_or_else(|| AppError::NotFound(format!("Movie {} not found", item_id)))
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.positions.contains_key(&item_id)
    }

    /// Items in insertion order
    pub fn all_items(&self) -> &[Item] {
        &self.items
    }

    /// Case-insensitive exact title match; first match in catalog order wins
    pub fn find_by_title(&self, title: &str) -> AppResult<&Item> {
        let needle = title.trim().to_lowercase();
        self.items
            .iter()
            .find(|item| item.title.to_lowercase() == needle)
            .ok_or_else(|| AppError::NotFound(format!("Movie titled '{}' not found", title)))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        build_catalog(vec![
            ItemRecord::new(3, "GoldenEye (1995)", "Action|Adventure"),
            ItemRecord::new(1, "Toy Story (1995)", "Animation|Comedy"),
            ItemRecord::new(2, "Heat (1995)", "Action|Crime"),
        ])
    }

    #[test]
    fn test_lookup_and_contains() {
        let catalog = catalog();
        assert_eq!(catalog.lookup(1).unwrap().title, "Toy Story (1995)");
        assert!(catalog.contains(2));
        assert!(!catalog.contains(9));
        assert!(matches!(catalog.lookup(9), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_all_items_keeps_source_order() {
        let catalog = catalog();
        let ids: Vec<ItemId> = catalog.all_items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(ids, catalog.all_items().iter().map(|i| i.id).collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicate_ids_keep_first_record() {
        let catalog = build_catalog(vec![
            ItemRecord::new(1, "First", ""),
            ItemRecord::new(1, "Second", ""),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup(1).unwrap().title, "First");
    }

    #[test]
    fn test_find_by_title_is_case_insensitive() {
        let catalog = build_catalog(vec![
            ItemRecord::new(5, "Heat (1995)", "Action"),
            ItemRecord::new(6, "HEAT (1995)", "Drama"),
        ]);
        assert_eq!(catalog.find_by_title("heat (1995)").unwrap().id, 5);
        assert!(matches!(
            catalog.find_by_title("Cold"),
            Err(AppError::NotFound(_))
        ));
    }
}
