use serde::{Deserialize, Serialize};

use super::ItemId;

/// Raw movie metadata as delivered by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub title: String,
    /// Pipe- or comma-delimited genre labels, possibly empty
    pub tags: String,
}

impl ItemRecord {
    pub fn new(id: ItemId, title: impl Into<String>, tags: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            tags: tags.into(),
        }
    }
}

/// A movie in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub tags: String,
    /// Release year parsed from a trailing "(YYYY)" in the title
    pub year: Option<i32>,
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        let year = extract_year(&record.title);
        Self {
            id: record.id,
            title: record.title,
            tags: record.tags,
            year,
        }
    }
}

impl Item {
    /// Individual genre labels, trimmed, empties dropped
    pub fn tag_labels(&self) -> impl Iterator<Item = &str> {
        self.tags
            .split(|c| c == '|' || c == ',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }

    pub fn has_tags(&self) -> bool {
        self.tag_labels().next().is_some()
    }

    /// Genre string for display; empty tags render as "N/A"
    pub fn genres_display(&self) -> &str {
        if self.has_tags() {
            &self.tags
        } else {
            "N/A"
        }
    }
}

fn extract_year(title: &str) -> Option<i32> {
    let inner = title.trim().strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let digits = &inner[open + 1..];
    if digits.len() != 4 {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_extracted_from_title() {
        let item: Item = ItemRecord::new(1, "Toy Story (1995)", "Animation|Comedy").into();
        assert_eq!(item.year, Some(1995));
    }

    #[test]
    fn test_year_missing_or_malformed() {
        assert_eq!(extract_year("Heat"), None);
        assert_eq!(extract_year("Se7en (19x5)"), None);
        assert_eq!(extract_year("Movie (Director's Cut)"), None);
        assert_eq!(extract_year("  GoldenEye (1995)  "), Some(1995));
    }

    #[test]
    fn test_tag_labels_accept_both_delimiters() {
        let piped: Item = ItemRecord::new(1, "A", "Action|Crime").into();
        let commas: Item = ItemRecord::new(2, "B", "Action, Adventure ,").into();

        assert_eq!(piped.tag_labels().collect::<Vec<_>>(), vec!["Action", "Crime"]);
        assert_eq!(commas.tag_labels().collect::<Vec<_>>(), vec!["Action", "Adventure"]);
    }

    #[test]
    fn test_empty_tags_display_as_na() {
        let item: Item = ItemRecord::new(3, "Untagged", " | ").into();
        assert!(!item.has_tags());
        assert_eq!(item.genres_display(), "N/A");
    }
}
