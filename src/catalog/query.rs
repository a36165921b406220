//! Episode listing filters and pagination.

use serde::{Deserialize, Serialize};

use super::{Category, Episode};

/// Episodes per page on the listing
pub const DEFAULT_PAGE_SIZE: usize = 9;

/// Upper bound for a single page
pub const MAX_PAGE_SIZE: usize = 100;

/// Category value meaning "no category filter"
const ALL_CATEGORIES: &str = "Todos";

/// Listing filters, deserialized from the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeQuery {
    /// Case-insensitive search over title, description and author
    pub q: Option<String>,
    pub category: Option<String>,
    /// Comma separated grades; an episode matches if its grade contains any
    pub grade: Option<String>,
    pub featured: Option<bool>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// One page of filtered episodes
#[derive(Debug, Clone, Serialize)]
pub struct EpisodePage {
    pub items: Vec<Episode>,
    /// Number of episodes matching the filters
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl EpisodeQuery {
    pub fn featured() -> Self {
        Self {
            featured: Some(true),
            limit: Some(MAX_PAGE_SIZE),
            ..Default::default()
        }
    }

    fn category_filter(&self) -> Option<Option<Category>> {
        let raw = self.category.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        if raw.eq_ignore_ascii_case(ALL_CATEGORIES) {
            return None;
        }
        // An unknown category matches nothing rather than everything
        Some(raw.parse().ok())
    }

    fn grades(&self) -> Vec<String> {
        self.grade
            .as_deref()
            .map(|g| {
                g.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            let hit = episode.title.to_lowercase().contains(&q)
                || episode.description.to_lowercase().contains(&q)
                || episode.author.to_lowercase().contains(&q);
            if !hit {
                return false;
            }
        }

        if let Some(category) = self.category_filter() {
            if category != Some(episode.category) {
                return false;
            }
        }

        let grades = self.grades();
        if !grades.is_empty() {
            let grade = episode.grade.to_lowercase();
            if !grades.iter().any(|g| grade.contains(g.as_str())) {
                return false;
            }
        }

        if let Some(featured) = self.featured {
            if episode.featured != featured {
                return false;
            }
        }

        true
    }

    /// Filter, order newest first and slice one page
    pub fn apply(&self, episodes: Vec<Episode>) -> EpisodePage {
        let mut matching: Vec<Episode> = episodes.into_iter().filter(|e| self.matches(e)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.title.cmp(&b.title))
        });

        let total = matching.len();
        let offset = self.offset.unwrap_or(0);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let items: Vec<Episode> = matching.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(items.len()) < total;

        EpisodePage {
            items,
            total,
            offset,
            limit,
            has_more,
        }
    }
}
