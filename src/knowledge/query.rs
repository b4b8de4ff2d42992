//! Knowledge Base query service for the /v2 retrieval endpoints.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::knowledge::models::{KnowledgePatternRecord, LessonRecord, MarketRegimeRecord};
use crate::store::StateStore;

/// One scored retrieval hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSearchItem {
    pub kind: String,
    pub id: String,
    pub title: String,
    pub summary: String,
    pub score: f64,
    pub evidence: Value,
}

/// Substring-scored retrieval over in-memory KB records. Patterns score by
/// how much of the haystack the query covers; lessons rank below patterns at
/// a fixed score.
pub struct KnowledgeQueryService {
    store: Arc<StateStore>,
}

impl KnowledgeQueryService {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    pub fn search(
        &self,
        query: &str,
        assets: Option<&[String]>,
        limit: usize,
    ) -> Vec<KnowledgeSearchItem> {
        let normalized_query = query.to_lowercase().trim().to_string();
        let asset_filter: Vec<String> = assets
            .unwrap_or_default()
            .iter()
            .map(|asset| asset.to_uppercase())
            .collect();

        let mut scored: Vec<(i64, KnowledgeSearchItem)> = Vec::new();

        for pattern in self.store.knowledge_patterns.read().values() {
            let haystack = format!(
                "{} {} {} {}",
                pattern.name,
                pattern.description,
                pattern.pattern_type,
                pattern.suitable_regimes.join(" ")
            )
            .to_lowercase();
            if !haystack.contains(&normalized_query) {
                continue;
            }
            if !asset_filter.is_empty() {
                let pattern_assets: Vec<String> =
                    pattern.assets.iter().map(|a| a.to_uppercase()).collect();
                if !asset_filter.iter().any(|asset| pattern_assets.contains(asset)) {
                    continue;
                }
            }
            let residual = haystack.replacen(&normalized_query, "", 1).len() as i64;
            let score = 100 - residual;
            scored.push((
                score,
                KnowledgeSearchItem {
                    kind: "pattern".to_string(),
                    id: pattern.id.clone(),
                    title: pattern.name.clone(),
                    summary: pattern.description.clone(),
                    score: score.max(1) as f64,
                    evidence: json!({
                        "assets": pattern.assets,
                        "regimes": pattern.suitable_regimes,
                    }),
                },
            ));
        }

        for lesson in self.store.lessons.read().values() {
            if !normalized_query.is_empty()
                && !lesson.lesson.to_lowercase().contains(&normalized_query)
            {
                continue;
            }
            scored.push((
                40,
                KnowledgeSearchItem {
                    kind: "lesson".to_string(),
                    id: lesson.id.clone(),
                    title: lesson.category.clone(),
                    summary: lesson.lesson.clone(),
                    score: 40.0,
                    evidence: json!({
                        "tags": lesson.tags,
                        "strategyId": lesson.strategy_id,
                    }),
                },
            ));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .map(|(_, item)| item)
            .take(limit.max(1))
            .collect()
    }

    pub fn list_patterns(
        &self,
        pattern_type: Option<&str>,
        asset: Option<&str>,
        limit: usize,
    ) -> Vec<KnowledgePatternRecord> {
        let mut items: Vec<KnowledgePatternRecord> =
            self.store.knowledge_patterns.read().values().cloned().collect();
        if let Some(pattern_type) = pattern_type {
            items.retain(|item| item.pattern_type == pattern_type);
        }
        if let Some(asset) = asset {
            let needle = asset.to_uppercase();
            items.retain(|item| item.assets.iter().any(|a| a.to_uppercase() == needle));
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items.into_iter().take(limit.max(1)).collect()
    }

    /// The active (open-ended) regime for an asset, if any.
    pub fn get_regime(&self, asset: &str) -> Option<MarketRegimeRecord> {
        let needle = asset.to_uppercase();
        self.store
            .market_regimes
            .read()
            .values()
            .find(|regime| regime.asset.to_uppercase() == needle && regime.end_at.is_none())
            .cloned()
    }

    pub fn recent_lessons(&self, limit: usize) -> Vec<LessonRecord> {
        let mut lessons: Vec<LessonRecord> = self.store.lessons.read().values().cloned().collect();
        lessons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        lessons.into_iter().take(limit.max(1)).collect()
    }
}
