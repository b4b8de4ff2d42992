//! Canonical Knowledge Base v1.0 schema records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::utc_now;

pub const KB_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePatternRecord {
    pub id: String,
    pub name: String,
    pub pattern_type: String,
    pub description: String,
    pub suitable_regimes: Vec<String>,
    pub assets: Vec<String>,
    pub timeframes: Vec<String>,
    pub confidence_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    pub schema_version: String,
    pub created_at: String,
    pub updated_at: String,
}

impl KnowledgePatternRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: &str,
        pattern_type: &str,
        description: &str,
        suitable_regimes: Vec<String>,
        assets: Vec<String>,
        timeframes: Vec<String>,
        confidence_score: f64,
        source_ref: Option<&str>,
    ) -> Self {
        let now = utc_now();
        Self {
            id,
            name: name.to_string(),
            pattern_type: pattern_type.to_string(),
            description: description.to_string(),
            suitable_regimes,
            assets,
            timeframes,
            confidence_score,
            source_ref: source_ref.map(str::to_string),
            schema_version: KB_SCHEMA_VERSION.to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRegimeRecord {
    pub id: String,
    pub asset: String,
    pub regime: String,
    pub volatility: String,
    pub indicators: HashMap<String, f64>,
    pub start_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub schema_version: String,
    pub created_at: String,
}

impl MarketRegimeRecord {
    pub fn new(
        id: String,
        asset: &str,
        regime: &str,
        volatility: &str,
        indicators: HashMap<String, f64>,
        notes: Option<&str>,
    ) -> Self {
        let now = utc_now();
        Self {
            id,
            asset: asset.to_string(),
            regime: regime.to_string(),
            volatility: volatility.to_string(),
            indicators,
            start_at: now.clone(),
            end_at: None,
            notes: notes.map(str::to_string),
            schema_version: KB_SCHEMA_VERSION.to_string(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRecord {
    pub id: String,
    pub lesson: String,
    pub category: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub schema_version: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroEventRecord {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub impact: String,
    pub occurred_at: String,
    pub assets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub schema_version: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationEdgeRecord {
    pub id: String,
    pub source_asset: String,
    pub target_asset: String,
    pub correlation: f64,
    pub window: String,
    pub computed_at: String,
    pub schema_version: String,
}
