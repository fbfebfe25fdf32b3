use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded CSV dataset and its server-computed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: Option<DatasetSummary>,
}

impl Dataset {
    /// File name the report for this dataset is saved under
    pub fn report_file_name(&self) -> String {
        format!("{}_report.pdf", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_count: u64,
    pub averages: Averages,
    #[serde(default)]
    pub type_distribution: BTreeMap<String, u64>,
}

/// Column means over all rows of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    #[serde(rename = "Flowrate")]
    pub flowrate: f64,
    #[serde(rename = "Pressure")]
    pub pressure: f64,
    #[serde(rename = "Temperature")]
    pub temperature: f64,
}

/// One equipment type's slice of the type distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeShare {
    pub name: String,
    pub count: u64,
    pub percent: f64,
}

impl DatasetSummary {
    /// Type distribution as percentages, largest first (ties by name).
    pub fn type_shares(&self) -> Vec<TypeShare> {
        let total: u64 = self.type_distribution.values().sum();
        let mut shares: Vec<TypeShare> = self
            .type_distribution
            .iter()
            .map(|(name, &count)| TypeShare {
                name: name.clone(),
                count,
                percent: if total == 0 {
                    0.0
                } else {
                    count as f64 * 100.0 / total as f64
                },
            })
            .collect();
        shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        shares
    }
}

/// One CSV row, keyed by column header.
pub type DatasetRecord = serde_json::Map<String, serde_json::Value>;
