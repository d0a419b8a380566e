// 🏷️ Escalão Classifier - Categories as Data
// Birth date → category label via inclusive date ranges (first match wins)

use crate::error::{RegistryError, RegistryResult};
use anyhow::{anyhow, Context as AnyhowContext, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Label for birth dates outside every configured range
pub const OUT_OF_CATEGORY: &str = "Fora de escalão";

// ============================================================================
// BIRTH DATE PARSING
// ============================================================================

/// Accepted birth date formats: ISO first, then the Portuguese day-first form
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

pub fn parse_birth_date(raw: &str) -> RegistryResult<NaiveDate> {
    let trimmed = raw.trim();

    // Spreadsheet exports sometimes carry a midnight time component
    let date_part = trimmed.split_whitespace().next().unwrap_or("");

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .ok_or_else(|| {
            RegistryError::validation(
                "data_nascimento",
                format!("unparseable date '{}' (expected YYYY-MM-DD or DD/MM/YYYY)", trimmed),
            )
        })
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Category label (e.g. "Infantil A")
    pub label: String,

    /// First birth date in the range (inclusive)
    pub from: NaiveDate,

    /// Last birth date in the range (inclusive)
    pub to: NaiveDate,
}

impl CategoryRule {
    pub fn new(label: &str, from: (i32, u32, u32), to: (i32, u32, u32)) -> Option<Self> {
        Some(CategoryRule {
            label: label.to_string(),
            from: NaiveDate::from_ymd_opt(from.0, from.1, from.2)?,
            to: NaiveDate::from_ymd_opt(to.0, to.1, to.2)?,
        })
    }

    pub fn matches(&self, birth_date: NaiveDate) -> bool {
        self.from <= birth_date && birth_date <= self.to
    }

    fn overlaps(&self, other: &CategoryRule) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

// ============================================================================
// CATEGORY TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl CategoryTable {
    /// Table for the current edition of the race
    pub fn with_defaults() -> Self {
        let rules = [
            ("Infantil A", (2015, 1, 1), (2017, 12, 31)),
            ("Infantil B", (2013, 1, 1), (2014, 12, 31)),
            ("Iniciado", (2011, 1, 1), (2012, 12, 31)),
            ("Juvenil", (2008, 1, 1), (2010, 12, 31)),
            ("Júnior", (2004, 1, 1), (2007, 12, 31)),
        ]
        .iter()
        .filter_map(|(label, from, to)| CategoryRule::new(label, *from, *to))
        .collect();

        CategoryTable { rules }
    }

    /// Build a table, rejecting empty labels, inverted and overlapping ranges
    pub fn from_rules(rules: Vec<CategoryRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            if rule.label.trim().is_empty() {
                return Err(anyhow!("rule #{} has an empty label", i + 1));
            }
            if rule.from > rule.to {
                return Err(anyhow!(
                    "rule '{}' has an inverted range ({} > {})",
                    rule.label, rule.from, rule.to
                ));
            }
            if let Some(other) = rules[..i].iter().find(|other| other.overlaps(rule)) {
                return Err(anyhow!(
                    "rules '{}' and '{}' overlap",
                    other.label, rule.label
                ));
            }
        }

        Ok(CategoryTable { rules })
    }

    /// Load an edition-specific table from a JSON array of rules
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read category table: {:?}", path.as_ref()))?;

        let rules: Vec<CategoryRule> = serde_json::from_str(&content)
            .context("Failed to parse category table JSON")?;

        CategoryTable::from_rules(rules)
    }

    /// Classify a birth date; never fails
    pub fn classify(&self, birth_date: NaiveDate) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(birth_date))
            .map(|rule| rule.label.as_str())
            .unwrap_or(OUT_OF_CATEGORY)
    }

    /// Parse then classify a raw date string
    pub fn classify_str(&self, raw: &str) -> RegistryResult<String> {
        let birth_date = parse_birth_date(raw)?;
        Ok(self.classify(birth_date).to_string())
    }

    /// Configured labels in table order, followed by the out-of-category label
    pub fn labels(&self) -> Vec<&str> {
        self.rules
            .iter()
            .map(|rule| rule.label.as_str())
            .chain(std::iter::once(OUT_OF_CATEGORY))
            .collect()
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
