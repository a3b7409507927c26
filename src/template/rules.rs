//! Extraction rules: how one named field is located on a page

use serde::{Deserialize, Serialize};

use crate::extractor::Direction;
use crate::extractor::PatternKind;

/// One way of locating a field value.
///
/// Strategies are tried in order by the field resolver; the first one that
/// yields a non-empty value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    /// Text of the first element matching `locator`, or its `attribute`
    BySelector {
        locator: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attribute: Option<String>,
    },
    /// First validated pattern match in the scope's text
    ByPattern {
        pattern: PatternKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        context_keywords: Vec<String>,
    },
    /// Nearest element to a label whose text resembles `label`
    ByProximity {
        label: String,
        max_distance: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
}

impl Strategy {
    pub fn selector(locator: impl Into<String>) -> Self {
        Self::BySelector {
            locator: locator.into(),
            attribute: None,
        }
    }

    pub fn selector_attr(locator: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::BySelector {
            locator: locator.into(),
            attribute: Some(attribute.into()),
        }
    }

    #[must_use]
    pub fn pattern(pattern: PatternKind, context_keywords: &[&str]) -> Self {
        Self::ByPattern {
            pattern,
            context_keywords: context_keywords.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    pub fn proximity(
        label: impl Into<String>,
        max_distance: f64,
        direction: Option<Direction>,
    ) -> Self {
        Self::ByProximity {
            label: label.into(),
            max_distance,
            direction,
        }
    }

    /// Short name used in logs and error messages
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::BySelector { .. } => "selector",
            Self::ByPattern { .. } => "pattern",
            Self::ByProximity { .. } => "proximity",
        }
    }

    /// Reason this strategy can never produce a value, if any
    pub(crate) fn defect(&self) -> Option<String> {
        match self {
            Self::BySelector { locator, attribute } => {
                if locator.trim().is_empty() {
                    Some("selector locator is empty".to_string())
                } else if attribute.as_deref().is_some_and(|a| a.trim().is_empty()) {
                    Some("selector attribute name is empty".to_string())
                } else {
                    None
                }
            }
            Self::ByPattern { .. } => None,
            Self::ByProximity {
                label,
                max_distance,
                ..
            } => {
                if label.trim().is_empty() {
                    Some("proximity label is empty".to_string())
                } else if !max_distance.is_finite() || *max_distance <= 0.0 {
                    Some(format!("proximity max_distance must be positive, got {max_distance}"))
                } else {
                    None
                }
            }
        }
    }
}

/// A named field and the ordered strategies that locate it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub field_name: String,
    pub strategies: Vec<Strategy>,
}

impl ExtractionRule {
    pub fn new(field_name: impl Into<String>, strategies: Vec<Strategy>) -> Self {
        Self {
            field_name: field_name.into(),
            strategies,
        }
    }
}

/// Which page a rule set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageRole {
    List,
    Detail,
}

impl std::fmt::Display for PageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Detail => f.write_str("detail"),
        }
    }
}

/// Rules for one page role.
///
/// A list rule set with a `repeating_item_locator` produces one item per
/// matching element; without it the whole page is a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub role: PageRole,
    pub fields: Vec<ExtractionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeating_item_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_link_field: Option<String>,
}

impl RuleSet {
    #[must_use]
    pub fn list(
        repeating_item_locator: Option<&str>,
        fields: Vec<ExtractionRule>,
        detail_link_field: Option<&str>,
    ) -> Self {
        Self {
            role: PageRole::List,
            fields,
            repeating_item_locator: repeating_item_locator.map(str::to_string),
            detail_link_field: detail_link_field.map(str::to_string),
        }
    }

    #[must_use]
    pub fn detail(fields: Vec<ExtractionRule>) -> Self {
        Self {
            role: PageRole::Detail,
            fields,
            repeating_item_locator: None,
            detail_link_field: None,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ExtractionRule> {
        self.fields.iter().find(|r| r.field_name == name)
    }
}
