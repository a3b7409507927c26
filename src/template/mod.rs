//! Template documents
//!
//! A template describes one site: where the listing lives, how items and
//! their fields are located, how more items are revealed, and how politely
//! detail pages are fetched. Templates are validated when loaded so that
//! malformed rules surface as configuration errors before any page is touched.
//!
//! Only the current document version is accepted. Migrating older documents
//! happens before they reach this crate.

pub mod load_strategy;
pub mod rules;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawl_engine::rate_limiter::RateLimitConfig;
use crate::page_source::is_xpath;
use crate::utils::constants::CURRENT_TEMPLATE_VERSION;
use crate::utils::is_valid_url;

pub use load_strategy::{LoadKind, LoadStrategyConfig};
pub use rules::{ExtractionRule, PageRole, RuleSet, Strategy};

/// Problems found while loading or validating a template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed template document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported template version '{found}' (expected '{expected}')")]
    UnsupportedVersion { found: String, expected: String },

    #[error("site_url '{0}' is not an http(s) URL")]
    InvalidSiteUrl(String),

    #[error("{role} rule set has no fields")]
    EmptyRuleSet { role: PageRole },

    #[error("{role} rule set is declared with role {found}")]
    RoleMismatch { role: PageRole, found: PageRole },

    #[error("field '{field}' in {role} rule set has no strategies")]
    NoStrategies { role: PageRole, field: String },

    #[error("field '{field}' appears more than once in {role} rule set")]
    DuplicateField { role: PageRole, field: String },

    #[error("field '{field}' in {role} rule set: {reason}")]
    InvalidStrategy {
        role: PageRole,
        field: String,
        reason: String,
    },

    #[error("{role} rule set: detail_link_field '{field}' is not one of its fields")]
    UnknownDetailLinkField { role: PageRole, field: String },

    #[error("detail rules are defined but the list rule set has no detail_link_field")]
    MissingDetailLink,

    #[error("{0}")]
    InvalidRuleSet(String),

    #[error("invalid load strategy: {0}")]
    InvalidLoadStrategy(String),

    #[error("unknown rate limit preset '{0}'")]
    UnknownPreset(String),
}

/// A fully resolved, current-version template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub version: String,
    pub site_url: String,
    pub list: RuleSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<RuleSet>,
    #[serde(default)]
    pub load_strategy: LoadStrategyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_preset: Option<String>,
}

impl Template {
    /// A current-version template with default load strategy and no detail rules
    pub fn new(name: impl Into<String>, site_url: impl Into<String>, list: RuleSet) -> Self {
        Self {
            name: name.into(),
            version: CURRENT_TEMPLATE_VERSION.to_string(),
            site_url: site_url.into(),
            list,
            detail: None,
            load_strategy: LoadStrategyConfig::default(),
            rate_limit_preset: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: RuleSet) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn with_load_strategy(mut self, load_strategy: LoadStrategyConfig) -> Self {
        self.load_strategy = load_strategy;
        self
    }

    #[must_use]
    pub fn with_rate_limit_preset(mut self, preset: impl Into<String>) -> Self {
        self.rate_limit_preset = Some(preset.into());
        self
    }

    /// Parse and validate a JSON template document
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let template: Self = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    /// Read, parse and validate a JSON template file
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TemplateError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_json(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rate limit configuration named by `rate_limit_preset`, if any
    pub fn rate_limit(&self) -> Result<Option<RateLimitConfig>, TemplateError> {
        match &self.rate_limit_preset {
            None => Ok(None),
            Some(name) => RateLimitConfig::preset(name)
                .map(Some)
                .ok_or_else(|| TemplateError::UnknownPreset(name.clone())),
        }
    }

    /// Check every structural invariant the pipeline relies on
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.version != CURRENT_TEMPLATE_VERSION {
            return Err(TemplateError::UnsupportedVersion {
                found: self.version.clone(),
                expected: CURRENT_TEMPLATE_VERSION.to_string(),
            });
        }
        if !is_valid_url(&self.site_url) {
            return Err(TemplateError::InvalidSiteUrl(self.site_url.clone()));
        }

        validate_rule_set(&self.list, PageRole::List)?;
        if let Some(item_locator) = self.list.repeating_item_locator.as_deref() {
            if item_locator.trim().is_empty() {
                return Err(TemplateError::InvalidRuleSet(
                    "list rule set: repeating_item_locator is empty".to_string(),
                ));
            }
            // List fields resolve inside each item, where XPath is unavailable
            if let Some(rule) = self.list.fields.iter().find(|rule| {
                rule.strategies.iter().any(|s| {
                    matches!(s, Strategy::BySelector { locator, .. } if is_xpath(locator))
                })
            }) {
                return Err(TemplateError::InvalidStrategy {
                    role: PageRole::List,
                    field: rule.field_name.clone(),
                    reason: "XPath selectors cannot be scoped to a repeating item".to_string(),
                });
            }
        }

        if let Some(detail) = &self.detail {
            validate_rule_set(detail, PageRole::Detail)?;
            if detail.repeating_item_locator.is_some() || detail.detail_link_field.is_some() {
                return Err(TemplateError::InvalidRuleSet(
                    "detail rule set cannot declare repeating_item_locator or detail_link_field"
                        .to_string(),
                ));
            }
            if self.list.detail_link_field.is_none() {
                return Err(TemplateError::MissingDetailLink);
            }
        }

        if let Some(reason) = self.load_strategy.defect() {
            return Err(TemplateError::InvalidLoadStrategy(reason));
        }

        self.rate_limit()?;
        Ok(())
    }
}

fn validate_rule_set(rules: &RuleSet, role: PageRole) -> Result<(), TemplateError> {
    if rules.role != role {
        return Err(TemplateError::RoleMismatch {
            role,
            found: rules.role,
        });
    }
    if rules.fields.is_empty() {
        return Err(TemplateError::EmptyRuleSet { role });
    }

    let mut seen = HashSet::new();
    for rule in &rules.fields {
        if !seen.insert(rule.field_name.as_str()) {
            return Err(TemplateError::DuplicateField {
                role,
                field: rule.field_name.clone(),
            });
        }
        if rule.strategies.is_empty() {
            return Err(TemplateError::NoStrategies {
                role,
                field: rule.field_name.clone(),
            });
        }
        if let Some(reason) = rule.strategies.iter().find_map(Strategy::defect) {
            return Err(TemplateError::InvalidStrategy {
                role,
                field: rule.field_name.clone(),
                reason,
            });
        }
    }

    if let Some(link) = &rules.detail_link_field
        && !seen.contains(link.as_str())
    {
        return Err(TemplateError::UnknownDetailLinkField {
            role,
            field: link.clone(),
        });
    }
    Ok(())
}
