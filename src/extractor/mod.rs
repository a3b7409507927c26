//! Field resolution
//!
//! [`FieldResolver`] turns an [`ExtractionRule`] into a value by walking the
//! rule's strategies in order against a scope (the whole page or one element).
//! It holds no per-call state, so one resolver serves the listing traversal and
//! every detail worker.
//!
//! A missing field is not an error: when no strategy finds anything the result
//! is `Ok(None)`. Backend failures in one strategy do not stop the chain; they
//! are only reported when no later strategy produced a value.

pub mod patterns;
pub mod proximity;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::page_source::{ElementHandle, PageError, PageSource};
use crate::template::{ExtractionRule, Strategy};
use crate::utils::constants::LABEL_SIMILARITY_THRESHOLD;
use crate::utils::string_utils::{comparable, normalize_whitespace};

pub use patterns::PatternKind;
pub use proximity::Direction;

/// Region of the page a rule is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Page,
    Element(ElementHandle),
}

impl Scope {
    #[must_use]
    pub fn handle(self) -> Option<ElementHandle> {
        match self {
            Self::Page => None,
            Self::Element(handle) => Some(handle),
        }
    }
}

/// Outcome of resolving a whole rule set against one scope
#[derive(Debug, Default)]
pub struct ResolvedFields {
    /// Values found, in rule order
    pub values: IndexMap<String, String>,
    /// Fields whose resolution failed, with the first backend error
    pub failures: Vec<(String, PageError)>,
}

/// Stateless resolver for extraction rules
#[derive(Debug, Clone)]
pub struct FieldResolver {
    label_threshold: f64,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self {
            label_threshold: LABEL_SIMILARITY_THRESHOLD,
        }
    }
}

impl FieldResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the minimum similarity for proximity label matches
    #[must_use]
    pub fn with_label_threshold(mut self, threshold: f64) -> Self {
        self.label_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Resolve one field.
    ///
    /// # Returns
    /// * `Ok(Some(value))` - the first strategy that produced a non-empty value
    /// * `Ok(None)` - no strategy matched and none failed
    /// * `Err` - nothing matched and at least one strategy failed; the first failure
    pub async fn resolve<P: PageSource + ?Sized>(
        &self,
        page: &P,
        scope: Scope,
        rule: &ExtractionRule,
    ) -> Result<Option<String>, PageError> {
        let mut scope_text: Option<String> = None;
        let mut first_error = None;

        for strategy in &rule.strategies {
            let attempt = match strategy {
                Strategy::BySelector { locator, attribute } => {
                    by_selector(page, scope, locator, attribute.as_deref()).await
                }
                Strategy::ByPattern {
                    pattern,
                    context_keywords,
                } => by_pattern(page, scope, &mut scope_text, *pattern, context_keywords).await,
                Strategy::ByProximity {
                    label,
                    max_distance,
                    direction,
                } => {
                    self.by_proximity(page, scope, label, *max_distance, *direction)
                        .await
                }
            };

            match attempt {
                Ok(Some(value)) => {
                    trace!(
                        "Field '{}' resolved by {} strategy",
                        rule.field_name,
                        strategy.kind_name()
                    );
                    return Ok(Some(value));
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        "Field '{}': {} strategy failed: {e}",
                        rule.field_name,
                        strategy.kind_name()
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Resolve every rule against the same scope
    pub async fn resolve_all<P: PageSource + ?Sized>(
        &self,
        page: &P,
        scope: Scope,
        rules: &[ExtractionRule],
    ) -> ResolvedFields {
        let mut resolved = ResolvedFields::default();
        for rule in rules {
            match self.resolve(page, scope, rule).await {
                Ok(Some(value)) => {
                    resolved.values.insert(rule.field_name.clone(), value);
                }
                Ok(None) => {}
                Err(e) => resolved.failures.push((rule.field_name.clone(), e)),
            }
        }
        resolved
    }

    async fn by_proximity<P: PageSource + ?Sized>(
        &self,
        page: &P,
        scope: Scope,
        label: &str,
        max_distance: f64,
        direction: Option<Direction>,
    ) -> Result<Option<String>, PageError> {
        let wanted = comparable(label);
        let elements = page.find_all("*", scope.handle()).await?;

        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            let raw = page.text_of(element).await?;
            texts.push((element, comparable(&raw), raw));
        }

        // Best label first: highest similarity, then the tightest text
        let mut labels: Vec<(f64, usize)> = texts
            .iter()
            .enumerate()
            .filter_map(|(idx, (_, text, _))| {
                let score = proximity::similarity(&wanted, text);
                (score >= self.label_threshold).then_some((score, idx))
            })
            .collect();
        labels.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| texts[a.1].1.len().cmp(&texts[b.1].1.len()))
        });

        let mut anchor = None;
        for (_, idx) in labels {
            if let Some(bbox) = page.bounding_box(texts[idx].0).await? {
                anchor = Some((idx, bbox));
                break;
            }
        }
        let Some((label_idx, label_box)) = anchor else {
            trace!("No label resembling '{label}' in scope");
            return Ok(None);
        };
        let label_text = &texts[label_idx].1;

        let mut nearest: Option<(f64, usize)> = None;
        for (idx, (element, text, _)) in texts.iter().enumerate() {
            if idx == label_idx || !proximity::is_value_candidate(label_text, text) {
                continue;
            }
            let Some(bbox) = page.bounding_box(*element).await? else {
                continue;
            };
            if proximity::is_nested(&label_box, &bbox) {
                continue;
            }
            let distance = label_box.center_distance(&bbox);
            if distance > max_distance {
                continue;
            }
            if direction.is_some_and(|d| !d.holds(&label_box, &bbox)) {
                continue;
            }
            if nearest.is_none_or(|(best, _)| distance < best) {
                nearest = Some((distance, idx));
            }
        }

        Ok(nearest.map(|(_, idx)| normalize_whitespace(&texts[idx].2)))
    }
}

async fn by_selector<P: PageSource + ?Sized>(
    page: &P,
    scope: Scope,
    locator: &str,
    attribute: Option<&str>,
) -> Result<Option<String>, PageError> {
    let Some(first) = page.find_all(locator, scope.handle()).await?.first().copied() else {
        return Ok(None);
    };

    let value = match attribute {
        Some(name) => page
            .attribute_of(first, name)
            .await?
            .map(|v| v.trim().to_string()),
        None => Some(normalize_whitespace(&page.text_of(first).await?)),
    };
    Ok(value.filter(|v| !v.is_empty()))
}

async fn by_pattern<P: PageSource + ?Sized>(
    page: &P,
    scope: Scope,
    scope_text: &mut Option<String>,
    pattern: PatternKind,
    context_keywords: &[String],
) -> Result<Option<String>, PageError> {
    if scope_text.is_none() {
        let fetched = match scope {
            Scope::Page => page.page_text().await?,
            Scope::Element(handle) => page.text_of(handle).await?,
        };
        *scope_text = Some(fetched);
    }
    let text = scope_text.as_deref().unwrap_or_default();

    if !context_keywords.is_empty() {
        let haystack = text.to_lowercase();
        let in_context = context_keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()));
        if !in_context {
            trace!("Pattern {pattern:?} skipped: no context keyword in scope");
            return Ok(None);
        }
    }

    Ok(pattern.extract(text))
}
