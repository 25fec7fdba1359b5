//! Label discovery and normalization
//!
//! Runtime labels are free-form (`com.docker.compose.project`), metric labels
//! are not. A [`LabelSchema`] is built once per snapshot and maps every raw
//! label name to the normalized metric label used for all gauges.

use crate::error::MetricsError;
use crate::models::Workload;
use regex::Regex;
use tracing::debug;

/// Metric label carrying the workload display name
pub const CONTAINER_NAME: &str = "container_name";
/// Metric label carrying the image reference
pub const CONTAINER_IMAGE: &str = "container_image";
/// Metric label carrying the host identifier
pub const ENGINE_HOST: &str = "engine_host";

/// Replace every character that is not an ASCII letter, digit or `_` with `_`
///
/// Case is preserved and the result is idempotent. A leading digit gets an
/// extra `_` prefix so the result is a valid metric label name.
pub fn normalize_label_name(raw: &str) -> String {
    let mut normalized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        normalized.insert(0, '_');
    }

    normalized
}

/// Source of a label value for a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    WorkloadName,
    Image,
    Host,
    /// A runtime label with the given raw name
    Runtime(String),
}

/// One entry of the label schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelName {
    pub source: LabelSource,
    pub normalized: String,
}

/// Ordered label schema shared by all per-workload gauges of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema {
    labels: Vec<LabelName>,
}

impl LabelSchema {
    /// Discover the label superset of a workload population
    ///
    /// Reserved labels come first, then runtime labels in first-seen order.
    /// A raw label whose normalized name is already taken is ignored.
    pub fn discover(workloads: &[Workload], filter: &LabelFilter) -> Self {
        let mut labels = vec![
            LabelName {
                source: LabelSource::WorkloadName,
                normalized: CONTAINER_NAME.to_string(),
            },
            LabelName {
                source: LabelSource::Image,
                normalized: CONTAINER_IMAGE.to_string(),
            },
            LabelName {
                source: LabelSource::Host,
                normalized: ENGINE_HOST.to_string(),
            },
        ];

        for workload in workloads {
            for raw in workload.labels.keys() {
                if !filter.accepts(raw) || labels.iter().any(|l| l.source.is_raw(raw)) {
                    continue;
                }

                let normalized = normalize_label_name(raw);
                if normalized.is_empty() || normalized.starts_with("__") {
                    debug!(label = %raw, "Skipping label with reserved or empty name");
                    continue;
                }
                if labels.iter().any(|l| l.normalized == normalized) {
                    debug!(label = %raw, normalized = %normalized, "Label name collision, keeping first");
                    continue;
                }

                labels.push(LabelName {
                    source: LabelSource::Runtime(raw.clone()),
                    normalized,
                });
            }
        }

        Self { labels }
    }

    /// Normalized label names in schema order
    pub fn names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.normalized.as_str()).collect()
    }

    pub fn entries(&self) -> &[LabelName] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label values of a workload in schema order
    ///
    /// Labels missing on the workload are empty strings.
    pub fn values_for<'a>(&self, workload: &'a Workload, host: &'a str) -> Vec<&'a str> {
        self.labels
            .iter()
            .map(|label| match &label.source {
                LabelSource::WorkloadName => workload.name.as_str(),
                LabelSource::Image => workload.image.as_str(),
                LabelSource::Host => host,
                LabelSource::Runtime(raw) => {
                    workload.labels.get(raw).map(String::as_str).unwrap_or("")
                }
            })
            .collect()
    }
}

impl LabelSource {
    fn is_raw(&self, raw: &str) -> bool {
        matches!(self, LabelSource::Runtime(name) if name == raw)
    }
}

/// Prefix filters selecting which runtime labels become metric labels
///
/// Each filter matches case-insensitively from the start of the label name.
/// Without filters every label is accepted.
#[derive(Debug, Clone, Default)]
pub struct LabelFilter {
    patterns: Vec<Regex>,
}

impl LabelFilter {
    /// Accept every label
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn new<S: AsRef<str>>(filters: &[S]) -> Result<Self, MetricsError> {
        let patterns = filters
            .iter()
            .map(|f| f.as_ref().trim())
            .filter(|f| !f.is_empty())
            .map(|filter| {
                Regex::new(&format!("(?i)^{filter}")).map_err(|source| MetricsError::LabelFilter {
                    filter: filter.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn accepts(&self, label: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(label))
    }
}
