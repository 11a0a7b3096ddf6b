//! Policy-driven change filtering
//!
//! Pure predicates deciding whether a raw change passes a watch policy's
//! exclude patterns, extension allow-list and size bounds.

use crate::events::extension_of;
use crate::policy::WatchPolicy;
use filegate_core::error::{Error, Result};
use glob::Pattern;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Compiled form of a policy's filtering rules
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    /// Glob patterns to drop
    exclude: Arc<Vec<Pattern>>,
    /// Accepted extensions (empty accepts all)
    extensions: Arc<BTreeSet<String>>,
    /// Inclusive lower size bound
    min_file_size: Option<u64>,
    /// Inclusive upper size bound
    max_file_size: Option<u64>,
}

impl ChangeFilter {
    /// Compile the filtering rules of a policy
    pub fn from_policy(policy: &WatchPolicy) -> Result<Self> {
        let exclude = policy
            .exclude_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    Error::invalid_input(format!("Invalid exclude pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            exclude: Arc::new(exclude),
            extensions: Arc::new(policy.file_extensions.clone()),
            min_file_size: policy.min_file_size,
            max_file_size: policy.max_file_size,
        })
    }

    /// Whether the path passes the exclude patterns and extension allow-list
    pub fn accepts_path(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        if self.exclude.iter().any(|pattern| pattern.matches(&path_str)) {
            trace!("Path {:?} matches exclude pattern", path);
            return false;
        }

        if !self.extensions.is_empty() && !self.extensions.contains(&extension_of(path)) {
            trace!("Path {:?} has an unlisted extension", path);
            return false;
        }

        true
    }

    /// Whether an existing file of `size` bytes is within the size bounds
    pub fn accepts_size(&self, size: u64) -> bool {
        let above_min = self.min_file_size.is_none_or(|min| size >= min);
        let below_max = self.max_file_size.is_none_or(|max| size <= max);
        above_min && below_max
    }
}
