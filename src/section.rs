use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed unit of documentation: a page or one heading within it.
///
/// Subsections keep the heading order of the source document. Their `path` is the
/// page path with a `#fragment` appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub path: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub subsections: Vec<Section>,
    pub fetched_at: DateTime<Utc>,
}

impl Section {
    /// Visits this section and every nested subsection, parents first.
    pub fn walk(&self) -> Vec<&Section> {
        let mut out = vec![self];
        for sub in &self.subsections {
            out.extend(sub.walk());
        }
        out
    }

    /// Looks up a section by its full path, including fragment paths.
    pub fn find(&self, path: &str) -> Option<&Section> {
        self.walk().into_iter().find(|s| s.path == path)
    }
}
