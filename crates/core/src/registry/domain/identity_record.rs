use crate::registry::domain::template_comparator::TemplateComparator;
use crate::shared::template::Template;

/// One identity's accumulated templates plus its display name.
///
/// The template sequence is append-only and keeps enrollment order;
/// duplicates are allowed. A record always holds at least one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    display_name: String,
    templates: Vec<Template>,
}

impl IdentityRecord {
    pub fn new(display_name: impl Into<String>, first: Template) -> Self {
        Self {
            display_name: display_name.into(),
            templates: vec![first],
        }
    }

    /// Rebuilds a record from persisted parts. `None` if `templates` is empty.
    pub fn from_parts(display_name: String, templates: Vec<Template>) -> Option<Self> {
        if templates.is_empty() {
            return None;
        }
        Some(Self {
            display_name,
            templates,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Always false for a constructed record; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Best similarity of `query` against any stored template.
    pub fn similarity(&self, comparator: &dyn TemplateComparator, query: &Template) -> f64 {
        comparator.best_similarity(query, &self.templates)
    }

    pub fn add_template(&mut self, template: Template) {
        self.templates.push(template);
    }

    /// Appends all of `other`'s templates, in order.
    pub fn merge_from(&mut self, other: IdentityRecord) {
        self.templates.extend(other.templates);
    }
}
