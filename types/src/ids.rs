use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(u32);

impl ProjectId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A document identity. Documents never move between projects, so the owning
/// project is part of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    project: ProjectId,
    index: u32,
}

impl DocumentId {
    #[must_use]
    pub fn new(project: ProjectId, index: u32) -> Self {
        Self { project, index }
    }

    #[must_use]
    pub fn project(self) -> ProjectId {
        self.project
    }

    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/d{}", self.project, self.index)
    }
}

/// Identity of a diagnostic source: either a whole project or one document.
///
/// Used as the cache key and as the "seen this pass" key, so equality and
/// hashing follow whichever variant is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProjectOrDocumentId {
    Project(ProjectId),
    Document(DocumentId),
}

impl ProjectOrDocumentId {
    /// The project that owns this source.
    #[must_use]
    pub fn project(self) -> ProjectId {
        match self {
            Self::Project(id) => id,
            Self::Document(id) => id.project(),
        }
    }

    #[must_use]
    pub fn is_document(self) -> bool {
        matches!(self, Self::Document(_))
    }
}

impl From<ProjectId> for ProjectOrDocumentId {
    fn from(id: ProjectId) -> Self {
        Self::Project(id)
    }
}

impl From<DocumentId> for ProjectOrDocumentId {
    fn from(id: DocumentId) -> Self {
        Self::Document(id)
    }
}

impl fmt::Display for ProjectOrDocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(id) => id.fmt(f),
            Self::Document(id) => id.fmt(f),
        }
    }
}

/// Opaque token naming one computed diagnostic set.
///
/// Clients echo it back as `previousResultId`; the server never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(String);

impl ResultId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResultId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_source_id_equality_follows_variant() {
        let project = ProjectId::new(1);
        let doc = DocumentId::new(project, 0);

        let a = ProjectOrDocumentId::from(project);
        let b = ProjectOrDocumentId::from(doc);
        assert_ne!(a, b);
        assert_eq!(b, ProjectOrDocumentId::Document(DocumentId::new(project, 0)));

        let set: HashSet<_> = [a, b, ProjectOrDocumentId::from(doc)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_source_id_project() {
        let project = ProjectId::new(7);
        let doc = DocumentId::new(project, 3);
        assert_eq!(ProjectOrDocumentId::from(doc).project(), project);
        assert_eq!(ProjectOrDocumentId::from(project).project(), project);
        assert!(ProjectOrDocumentId::from(doc).is_document());
    }

    #[test]
    fn test_display() {
        let doc = DocumentId::new(ProjectId::new(2), 5);
        assert_eq!(doc.to_string(), "p2/d5");
        assert_eq!(ProjectOrDocumentId::from(ProjectId::new(2)).to_string(), "p2");
    }

    #[test]
    fn test_result_id_serializes_as_plain_string() {
        let id = ResultId::new("lint:4");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("lint:4"));
        let back: ResultId = serde_json::from_str("\"lint:4\"").unwrap();
        assert_eq!(back, id);
    }
}
