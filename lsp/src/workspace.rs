//! In-memory workspace: projects, documents and immutable solution snapshots.
//!
//! Every mutation produces a fresh [`Solution`]; a request resolves identifiers
//! against the snapshot it read at the start and never observes later edits.
//! Documents opened outside every known project land in a "miscellaneous"
//! project and leave the workspace again when closed.
//!
//! Projects may reference other projects. A project's dependent version and
//! checksum cover everything it references, transitively, so an edit in a
//! referenced project makes the referencing project's results stale too.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use diagpull_types::{DocumentId, ProjectId, ProjectOrDocumentId, VersionStamp};
use tokio::sync::broadcast;
use url::Url;

use crate::checksum::Checksum;
use crate::error::WorkspaceError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

const MISC_PROJECT_NAME: &str = "miscellaneous";

/// A change applied to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceChange {
    ProjectAdded(ProjectId),
    ProjectChanged(ProjectId),
    ProjectRemoved(ProjectId),
    DocumentAdded(DocumentId),
    DocumentChanged(DocumentId),
    DocumentRemoved(DocumentId),
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    uri: Url,
    text: Arc<str>,
    version: VersionStamp,
    /// Version number the client attached to its last edit, if any.
    lsp_version: Option<i32>,
    open: bool,
}

impl Document {
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn version(&self) -> VersionStamp {
        self.version
    }

    #[must_use]
    pub fn lsp_version(&self) -> Option<i32> {
        self.lsp_version
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    id: ProjectId,
    name: String,
    root: Url,
    version: VersionStamp,
    documents: BTreeMap<DocumentId, Arc<Document>>,
    references: BTreeSet<ProjectId>,
    next_document: u32,
}

impl Project {
    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.documents.values()
    }

    #[must_use]
    pub fn document(&self, id: DocumentId) -> Option<&Arc<Document>> {
        self.documents.get(&id)
    }

    /// Projects this one references directly.
    pub fn references(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.references.iter().copied()
    }

    /// Moves whenever anything in this project is edited, including edits
    /// that leave the text unchanged. Referenced projects are not included;
    /// see [`Solution::dependent_version`].
    #[must_use]
    pub fn version(&self) -> VersionStamp {
        self.version
    }

    /// Hash over every document's uri and text.
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        let mut docs: Vec<&Arc<Document>> = self.documents.values().collect();
        docs.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
        Checksum::of_chunks(
            docs.iter()
                .flat_map(|doc| [doc.uri.as_str().as_bytes(), doc.text.as_bytes()]),
        )
    }
}

/// Immutable snapshot of every project and document.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    projects: BTreeMap<ProjectId, Arc<Project>>,
    by_uri: HashMap<Url, DocumentId>,
    misc_project: Option<ProjectId>,
    next_project: u32,
    stamp: VersionStamp,
}

impl Solution {
    pub fn projects(&self) -> impl Iterator<Item = &Arc<Project>> {
        self.projects.values()
    }

    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<&Arc<Project>> {
        self.projects.get(&id)
    }

    #[must_use]
    pub fn document(&self, id: DocumentId) -> Option<&Arc<Document>> {
        self.projects.get(&id.project())?.document(id)
    }

    #[must_use]
    pub fn document_by_uri(&self, uri: &Url) -> Option<&Arc<Document>> {
        self.document(*self.by_uri.get(uri)?)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.projects.values().flat_map(|p| p.documents())
    }

    /// Resolve a client identifier to a source id: documents by uri first,
    /// then projects by root uri.
    #[must_use]
    pub fn resolve(&self, uri: &Url) -> Option<ProjectOrDocumentId> {
        if let Some(id) = self.by_uri.get(uri) {
            return Some(ProjectOrDocumentId::Document(*id));
        }
        self.projects
            .values()
            .find(|p| &p.root == uri)
            .map(|p| ProjectOrDocumentId::Project(p.id))
    }

    /// `id` and every project it references, transitively, in id order.
    /// Cycles are fine; missing projects are skipped.
    #[must_use]
    pub fn dependency_closure(&self, id: ProjectId) -> Vec<&Arc<Project>> {
        let mut visited: BTreeSet<ProjectId> = BTreeSet::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if !visited.insert(next) {
                continue;
            }
            if let Some(project) = self.projects.get(&next) {
                pending.extend(project.references());
            }
        }
        visited
            .into_iter()
            .filter_map(|id| self.projects.get(&id))
            .collect()
    }

    /// Cheap version of `id`: the newest edit stamp across the project and
    /// everything it references.
    #[must_use]
    pub fn dependent_version(&self, id: ProjectId) -> VersionStamp {
        self.dependency_closure(id)
            .into_iter()
            .fold(VersionStamp::INITIAL, |v, p| v.max_with(p.version))
    }

    /// Expensive version of `id`: content checksum across the project and
    /// everything it references.
    #[must_use]
    pub fn dependent_checksum(&self, id: ProjectId) -> Checksum {
        let closure = self.dependency_closure(id);
        let ids: Vec<[u8; 4]> = closure.iter().map(|p| p.id.value().to_le_bytes()).collect();
        let checksums: Vec<Checksum> = closure.iter().map(|p| p.checksum()).collect();
        Checksum::of_chunks(
            ids.iter()
                .zip(&checksums)
                .flat_map(|(id, checksum)| [id.as_slice(), checksum.as_bytes()]),
        )
    }

    /// The project holding documents opened outside every known project.
    #[must_use]
    pub fn misc_project(&self) -> Option<ProjectId> {
        self.misc_project
    }

    /// Whether a source id still names something in this snapshot.
    #[must_use]
    pub fn contains(&self, id: ProjectOrDocumentId) -> bool {
        match id {
            ProjectOrDocumentId::Project(id) => self.projects.contains_key(&id),
            ProjectOrDocumentId::Document(id) => self.document(id).is_some(),
        }
    }

    /// Client-facing identifier for a source id.
    #[must_use]
    pub fn uri_of(&self, id: ProjectOrDocumentId) -> Option<&Url> {
        match id {
            ProjectOrDocumentId::Project(id) => self.project(id).map(|p| &p.root),
            ProjectOrDocumentId::Document(id) => self.document(id).map(|d| &d.uri),
        }
    }

    fn next_stamp(&mut self) -> VersionStamp {
        self.stamp = self.stamp.next();
        self.stamp
    }

    fn project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(&id).map(Arc::make_mut)
    }

    fn insert_project(&mut self, name: String, root: Url) -> ProjectId {
        let id = ProjectId::new(self.next_project);
        self.next_project += 1;
        let version = self.next_stamp();
        self.projects.insert(
            id,
            Arc::new(Project {
                id,
                name,
                root,
                version,
                documents: BTreeMap::new(),
                references: BTreeSet::new(),
                next_document: 0,
            }),
        );
        id
    }

    /// Longest project root that prefixes `uri`, ignoring the misc project.
    fn owning_project(&self, uri: &Url) -> Option<ProjectId> {
        self.projects
            .values()
            .filter(|p| Some(p.id) != self.misc_project)
            .filter(|p| uri.as_str().starts_with(p.root.as_str()))
            .max_by_key(|p| p.root.as_str().len())
            .map(|p| p.id)
    }

    fn ensure_misc_project(&mut self) -> ProjectId {
        if let Some(id) = self.misc_project {
            return id;
        }
        let root = Url::parse("file:///").expect("static root url is valid");
        let id = self.insert_project(MISC_PROJECT_NAME.to_string(), root);
        self.misc_project = Some(id);
        id
    }

    fn insert_document(
        &mut self,
        project_id: ProjectId,
        uri: Url,
        text: &str,
        lsp_version: Option<i32>,
        open: bool,
    ) -> Result<DocumentId, WorkspaceError> {
        if self.by_uri.contains_key(&uri) {
            return Err(WorkspaceError::DuplicateDocument(uri));
        }
        let stamp = self.next_stamp();
        let project = self
            .project_mut(project_id)
            .ok_or_else(|| WorkspaceError::UnknownProject(project_id.to_string()))?;
        let id = DocumentId::new(project_id, project.next_document);
        project.next_document += 1;
        project.version = stamp;
        project.documents.insert(
            id,
            Arc::new(Document {
                id,
                uri: uri.clone(),
                text: Arc::from(text),
                version: stamp,
                lsp_version,
                open,
            }),
        );
        self.by_uri.insert(uri, id);
        Ok(id)
    }

    fn update_document(
        &mut self,
        uri: &Url,
        f: impl FnOnce(&mut Document),
    ) -> Result<DocumentId, WorkspaceError> {
        let id = *self
            .by_uri
            .get(uri)
            .ok_or_else(|| WorkspaceError::UnknownDocument(uri.clone()))?;
        let stamp = self.next_stamp();
        let project = self
            .project_mut(id.project())
            .ok_or_else(|| WorkspaceError::UnknownDocument(uri.clone()))?;
        let doc = project
            .documents
            .get_mut(&id)
            .ok_or_else(|| WorkspaceError::UnknownDocument(uri.clone()))?;
        let doc = Arc::make_mut(doc);
        f(doc);
        doc.version = stamp;
        project.version = stamp;
        Ok(id)
    }

    fn delete_document(&mut self, uri: &Url) -> Result<DocumentId, WorkspaceError> {
        let id = self
            .by_uri
            .remove(uri)
            .ok_or_else(|| WorkspaceError::UnknownDocument(uri.clone()))?;
        let stamp = self.next_stamp();
        if let Some(project) = self.project_mut(id.project()) {
            project.documents.remove(&id);
            project.version = stamp;
        }
        Ok(id)
    }
}

/// Owner of the current [`Solution`] snapshot.
pub struct Workspace {
    solution: RwLock<Arc<Solution>>,
    changes: broadcast::Sender<WorkspaceChange>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            solution: RwLock::new(Arc::new(Solution::default())),
            changes,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<Solution> {
        self.solution
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceChange> {
        self.changes.subscribe()
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Solution) -> Result<(T, WorkspaceChange), WorkspaceError>,
    ) -> Result<T, WorkspaceError> {
        let change = {
            let mut guard = self
                .solution
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut next = Solution::clone(&guard);
            let (value, change) = f(&mut next)?;
            *guard = Arc::new(next);
            (value, change)
        };
        tracing::trace!(change = ?change.1, "Workspace changed");
        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send(change.1);
        Ok(change.0)
    }

    /// Add a project whose documents live under `root`.
    pub fn add_project(&self, name: impl Into<String>, root: Url) -> ProjectId {
        let name = name.into();
        let root = normalize_root(root);
        let id = {
            let mut guard = self
                .solution
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let mut next = Solution::clone(&guard);
            let id = next.insert_project(name, root);
            *guard = Arc::new(next);
            id
        };
        let _ = self.changes.send(WorkspaceChange::ProjectAdded(id));
        id
    }

    pub fn remove_project(&self, id: ProjectId) -> Result<(), WorkspaceError> {
        self.mutate(|s| {
            let project = s
                .projects
                .remove(&id)
                .ok_or_else(|| WorkspaceError::UnknownProject(id.to_string()))?;
            for doc in project.documents() {
                s.by_uri.remove(&doc.uri);
            }
            if s.misc_project == Some(id) {
                s.misc_project = None;
            }
            let stamp = s.next_stamp();
            // Dependents lose part of their closure: move their versions.
            for project in s.projects.values_mut() {
                if project.references.contains(&id) {
                    let project = Arc::make_mut(project);
                    project.references.remove(&id);
                    project.version = stamp;
                }
            }
            Ok(((), WorkspaceChange::ProjectRemoved(id)))
        })
    }

    /// Make `from` reference `to`. Results for `from` then go stale whenever
    /// `to`, or anything `to` references, is edited.
    pub fn add_project_reference(
        &self,
        from: ProjectId,
        to: ProjectId,
    ) -> Result<(), WorkspaceError> {
        self.mutate(|s| {
            if !s.projects.contains_key(&to) {
                return Err(WorkspaceError::UnknownProject(to.to_string()));
            }
            let stamp = s.next_stamp();
            let project = s
                .project_mut(from)
                .ok_or_else(|| WorkspaceError::UnknownProject(from.to_string()))?;
            if project.references.insert(to) {
                project.version = stamp;
            }
            Ok(((), WorkspaceChange::ProjectChanged(from)))
        })
    }

    /// Add a closed document that belongs to `project`.
    pub fn add_document(
        &self,
        project: ProjectId,
        uri: Url,
        text: &str,
    ) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            let id = s.insert_document(project, uri, text, None, false)?;
            Ok((id, WorkspaceChange::DocumentAdded(id)))
        })
    }

    /// Mark a document open with the client's text. Unknown documents are
    /// added to the project whose root contains them, or to the misc project.
    pub fn open_document(
        &self,
        uri: Url,
        text: &str,
        lsp_version: Option<i32>,
    ) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            if s.by_uri.contains_key(&uri) {
                let id = s.update_document(&uri, |doc| {
                    doc.text = Arc::from(text);
                    doc.lsp_version = lsp_version;
                    doc.open = true;
                })?;
                return Ok((id, WorkspaceChange::DocumentChanged(id)));
            }
            let project = match s.owning_project(&uri) {
                Some(id) => id,
                None => s.ensure_misc_project(),
            };
            let id = s.insert_document(project, uri, text, lsp_version, true)?;
            Ok((id, WorkspaceChange::DocumentAdded(id)))
        })
    }

    /// Replace a document's text. Identical text still moves the version.
    pub fn change_document(
        &self,
        uri: &Url,
        text: &str,
        lsp_version: Option<i32>,
    ) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            let id = s.update_document(uri, |doc| {
                if *doc.text != *text {
                    doc.text = Arc::from(text);
                }
                doc.lsp_version = lsp_version.or(doc.lsp_version);
            })?;
            Ok((id, WorkspaceChange::DocumentChanged(id)))
        })
    }

    /// Move a document's version forward without touching its text.
    pub fn touch_document(&self, uri: &Url) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            let id = s.update_document(uri, |_| {})?;
            Ok((id, WorkspaceChange::DocumentChanged(id)))
        })
    }

    /// Close a document. Misc documents leave the workspace; project members
    /// stay as closed documents.
    pub fn close_document(&self, uri: &Url) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            let id = *s
                .by_uri
                .get(uri)
                .ok_or_else(|| WorkspaceError::UnknownDocument(uri.clone()))?;
            if Some(id.project()) == s.misc_project {
                s.delete_document(uri)?;
                return Ok((id, WorkspaceChange::DocumentRemoved(id)));
            }
            s.update_document(uri, |doc| doc.open = false)?;
            Ok((id, WorkspaceChange::DocumentChanged(id)))
        })
    }

    pub fn remove_document(&self, uri: &Url) -> Result<DocumentId, WorkspaceError> {
        self.mutate(|s| {
            let id = s.delete_document(uri)?;
            Ok((id, WorkspaceChange::DocumentRemoved(id)))
        })
    }
}

fn normalize_root(mut root: Url) -> Url {
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    root
}

/// Parse a client-supplied uri.
pub fn parse_uri(value: &str) -> Result<Url, WorkspaceError> {
    Url::parse(value).map_err(|_| WorkspaceError::InvalidUri(value.to_string()))
}
