//! Spec source kinds
//!
//! Dboxed specs and git specs are reconciled by the same code; this trait is
//! everything that differs between them.

use dboxed_store::Entity;
use dboxed_types::ids::{EntityId, WorkspaceId};
use dboxed_types::models::{DboxedSpec, GitSpec, SpecSourceKind};

use super::source::SourceLocation;

pub trait SpecSource: Entity {
    const SOURCE_KIND: SpecSourceKind;
    /// Held on the source row until every object it created is gone
    const FINALIZER: &'static str;

    fn workspace_id(&self) -> WorkspaceId;

    /// Key under which the created objects are mapped
    fn scope_key(&self) -> String;

    fn location(&self) -> SourceLocation;
}

impl SpecSource for DboxedSpec {
    const SOURCE_KIND: SpecSourceKind = SpecSourceKind::DboxedSpec;
    const FINALIZER: &'static str = "dboxed-spec-objects";

    fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    fn scope_key(&self) -> String {
        self.id.to_db()
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(&self.git_url, &self.git_ref, &self.spec_file)
    }
}

impl SpecSource for GitSpec {
    const SOURCE_KIND: SpecSourceKind = SpecSourceKind::GitSpec;
    const FINALIZER: &'static str = "dboxed-git-spec-objects";

    fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    /// Objects belong to the repository file, so re-creating the row for the
    /// same file adopts them.
    fn scope_key(&self) -> String {
        format!("{}#{}", self.repository_url, self.spec_file)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(&self.repository_url, &self.git_ref, &self.spec_file)
    }
}
