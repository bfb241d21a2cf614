//! Reconciler driving the objects of one spec source

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dboxed_reconciler::{ReconcileError, ReconcileResult, Reconciler};
use dboxed_store::querier::get_by_id;
use dboxed_store::repos::specs::{self, NewMapping};
use dboxed_store::{soft_delete, DeleteProbe, Entity, StorageResult, Store};
use dboxed_types::ids::{BoxId, EntityId, VolumeId};
use dboxed_types::models::{BoxRecord, MappedObjectType, SpecMapping, Volume};
use dboxed_types::status::ReconcileStatus;
use dboxed_types::{BoxSpec, SpecDocument, SpecFragment, VolumeSpec};
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument};

use super::apply::{self, VolumeIds};
use super::kind::SpecSource;
use super::plan::{self, DesiredObject, ExistingObject, ObjectKey};
use super::source::SourceFetcher;
use crate::finalizer;

#[derive(Clone, Copy)]
enum DesiredSpec<'a> {
    Volume(&'a VolumeSpec),
    Box(&'a BoxSpec),
}

struct Desired<'a> {
    spec: DesiredSpec<'a>,
    planned: DesiredObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    Live,
    Deleting,
    Missing,
}

/// Reconciles a dboxed spec or git spec row: fetches its document and
/// converges the mapped volumes and boxes to it.
pub struct SpecReconciler<S> {
    store: Store,
    fetcher: Arc<dyn SourceFetcher>,
    _source: PhantomData<fn() -> S>,
}

impl<S: SpecSource> SpecReconciler<S> {
    pub fn new(store: Store, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            store,
            fetcher,
            _source: PhantomData,
        }
    }

    /// A deleted source declares nothing, so everything it created goes away.
    async fn load_document(&self, source: &S) -> Result<SpecDocument, ReconcileError> {
        if source.meta().is_deleted() {
            return Ok(SpecDocument::default());
        }
        let bytes = self.fetcher.fetch(&source.location()).await?;
        Ok(SpecDocument::parse(&bytes)?)
    }

    #[instrument(skip_all, fields(kind = S::KIND, id = %source.id()))]
    async fn run(&self, source: &S) -> Result<ReconcileResult, ReconcileError> {
        // Fetch before opening the transaction
        let document = self.load_document(source).await?;
        let desired = desired_objects(&document)?;
        let deleted = source.meta().is_deleted();
        let workspace_id = source.workspace_id();
        let scope = source.scope_key();

        let mut tx = self.store.begin().await?;

        if !deleted {
            if let Some(requeue) = finalizer::hold::<S>(&mut tx, source.id(), S::FINALIZER).await? {
                return Ok(requeue);
            }
        }

        let mut existing = BTreeMap::new();
        let mut mapped = BTreeMap::new();
        for mapping in specs::list_mappings(&mut tx, S::SOURCE_KIND, &scope).await? {
            let key = ObjectKey::new(mapping.object_type, mapping.name.clone());
            let state = object_state(&mut tx, &mapping).await?;
            if state == ObjectState::Missing {
                debug!(object = %key, "Mapped object is gone, dropping mapping");
                specs::delete_mapping(&mut tx, mapping.id).await?;
                continue;
            }
            existing.insert(
                key.clone(),
                ExistingObject {
                    recreate_key: mapping.recreate_key.clone(),
                    fragment: mapping.fragment.clone(),
                    deleting: state == ObjectState::Deleting,
                },
            );
            mapped.insert(key, mapping);
        }

        let wanted: BTreeMap<ObjectKey, DesiredObject> = desired
            .iter()
            .map(|(key, d)| (key.clone(), d.planned.clone()))
            .collect();
        let plan = plan::plan(&existing, &wanted);

        let mut pending = 0;
        for key in &plan.deletes {
            let (Some(mapping), Some(current)) = (mapped.get(key), existing.get(key)) else {
                continue;
            };
            if !current.deleting {
                let probe = delete_object(&mut tx, mapping).await?;
                info!(object = %key, ?probe, "Deleting object");
            }
            pending += 1;
        }

        // Volumes on their way out can no longer be mounted
        let leaving: BTreeSet<&str> = plan
            .deletes
            .iter()
            .filter(|key| key.object_type == MappedObjectType::Volume)
            .map(|key| key.name.as_str())
            .collect();
        let mut volume_ids: VolumeIds = mapped
            .iter()
            .filter(|(key, _)| key.object_type == MappedObjectType::Volume)
            .filter(|(key, _)| !leaving.contains(key.name.as_str()))
            .map(|(key, m)| (key.name.clone(), VolumeId::from_uuid(m.object_id)))
            .collect();

        for key in &plan.updates {
            let (Some(mapping), Some(want)) = (mapped.get(key), desired.get(key)) else {
                continue;
            };
            match want.spec {
                DesiredSpec::Volume(spec) => {
                    let id = VolumeId::from_uuid(mapping.object_id);
                    apply::update_volume(&mut tx, id, &key.name, spec).await?;
                }
                DesiredSpec::Box(spec) => {
                    let id = BoxId::from_uuid(mapping.object_id);
                    apply::update_box(&mut tx, workspace_id, id, &key.name, spec, &volume_ids)
                        .await?;
                }
            }
            specs::update_mapping_fragment(&mut tx, mapping.id, &want.planned.fragment).await?;
            info!(object = %key, "Updated object");
        }

        // Surviving boxes let go of leaving volumes so their deletes can finish
        let kept = surviving_boxes(&desired, &mapped, &plan.deletes);
        remount(&mut tx, &kept, &leaving, &volume_ids).await?;

        if pending > 0 {
            tx.commit().await?;
            return Ok(ReconcileResult::requeue_with_status(
                ReconcileStatus::deleting(),
                format!("waiting for {pending} objects to be deleted"),
            ));
        }

        let mut created = BTreeSet::new();
        for key in &plan.creates {
            let Some(want) = desired.get(key) else {
                continue;
            };
            let object_id = match want.spec {
                DesiredSpec::Volume(spec) => {
                    let id = apply::create_volume(&mut tx, workspace_id, &key.name, spec).await?;
                    volume_ids.insert(key.name.clone(), id);
                    created.insert(key.name.as_str());
                    *id.as_uuid()
                }
                DesiredSpec::Box(spec) => {
                    let id =
                        apply::create_box(&mut tx, workspace_id, &key.name, spec, &volume_ids)
                            .await?;
                    *id.as_uuid()
                }
            };
            let new = NewMapping {
                workspace_id,
                source_kind: S::SOURCE_KIND,
                source_key: scope.clone(),
                object_type: key.object_type,
                name: key.name.clone(),
                object_id,
                recreate_key: want.planned.recreate_key.clone(),
                fragment: want.planned.fragment.clone(),
            };
            specs::insert_mapping(&mut tx, new).await?;
            info!(object = %key, "Created object");
        }

        // Existing boxes pick up replacement volumes
        remount(&mut tx, &kept, &created, &volume_ids).await?;

        if deleted
            && soft_delete::remove_finalizer::<S>(&mut tx, source.id(), S::FINALIZER).await?
        {
            info!("All objects removed, released finalizer");
        }

        tx.commit().await?;
        Ok(ReconcileResult::ok())
    }
}

fn desired_objects(
    document: &SpecDocument,
) -> Result<BTreeMap<ObjectKey, Desired<'_>>, ReconcileError> {
    let mut desired = BTreeMap::new();
    for (name, spec) in &document.volumes {
        desired.insert(
            ObjectKey::new(MappedObjectType::Volume, name),
            Desired {
                spec: DesiredSpec::Volume(spec),
                planned: planned(spec)?,
            },
        );
    }
    for (name, spec) in &document.boxes {
        desired.insert(
            ObjectKey::new(MappedObjectType::Box, name),
            Desired {
                spec: DesiredSpec::Box(spec),
                planned: planned(spec)?,
            },
        );
    }
    Ok(desired)
}

fn planned<F: SpecFragment>(spec: &F) -> Result<DesiredObject, ReconcileError> {
    let fragment = serde_json::to_value(spec)
        .map_err(|e| ReconcileError::internal(format!("failed to serialize spec fragment: {e}")))?;
    Ok(DesiredObject {
        recreate_key: spec.recreate_key().to_string(),
        fragment,
    })
}

/// Live boxes of the scope that stay declared, with their spec
fn surviving_boxes<'a>(
    desired: &BTreeMap<ObjectKey, Desired<'a>>,
    mapped: &BTreeMap<ObjectKey, SpecMapping>,
    deletes: &[ObjectKey],
) -> Vec<(BoxId, &'a BoxSpec)> {
    desired
        .iter()
        .filter(|(key, _)| !deletes.contains(key))
        .filter_map(|(key, want)| match (want.spec, mapped.get(key)) {
            (DesiredSpec::Box(spec), Some(mapping)) => {
                Some((BoxId::from_uuid(mapping.object_id), spec))
            }
            _ => None,
        })
        .collect()
}

/// Resync the attachments of every box that mounts one of `volumes`.
async fn remount(
    conn: &mut SqliteConnection,
    targets: &[(BoxId, &BoxSpec)],
    volumes: &BTreeSet<&str>,
    volume_ids: &VolumeIds,
) -> Result<(), ReconcileError> {
    if volumes.is_empty() {
        return Ok(());
    }
    for (box_id, spec) in targets {
        if spec.volumes.iter().any(|m| volumes.contains(m.name.as_str())) {
            apply::sync_attachments(conn, *box_id, spec, volume_ids).await?;
        }
    }
    Ok(())
}

async fn object_state(
    conn: &mut SqliteConnection,
    mapping: &SpecMapping,
) -> StorageResult<ObjectState> {
    let deleted = match mapping.object_type {
        MappedObjectType::Volume => {
            let id = VolumeId::from_uuid(mapping.object_id);
            get_by_id::<Volume>(conn, id).await?.map(|v| v.meta.is_deleted())
        }
        MappedObjectType::Box => {
            let id = BoxId::from_uuid(mapping.object_id);
            get_by_id::<BoxRecord>(conn, id).await?.map(|b| b.meta.is_deleted())
        }
    };
    Ok(match deleted {
        None => ObjectState::Missing,
        Some(true) => ObjectState::Deleting,
        Some(false) => ObjectState::Live,
    })
}

async fn delete_object(
    conn: &mut SqliteConnection,
    mapping: &SpecMapping,
) -> StorageResult<DeleteProbe> {
    match mapping.object_type {
        MappedObjectType::Volume => {
            let id = VolumeId::from_uuid(mapping.object_id);
            soft_delete::soft_delete_with_constraints::<Volume>(conn, id).await
        }
        MappedObjectType::Box => {
            let id = BoxId::from_uuid(mapping.object_id);
            soft_delete::soft_delete_with_constraints::<BoxRecord>(conn, id).await
        }
    }
}

#[async_trait]
impl<S: SpecSource> Reconciler for SpecReconciler<S> {
    type Item = S;

    async fn get_item(&self, id: S::Id) -> StorageResult<Option<S>> {
        self.store.get::<S>(id).await
    }

    async fn reconcile(&self, source: &S) -> ReconcileResult {
        self.run(source).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::source::{InMemoryFetcher, SourceLocation};
    use crate::testing::{fixture, Fixture};
    use dboxed_store::repos::boxes;
    use dboxed_types::models::{DboxedSpec, SpecSourceKind};
    use dboxed_types::status::ReconcileStatus;

    const URL: &str = "https://git.example.com/infra.git";

    async fn spec_row(fx: &Fixture) -> DboxedSpec {
        let mut conn = fx.store.acquire().await.unwrap();
        specs::create_dboxed_spec(
            &mut conn,
            specs::NewDboxedSpec {
                workspace_id: fx.workspace.id,
                name: "infra".to_string(),
                git_url: URL.to_string(),
                git_ref: "main".to_string(),
                spec_file: "dboxed.yaml".to_string(),
            },
        )
        .await
        .unwrap()
    }

    async fn mappings(fx: &Fixture, spec: &DboxedSpec) -> Vec<SpecMapping> {
        let mut conn = fx.store.acquire().await.unwrap();
        specs::list_mappings(&mut conn, SpecSourceKind::DboxedSpec, &spec.scope_key())
            .await
            .unwrap()
    }

    const DOCUMENT: &str = r#"
volumes:
  data:
    fsSize: 1048576
boxes:
  web:
    network: default
    volumes:
      - name: data
    composeProjects:
      app: "services: {}"
"#;

    #[tokio::test]
    async fn test_creates_objects_and_is_idempotent() {
        let fx = fixture().await;
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher
            .insert(SourceLocation::new(URL, "main", "dboxed.yaml"), DOCUMENT)
            .await;
        let reconciler = SpecReconciler::<DboxedSpec>::new(fx.store.clone(), fetcher);
        let spec = spec_row(&fx).await;

        let result = reconciler.reconcile(&spec).await;
        assert_eq!(result.effective_status(), ReconcileStatus::Ok, "{}", result.user_message);

        let first = mappings(&fx, &spec).await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].object_type, MappedObjectType::Volume);
        assert_eq!(first[1].name, "web");

        let web = BoxId::from_uuid(first[1].object_id);
        let mut conn = fx.store.acquire().await.unwrap();
        assert_eq!(boxes::list_volume_attachments(&mut conn, web).await.unwrap().len(), 1);
        drop(conn);

        let result = reconciler.reconcile(&spec).await;
        assert!(!result.is_error());
        let second = mappings(&fx, &spec).await;
        assert_eq!(
            first.iter().map(|m| m.object_id).collect::<Vec<_>>(),
            second.iter().map(|m| m.object_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let fx = fixture().await;
        let reconciler =
            SpecReconciler::<DboxedSpec>::new(fx.store.clone(), Arc::new(InMemoryFetcher::new()));
        let spec = spec_row(&fx).await;

        let result = reconciler.reconcile(&spec).await;
        assert!(matches!(result.error, Some(ReconcileError::Fetch(_))));
        assert!(mappings(&fx, &spec).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_document_is_a_user_error() {
        let fx = fixture().await;
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher
            .insert(SourceLocation::new(URL, "", "dboxed.yaml"), "volumes: [")
            .await;
        let reconciler = SpecReconciler::<DboxedSpec>::new(fx.store.clone(), fetcher);
        let spec = spec_row(&fx).await;

        let result = reconciler.reconcile(&spec).await;
        assert!(result.error.as_ref().is_some_and(ReconcileError::is_user_error));
    }

    #[tokio::test]
    async fn test_removed_entry_is_deleted_before_mapping_drops() {
        let fx = fixture().await;
        let fetcher = Arc::new(InMemoryFetcher::new());
        let location = SourceLocation::new(URL, "main", "dboxed.yaml");
        fetcher.insert(location.clone(), DOCUMENT).await;
        let reconciler = SpecReconciler::<DboxedSpec>::new(fx.store.clone(), fetcher.clone());
        let spec = spec_row(&fx).await;
        reconciler.reconcile(&spec).await;
        let web = BoxId::from_uuid(mappings(&fx, &spec).await[1].object_id);

        fetcher
            .insert(location, "volumes:\n  data:\n    fsSize: 1048576\n")
            .await;
        let result = reconciler.reconcile(&spec).await;
        assert!(result.requeue);
        let record = fx.store.get::<BoxRecord>(web).await.unwrap().unwrap();
        assert!(record.meta.is_deleted());

        // Still present: the mapping stays and the cycle keeps waiting
        let result = reconciler.reconcile(&spec).await;
        assert!(result.requeue);
        assert_eq!(mappings(&fx, &spec).await.len(), 2);

        // Attachments cascade with the box row
        assert!(fx.store.hard_delete_finalized::<BoxRecord>(web).await.unwrap());

        let result = reconciler.reconcile(&spec).await;
        assert_eq!(result.effective_status(), ReconcileStatus::Ok);
        let remaining = mappings(&fx, &spec).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].object_type, MappedObjectType::Volume);
    }

    #[tokio::test]
    async fn test_recreated_volume_is_detached_then_remounted() {
        let fx = fixture().await;
        let fetcher = Arc::new(InMemoryFetcher::new());
        let location = SourceLocation::new(URL, "main", "dboxed.yaml");
        fetcher.insert(location.clone(), DOCUMENT).await;
        let reconciler = SpecReconciler::<DboxedSpec>::new(fx.store.clone(), fetcher.clone());
        let spec = spec_row(&fx).await;
        reconciler.reconcile(&spec).await;
        let before = mappings(&fx, &spec).await;
        let old_volume = VolumeId::from_uuid(before[0].object_id);
        let web = BoxId::from_uuid(before[1].object_id);

        let bumped = DOCUMENT.replace("fsSize: 1048576", "recreateKey: \"2\"\n    fsSize: 1048576");
        fetcher.insert(location, bumped).await;
        let result = reconciler.reconcile(&spec).await;
        assert!(result.requeue);
        assert_eq!(result.status, Some(ReconcileStatus::deleting()));
        assert!(result.user_message.contains("waiting for 1 objects"));

        let mut conn = fx.store.acquire().await.unwrap();
        assert!(boxes::list_volume_attachments(&mut conn, web).await.unwrap().is_empty());
        drop(conn);
        let volume = fx.store.get::<Volume>(old_volume).await.unwrap().unwrap();
        assert!(volume.meta.is_deleted());
        assert!(fx.store.hard_delete_finalized::<Volume>(old_volume).await.unwrap());

        let result = reconciler.reconcile(&spec).await;
        assert_eq!(result.effective_status(), ReconcileStatus::Ok, "{}", result.user_message);
        let after = mappings(&fx, &spec).await;
        assert_eq!(after.len(), 2);
        let new_volume = VolumeId::from_uuid(after[0].object_id);
        assert_ne!(new_volume, old_volume);
        assert_eq!(after[0].recreate_key, "2");
        assert_eq!(BoxId::from_uuid(after[1].object_id), web);

        let mut conn = fx.store.acquire().await.unwrap();
        let attachments = boxes::list_volume_attachments(&mut conn, web).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].volume_id, new_volume);
    }
}
