//! Create and update the objects declared by a spec document

use std::collections::BTreeMap;

use dboxed_reconciler::ReconcileError;
use dboxed_store::querier::get_by_id;
use dboxed_store::repos::replica_sets::{self, ServiceEntry};
use dboxed_store::repos::{boxes, networks, volumes};
use dboxed_store::StorageError;
use dboxed_types::ids::{BoxId, IngressProxyId, NetworkId, VolumeId, WorkspaceId};
use dboxed_types::models::{BoxRecord, BoxType, PortForward, Volume, VolumeAttachment};
use dboxed_types::{BoxSpec, VolumeSpec};
use sqlx::SqliteConnection;
use tracing::debug;

/// Volume ids of the current scope by logical name
pub(crate) type VolumeIds = BTreeMap<String, VolumeId>;

pub(crate) async fn create_volume(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
    spec: &VolumeSpec,
) -> Result<VolumeId, ReconcileError> {
    let new = volumes::NewVolume {
        workspace_id,
        name: name.to_string(),
        fs_size: spec.fs_size,
        fs_type: spec.fs_type.clone(),
    };
    let volume = volumes::create_volume(conn, new).await?;
    debug!(volume = %volume.id, name, "Created volume");
    Ok(volume.id)
}

/// Volumes have no mutable attributes; only reject immutable changes.
pub(crate) async fn update_volume(
    conn: &mut SqliteConnection,
    volume_id: VolumeId,
    name: &str,
    spec: &VolumeSpec,
) -> Result<(), ReconcileError> {
    let volume = get_by_id::<Volume>(conn, volume_id)
        .await?
        .ok_or_else(|| StorageError::not_found(volume_id))?;
    if volume.fs_size != spec.fs_size {
        return Err(ReconcileError::immutable(format!(
            "volume {name}: fsSize cannot change from {} to {} without a new recreateKey",
            volume.fs_size, spec.fs_size
        )));
    }
    if volume.fs_type != spec.fs_type {
        return Err(ReconcileError::immutable(format!(
            "volume {name}: fsType cannot change from {} to {} without a new recreateKey",
            volume.fs_type, spec.fs_type
        )));
    }
    Ok(())
}

pub(crate) async fn create_box(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: &str,
    spec: &BoxSpec,
    volume_ids: &VolumeIds,
) -> Result<BoxId, ReconcileError> {
    let network_id = resolve_network(conn, workspace_id, spec.network.as_deref()).await?;
    let new = boxes::NewBox {
        workspace_id,
        name: name.to_string(),
        box_type: BoxType::Normal,
        network_id,
    };
    let record = boxes::create_box(conn, new).await?;
    debug!(r#box = %record.id, name, "Created box");

    sync_box(conn, workspace_id, record.id, name, spec, volume_ids).await?;
    Ok(record.id)
}

pub(crate) async fn update_box(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    box_id: BoxId,
    name: &str,
    spec: &BoxSpec,
    volume_ids: &VolumeIds,
) -> Result<(), ReconcileError> {
    let record = get_by_id::<BoxRecord>(conn, box_id)
        .await?
        .ok_or_else(|| StorageError::not_found(box_id))?;
    let network_id = resolve_network(conn, workspace_id, spec.network.as_deref()).await?;
    if record.network_id != network_id {
        return Err(ReconcileError::immutable(format!(
            "box {name}: network cannot change without a new recreateKey"
        )));
    }

    sync_box(conn, workspace_id, box_id, name, spec, volume_ids).await
}

async fn resolve_network(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    name: Option<&str>,
) -> Result<Option<NetworkId>, ReconcileError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let network = networks::get_network_by_name(conn, workspace_id, name)
        .await?
        .ok_or_else(|| ReconcileError::dependency_not_found(format!("network {name}")))?;
    Ok(Some(network.id))
}

/// Bring the children of a box in line with its spec.
async fn sync_box(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    box_id: BoxId,
    name: &str,
    spec: &BoxSpec,
    volume_ids: &VolumeIds,
) -> Result<(), ReconcileError> {
    sync_attachments(conn, box_id, spec, volume_ids).await?;
    sync_compose_projects(conn, box_id, spec).await?;
    boxes::replace_port_forwards(conn, box_id, &port_forwards(box_id, spec)).await?;
    sync_ingresses(conn, workspace_id, box_id, name, spec).await?;
    Ok(())
}

/// Attachments are keyed by volume; one whose attributes changed is
/// detached and attached again.
///
/// `volume_ids` holds the volumes that can be mounted right now. A mount of a
/// volume missing from it is left out, which detaches a volume that is being
/// removed or replaced. The document has already been checked for unknown
/// volume names.
pub(crate) async fn sync_attachments(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    spec: &BoxSpec,
    volume_ids: &VolumeIds,
) -> Result<(), ReconcileError> {
    let mut wanted = BTreeMap::new();
    for mount in &spec.volumes {
        let Some(&volume_id) = volume_ids.get(&mount.name) else {
            debug!(r#box = %box_id, volume = %mount.name, "Volume not available, not mounting");
            continue;
        };
        let attachment = VolumeAttachment {
            box_id,
            volume_id,
            root_uid: mount.root_uid,
            root_gid: mount.root_gid,
            root_mode: mount.root_mode.clone(),
        };
        wanted.insert(volume_id, attachment);
    }

    let current: BTreeMap<VolumeId, VolumeAttachment> =
        boxes::list_volume_attachments(conn, box_id)
            .await?
            .into_iter()
            .map(|a| (a.volume_id, a))
            .collect();

    for (volume_id, attachment) in &current {
        if wanted.get(volume_id) != Some(attachment) {
            boxes::detach_volume(conn, box_id, *volume_id).await?;
        }
    }
    for (volume_id, attachment) in &wanted {
        if current.get(volume_id) != Some(attachment) {
            boxes::attach_volume(conn, attachment).await?;
        }
    }
    Ok(())
}

async fn sync_compose_projects(
    conn: &mut SqliteConnection,
    box_id: BoxId,
    spec: &BoxSpec,
) -> Result<(), ReconcileError> {
    for (project, content) in &spec.compose_projects {
        boxes::upsert_compose_project(conn, box_id, project, content).await?;
    }
    for existing in boxes::list_compose_projects(conn, box_id).await? {
        if !spec.compose_projects.contains_key(&existing.name) {
            boxes::delete_compose_project(conn, box_id, &existing.name).await?;
        }
    }
    Ok(())
}

/// Rules numbered in sorted order, so reordering the document is not a change
fn port_forwards(box_id: BoxId, spec: &BoxSpec) -> Vec<PortForward> {
    let mut specs = spec.port_forwards.clone();
    specs.sort();
    specs
        .iter()
        .enumerate()
        .map(|(idx, pf)| PortForward {
            box_id,
            description: format!("spec-{idx}"),
            protocol: pf.protocol,
            host_port_first: pf.host_port_first,
            host_port_last: pf.last_port(),
            sandbox_port: pf.sandbox_port,
        })
        .collect()
}

/// Routing entries of the box on every ingress proxy, replaced wholesale
/// when the sorted sets differ.
async fn sync_ingresses(
    conn: &mut SqliteConnection,
    workspace_id: WorkspaceId,
    box_id: BoxId,
    name: &str,
    spec: &BoxSpec,
) -> Result<(), ReconcileError> {
    let mut ingresses = spec.ingresses.clone();
    ingresses.sort();

    let mut wanted = Vec::with_capacity(ingresses.len());
    for (idx, ingress) in ingresses.iter().enumerate() {
        let proxy = replica_sets::get_replica_set_by_name::<IngressProxyId>(
            conn,
            workspace_id,
            &ingress.proxy,
        )
        .await?
        .ok_or_else(|| {
            ReconcileError::dependency_not_found(format!("ingress proxy {}", ingress.proxy))
        })?;
        let entry = ServiceEntry {
            box_id: Some(box_id),
            description: format!("{name}-{idx}"),
            hostname: ingress.hostname.clone(),
            path_prefix: ingress.path_prefix.clone(),
            port: ingress.port,
        };
        wanted.push((proxy.id, entry));
    }
    wanted.sort();

    let mut current: Vec<(IngressProxyId, ServiceEntry)> =
        replica_sets::list_services_for_box::<IngressProxyId>(conn, box_id)
            .await?
            .iter()
            .map(|s| (s.owner_id, ServiceEntry::from(s)))
            .collect();
    current.sort();
    if current == wanted {
        return Ok(());
    }

    replica_sets::delete_services_for_box::<IngressProxyId>(conn, box_id).await?;
    for (proxy_id, entry) in &wanted {
        replica_sets::upsert_service(conn, *proxy_id, entry).await?;
    }
    Ok(())
}
