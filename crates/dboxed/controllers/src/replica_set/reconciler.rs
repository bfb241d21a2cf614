//! Reconciler keeping an owner's member boxes at the declared count

use std::collections::BTreeSet;
use std::marker::PhantomData;

use async_trait::async_trait;
use dboxed_reconciler::{ReconcileError, ReconcileResult, Reconciler};
use dboxed_store::change_tracking::bump;
use dboxed_store::querier::get_by_id;
use dboxed_store::repos::{boxes, replica_sets};
use dboxed_store::{soft_delete, StorageResult, Store};
use dboxed_types::models::{BoxRecord, Network, ReplicaMember, ReplicaSetRecord};
use tracing::{debug, info, instrument};

use super::config;
use super::kind::ReplicaSetKind;
use crate::finalizer;

type Owner<K> = ReplicaSetRecord<<K as ReplicaSetKind>::Id>;
type Member<K> = ReplicaMember<<K as ReplicaSetKind>::Id>;

pub struct ReplicaSetReconciler<K> {
    store: Store,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ReplicaSetKind> ReplicaSetReconciler<K> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    #[instrument(skip_all, fields(kind = K::NAME_PREFIX, owner = %owner.id, name = %owner.name))]
    async fn run(&self, owner: &Owner<K>) -> Result<ReconcileResult, ReconcileError> {
        let deleted = owner.meta.is_deleted();
        let target = if deleted { 0 } else { owner.replicas as usize };

        let mut members = {
            let mut conn = self.store.acquire().await?;
            if !deleted {
                if let Some(requeue) =
                    finalizer::hold::<Owner<K>>(&mut conn, owner.id, K::FINALIZER).await?
                {
                    return Ok(requeue);
                }
            }
            replica_sets::list_members::<K::Id>(&mut conn, owner.id).await?
        };

        // Highest ordinal first
        while members.len() > target {
            let Some(member) = members.pop() else {
                break;
            };
            self.remove_member(&member).await?;
        }

        while members.len() < target {
            let ordinal = lowest_free_ordinal(&members);
            let member = self.add_member(owner, ordinal).await?;
            members.push(member);
            members.sort_by_key(|m| m.ordinal);
        }

        if deleted {
            let mut tx = self.store.begin().await?;
            if soft_delete::remove_finalizer::<Owner<K>>(&mut tx, owner.id, K::FINALIZER).await? {
                bump::<Network>(&mut tx, owner.network_id).await?;
                info!("Members gone, released finalizer");
            }
            tx.commit().await?;
            return Ok(ReconcileResult::ok());
        }

        self.sync_members(owner, &members).await?;
        Ok(ReconcileResult::ok_with_message(format!(
            "{}/{} replicas",
            members.len(),
            owner.replicas
        )))
    }

    /// Drop the membership and soft-delete the box together.
    async fn remove_member(&self, member: &Member<K>) -> Result<(), ReconcileError> {
        let mut tx = self.store.begin().await?;
        replica_sets::remove_member::<K::Id>(&mut tx, member.owner_id, member.box_id).await?;
        soft_delete::soft_delete::<BoxRecord>(&mut tx, member.box_id).await?;
        tx.commit().await?;
        info!(ordinal = member.ordinal, r#box = %member.box_id, "Removed member");
        Ok(())
    }

    async fn add_member(
        &self,
        owner: &Owner<K>,
        ordinal: u32,
    ) -> Result<Member<K>, ReconcileError> {
        let mut tx = self.store.begin().await?;
        let new = boxes::NewBox {
            workspace_id: owner.workspace_id,
            name: member_name::<K>(&owner.name, ordinal),
            box_type: K::BOX_TYPE,
            network_id: Some(owner.network_id),
        };
        let record = boxes::create_box(&mut tx, new).await?;
        let member = ReplicaMember {
            owner_id: owner.id,
            box_id: record.id,
            ordinal,
        };
        replica_sets::add_member(&mut tx, &member).await?;
        tx.commit().await?;
        info!(ordinal, r#box = %record.id, name = %record.name, "Added member");
        Ok(member)
    }

    /// Write port forwards and routing configuration to every live member.
    async fn sync_members(
        &self,
        owner: &Owner<K>,
        members: &[Member<K>],
    ) -> Result<(), ReconcileError> {
        let mut tx = self.store.begin().await?;
        let services = replica_sets::list_services::<K::Id>(&mut tx, owner.id).await?;
        let rendered = config::render::<K>(owner, &services).map_err(|e| {
            ReconcileError::internal(format!("failed to render routing config: {e}"))
        })?;

        for member in members {
            let live = get_by_id::<BoxRecord>(&mut tx, member.box_id)
                .await?
                .is_some_and(|b| !b.meta.is_deleted());
            if !live {
                debug!(r#box = %member.box_id, "Skipping member being deleted");
                continue;
            }
            let rules = config::port_forwards(owner, member.box_id);
            boxes::replace_port_forwards(&mut tx, member.box_id, &rules).await?;
            boxes::upsert_compose_project(&mut tx, member.box_id, K::CONFIG_PROJECT, &rendered)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

pub fn member_name<K: ReplicaSetKind>(owner_name: &str, ordinal: u32) -> String {
    format!("{}-{}-{}", K::NAME_PREFIX, owner_name, ordinal)
}

/// Lowest ordinal >= 1 not taken by a member
fn lowest_free_ordinal<I>(members: &[ReplicaMember<I>]) -> u32 {
    let used: BTreeSet<u32> = members.iter().map(|m| m.ordinal).collect();
    let mut ordinal = 1;
    while used.contains(&ordinal) {
        ordinal += 1;
    }
    ordinal
}

#[async_trait]
impl<K: ReplicaSetKind> Reconciler for ReplicaSetReconciler<K> {
    type Item = Owner<K>;

    async fn get_item(&self, id: K::Id) -> StorageResult<Option<Owner<K>>> {
        self.store.get::<Owner<K>>(id).await
    }

    async fn reconcile(&self, owner: &Owner<K>) -> ReconcileResult {
        self.run(owner).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica_set::kind::LoadBalancerKind;
    use crate::testing::{fixture, Fixture};
    use dboxed_store::repos::replica_sets::NewReplicaSet;
    use dboxed_types::ids::LoadBalancerId;
    use dboxed_types::models::LoadBalancer;

    async fn load_balancer(fx: &Fixture, replicas: u32) -> LoadBalancer {
        let mut conn = fx.store.acquire().await.unwrap();
        replica_sets::create_replica_set(
            &mut conn,
            NewReplicaSet {
                workspace_id: fx.workspace.id,
                name: "web".to_string(),
                network_id: fx.network.id,
                replicas,
                http_port: 80,
                https_port: 443,
            },
        )
        .await
        .unwrap()
    }

    async fn members(fx: &Fixture, owner: LoadBalancerId) -> Vec<ReplicaMember<LoadBalancerId>> {
        let mut conn = fx.store.acquire().await.unwrap();
        replica_sets::list_members(&mut conn, owner).await.unwrap()
    }

    async fn reload(fx: &Fixture, id: LoadBalancerId) -> LoadBalancer {
        fx.store.get::<LoadBalancer>(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_lowest_free_ordinal() {
        let member = |ordinal| ReplicaMember {
            owner_id: LoadBalancerId::generate(),
            box_id: dboxed_types::ids::BoxId::generate(),
            ordinal,
        };
        assert_eq!(lowest_free_ordinal::<LoadBalancerId>(&[]), 1);
        assert_eq!(lowest_free_ordinal(&[member(1), member(3)]), 2);
        assert_eq!(lowest_free_ordinal(&[member(1), member(2)]), 3);
    }

    #[tokio::test]
    async fn test_scale_up_creates_named_members_with_rules() {
        let fx = fixture().await;
        let reconciler = ReplicaSetReconciler::<LoadBalancerKind>::new(fx.store.clone());
        let lb = load_balancer(&fx, 3).await;

        let result = reconciler.reconcile(&lb).await;
        assert!(!result.is_error(), "{}", result.user_message);
        assert_eq!(result.user_message, "3/3 replicas");

        let members = members(&fx, lb.id).await;
        assert_eq!(members.iter().map(|m| m.ordinal).collect::<Vec<_>>(), [1, 2, 3]);

        let mut conn = fx.store.acquire().await.unwrap();
        for member in &members {
            let record = get_by_id::<BoxRecord>(&mut conn, member.box_id).await.unwrap().unwrap();
            assert_eq!(record.name, format!("lb-web-{}", member.ordinal));
            assert_eq!(record.network_id, Some(fx.network.id));

            let rules = boxes::list_port_forwards(&mut conn, member.box_id).await.unwrap();
            let tags: Vec<_> = rules.iter().map(|r| r.description.as_str()).collect();
            assert_eq!(tags, ["http-tcp", "https-tcp", "https-udp"]);

            let projects = boxes::list_compose_projects(&mut conn, member.box_id).await.unwrap();
            assert_eq!(projects.len(), 1);
            assert_eq!(projects[0].name, LoadBalancerKind::CONFIG_PROJECT);
        }
    }

    #[tokio::test]
    async fn test_scale_down_removes_highest_ordinals_first() {
        let fx = fixture().await;
        let reconciler = ReplicaSetReconciler::<LoadBalancerKind>::new(fx.store.clone());
        let lb = load_balancer(&fx, 3).await;
        reconciler.reconcile(&lb).await;
        let before = members(&fx, lb.id).await;

        let mut conn = fx.store.acquire().await.unwrap();
        replica_sets::set_replicas(&mut conn, lb.id, 1).await.unwrap();
        drop(conn);
        let result = reconciler.reconcile(&reload(&fx, lb.id).await).await;
        assert!(!result.is_error());

        let after = members(&fx, lb.id).await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].ordinal, 1);

        let third = fx.store.get::<BoxRecord>(before[2].box_id).await.unwrap().unwrap();
        let second = fx.store.get::<BoxRecord>(before[1].box_id).await.unwrap().unwrap();
        assert!(third.meta.is_deleted() && second.meta.is_deleted());
        assert!(third.meta.change_seq < second.meta.change_seq);
    }

    #[tokio::test]
    async fn test_deleted_owner_releases_members_and_finalizer() {
        let fx = fixture().await;
        let reconciler = ReplicaSetReconciler::<LoadBalancerKind>::new(fx.store.clone());
        let lb = load_balancer(&fx, 2).await;
        reconciler.reconcile(&lb).await;

        let mut conn = fx.store.acquire().await.unwrap();
        soft_delete::soft_delete::<LoadBalancer>(&mut conn, lb.id).await.unwrap();
        drop(conn);
        assert!(!fx.store.hard_delete_finalized::<LoadBalancer>(lb.id).await.unwrap());

        let result = reconciler.reconcile(&reload(&fx, lb.id).await).await;
        assert!(!result.is_error(), "{}", result.user_message);
        assert!(members(&fx, lb.id).await.is_empty());
        assert!(fx.store.hard_delete_finalized::<LoadBalancer>(lb.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_gap_is_refilled() {
        let fx = fixture().await;
        let reconciler = ReplicaSetReconciler::<LoadBalancerKind>::new(fx.store.clone());
        let lb = load_balancer(&fx, 3).await;
        reconciler.reconcile(&lb).await;
        let before = members(&fx, lb.id).await;

        // Box reconciler behaviour when member 2 is deleted
        let mut conn = fx.store.acquire().await.unwrap();
        replica_sets::release_box_memberships::<LoadBalancerId>(&mut conn, before[1].box_id)
            .await
            .unwrap();
        soft_delete::soft_delete::<BoxRecord>(&mut conn, before[1].box_id).await.unwrap();
        drop(conn);

        reconciler.reconcile(&reload(&fx, lb.id).await).await;
        let after = members(&fx, lb.id).await;
        assert_eq!(after.iter().map(|m| m.ordinal).collect::<Vec<_>>(), [1, 2, 3]);
        assert_ne!(after[1].box_id, before[1].box_id);
    }
}
