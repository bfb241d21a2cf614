//! Replica-set members tracking their owners through the running loops

#[macro_use]
mod common;

use common::{Harness, REPO};
use dboxed_controllers::replica_set::{
    member_name, IngressProxyKind, LoadBalancerKind, ReplicaSetKind,
};
use dboxed_store::repos::{boxes, replica_sets, specs};
use dboxed_store::soft_delete;
use dboxed_types::{BoxId, BoxRecord, IngressProxyId, LoadBalancer, LoadBalancerId, Network};

async fn create_owner<K: ReplicaSetKind>(h: &Harness, name: &str, replicas: u32) -> K::Id {
    let mut conn = h.store.acquire().await.unwrap();
    let owner = replica_sets::create_replica_set::<K::Id>(
        &mut conn,
        replica_sets::NewReplicaSet {
            workspace_id: h.workspace.id,
            name: name.to_string(),
            network_id: h.network.id,
            replicas,
            http_port: 8080,
            https_port: 8443,
        },
    )
    .await
    .unwrap();
    owner.id
}

async fn member_ordinals(h: &Harness, owner: LoadBalancerId) -> Vec<u32> {
    let mut conn = h.store.acquire().await.unwrap();
    replica_sets::list_members(&mut conn, owner)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.ordinal)
        .collect()
}

async fn member_box(h: &Harness, name: &str) -> Option<BoxRecord> {
    let mut conn = h.store.acquire().await.unwrap();
    boxes::get_box_by_name(&mut conn, h.workspace.id, name).await.unwrap()
}

#[tokio::test]
async fn test_load_balancer_scales_up_and_down() {
    let h = Harness::start().await;
    let lb = create_owner::<LoadBalancerKind>(&h, "web", 3).await;

    wait_until!("three members", member_ordinals(&h, lb).await == vec![1, 2, 3]);
    for ordinal in 1..=3 {
        let name = member_name::<LoadBalancerKind>("web", ordinal);
        assert_eq!(name, format!("lb-web-{ordinal}"));
        let record = member_box(&h, &name).await.unwrap();
        assert_eq!(record.network_id, Some(h.network.id));

        wait_until!("member port forwards", {
            let mut conn = h.store.acquire().await.unwrap();
            boxes::list_port_forwards(&mut conn, record.id).await.unwrap().len() == 3
        });
    }

    let third = member_box(&h, "lb-web-3").await.unwrap().id;
    let second = member_box(&h, "lb-web-2").await.unwrap().id;
    {
        let mut conn = h.store.acquire().await.unwrap();
        replica_sets::set_replicas(&mut conn, lb, 1).await.unwrap();
    }

    wait_until!("one member", member_ordinals(&h, lb).await == vec![1]);
    wait_until!(
        "released members to be removed",
        h.store.get::<BoxRecord>(third).await.unwrap().is_none()
            && h.store.get::<BoxRecord>(second).await.unwrap().is_none()
    );
    wait_until!(
        "owner status",
        h.store.get::<LoadBalancer>(lb).await.unwrap().unwrap().meta.status_details
            == "1/1 replicas"
    );

    h.stop().await;
}

#[tokio::test]
async fn test_deleted_load_balancer_releases_members_and_network() {
    let h = Harness::start().await;
    let lb = create_owner::<LoadBalancerKind>(&h, "web", 2).await;
    wait_until!("two members", member_ordinals(&h, lb).await.len() == 2);
    let members: Vec<BoxId> = {
        let mut conn = h.store.acquire().await.unwrap();
        replica_sets::list_members(&mut conn, lb)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.box_id)
            .collect()
    };

    {
        let mut conn = h.store.acquire().await.unwrap();
        assert!(soft_delete::soft_delete::<LoadBalancer>(&mut conn, lb).await.unwrap());
        assert!(soft_delete::soft_delete::<Network>(&mut conn, h.network.id).await.unwrap());
    }

    wait_until!("owner, members and network to be gone", {
        let mut gone = h.store.get::<LoadBalancer>(lb).await.unwrap().is_none()
            && h.store.get::<Network>(h.network.id).await.unwrap().is_none();
        for id in &members {
            gone = gone && h.store.get::<BoxRecord>(*id).await.unwrap().is_none();
        }
        gone
    });

    h.stop().await;
}

#[tokio::test]
async fn test_ingress_proxy_routes_spec_boxes() {
    let h = Harness::start().await;
    let proxy: IngressProxyId = create_owner::<IngressProxyKind>(&h, "edge", 1).await;
    h.publish(
        "main",
        "dboxed.yaml",
        r#"
boxes:
  api:
    network: default
    ingresses:
      - proxy: edge
        hostname: api.example.com
        pathPrefix: /v1
        port: 8000
"#,
    )
    .await;
    {
        let mut conn = h.store.acquire().await.unwrap();
        specs::create_dboxed_spec(
            &mut conn,
            specs::NewDboxedSpec {
                workspace_id: h.workspace.id,
                name: "apps".to_string(),
                git_url: REPO.to_string(),
                git_ref: "main".to_string(),
                spec_file: "dboxed.yaml".to_string(),
            },
        )
        .await
        .unwrap();
    }

    wait_until!("routing service", {
        let mut conn = h.store.acquire().await.unwrap();
        replica_sets::list_services(&mut conn, proxy).await.unwrap().len() == 1
    });

    let member = member_name::<IngressProxyKind>("edge", 1);
    wait_until!("rendered route on the member", {
        match member_box(&h, &member).await {
            Some(record) => {
                let mut conn = h.store.acquire().await.unwrap();
                boxes::list_compose_projects(&mut conn, record.id)
                    .await
                    .unwrap()
                    .iter()
                    .any(|p| {
                        p.name == IngressProxyKind::CONFIG_PROJECT
                            && p.content.contains("api.example.com")
                    })
            }
            None => false,
        }
    });

    h.stop().await;
}
