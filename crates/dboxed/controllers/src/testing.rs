use dboxed_store::repos::{boxes, networks, volumes, workspaces};
use dboxed_store::Store;
use dboxed_types::models::{BoxRecord, BoxType, Network, Volume, Workspace};

pub(crate) struct Fixture {
    pub store: Store,
    pub workspace: Workspace,
    pub network: Network,
}

pub(crate) async fn fixture() -> Fixture {
    let store = Store::in_memory().await.unwrap();
    let mut conn = store.acquire().await.unwrap();
    let workspace = workspaces::create_workspace(&mut conn, "test").await.unwrap();
    let network = networks::create_network(&mut conn, workspace.id, "default")
        .await
        .unwrap();
    drop(conn);
    Fixture {
        store,
        workspace,
        network,
    }
}

pub(crate) async fn create_box(fx: &Fixture, name: &str) -> BoxRecord {
    let mut conn = fx.store.acquire().await.unwrap();
    let new = boxes::NewBox {
        workspace_id: fx.workspace.id,
        name: name.to_string(),
        box_type: BoxType::Normal,
        network_id: Some(fx.network.id),
    };
    boxes::create_box(&mut conn, new).await.unwrap()
}

pub(crate) async fn create_volume(fx: &Fixture, name: &str) -> Volume {
    let mut conn = fx.store.acquire().await.unwrap();
    let new = volumes::NewVolume {
        workspace_id: fx.workspace.id,
        name: name.to_string(),
        fs_size: 1 << 30,
        fs_type: "ext4".to_string(),
    };
    volumes::create_volume(&mut conn, new).await.unwrap()
}
