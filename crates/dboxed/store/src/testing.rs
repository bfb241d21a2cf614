use dboxed_types::models::{Network, Workspace};

use crate::repos::{networks, workspaces};
use crate::Store;

pub(crate) async fn store_with_network() -> (Store, Workspace, Network) {
    let store = Store::in_memory().await.unwrap();
    let mut conn = store.acquire().await.unwrap();
    let workspace = workspaces::create_workspace(&mut conn, "test").await.unwrap();
    let network = networks::create_network(&mut conn, workspace.id, "default")
        .await
        .unwrap();
    drop(conn);
    (store, workspace, network)
}
