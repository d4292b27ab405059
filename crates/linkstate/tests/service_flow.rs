//! End-to-end runs of the link-state service against an emulated mesh.

use mesh_linkstate::{
    Cost, LinkStateConfig, LinkStateService, NodeId, Scenario, SimEvent, SimulatedNetwork,
    StateUpdate,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn known(service: &LinkStateService) -> BTreeSet<NodeId> {
    service.inspect(|state| state.nodes().map(|node| node.id()).collect())
}

async fn announce(network: &SimulatedNetwork, local: NodeId) {
    for notification in network.local_view(local) {
        network.emit(notification).await;
    }
}

async fn settled(service: &LinkStateService) {
    eventually(|| {
        service.pending_fetches() == 0
            && service.inspect(|state| state.get_links_not_yet_fetched_nodes().is_empty())
    })
    .await;
}

async fn play(network: &SimulatedNetwork, event: SimEvent) {
    if let Some(notification) = network.apply_event(&event) {
        network.emit(notification).await;
    }
}

/// a - b - c - d
fn chain() -> (Arc<SimulatedNetwork>, [NodeId; 4]) {
    let network = SimulatedNetwork::new();
    let a = network.add_node("udp://10.0.0.1:9000", Some(Cost::new(1)));
    let b = network.add_node("udp://10.0.0.2:9000", Some(Cost::new(2)));
    let c = network.add_node("udp://10.0.0.3:9000", Some(Cost::new(3)));
    let d = network.add_node("udp://10.0.0.4:9000", Some(Cost::new(4)));
    network.add_link(a, b, Cost::new(10));
    network.add_link(b, c, Cost::new(20));
    network.add_link(c, d, Cost::new(30));
    (Arc::new(network), [a, b, c, d])
}

#[tokio::test]
async fn test_random_mesh_converges_to_reachable_ground_truth() {
    let network = Arc::new(SimulatedNetwork::random(30, 15, 42));
    let local = network.node_ids()[0];
    let service =
        LinkStateService::start(local, network.as_ref(), network.clone(), LinkStateConfig::default());

    announce(&network, local).await;
    eventually(|| network.convergence(local, &known(&service)).converged).await;
    settled(&service).await;

    service.inspect(|state| {
        assert!(state.get_nodes_not_yet_fetched_costs().is_empty());
        for node in state.nodes() {
            let mut links = state.get_links(&node.id());
            links.sort();
            assert_eq!(links, network.neighbors(&node.id()));
        }
    });
    assert!(network.request_count() >= 29);
    assert_eq!(service.fetcher_stats().requests_failed, 0);
}

#[tokio::test]
async fn test_link_removal_prunes_unreachable_tail() {
    let (network, [a, b, c, d]) = chain();
    let service =
        LinkStateService::start(a, network.as_ref(), network.clone(), LinkStateConfig::default());
    let removed = Arc::new(Mutex::new(Vec::new()));
    let _sub = service.on_state_update({
        let removed = Arc::clone(&removed);
        move |update: &StateUpdate| removed.lock().unwrap().extend(update.node_removed.iter().copied())
    });

    announce(&network, a).await;
    eventually(|| known(&service).len() == 4).await;
    settled(&service).await;

    play(&network, SimEvent::LinkRemoved { a: b, b: c }).await;
    eventually(|| known(&service) == BTreeSet::from([a, b])).await;

    let removed = removed.lock().unwrap().clone();
    assert_eq!(BTreeSet::from_iter(removed), BTreeSet::from([c, d]));
    assert!(network.convergence(a, &known(&service)).converged);
}

#[tokio::test]
async fn test_new_link_reconnects_and_backfills() {
    let (network, [a, b, c, d]) = chain();
    network.remove_link(b, c);
    let service =
        LinkStateService::start(a, network.as_ref(), network.clone(), LinkStateConfig::default());

    announce(&network, a).await;
    eventually(|| known(&service) == BTreeSet::from([a, b])).await;

    play(
        &network,
        SimEvent::LinkUpdated {
            a: b,
            b: c,
            cost: Cost::new(7),
        },
    )
    .await;
    eventually(|| known(&service) == BTreeSet::from([a, b, c, d])).await;
    eventually(|| service.inspect(|state| state.get_links(&c).len() == 2)).await;
}

#[tokio::test]
async fn test_offline_node_stays_unfetched() {
    let (network, [a, b, c, _d]) = chain();
    network.set_online(c, false);
    let service =
        LinkStateService::start(a, network.as_ref(), network.clone(), LinkStateConfig::default());

    announce(&network, a).await;
    eventually(|| known(&service).contains(&c)).await;
    eventually(|| service.fetcher_stats().requests_failed >= 1 && service.pending_fetches() == 0)
        .await;

    service.inspect(|state| {
        assert_eq!(state.len(), 3);
        assert_eq!(state.get_links_not_yet_fetched_nodes(), vec![c]);
        assert!(state.node(&b).is_some_and(|node| node.links_fetched()));
        assert!(state.node(&c).is_some_and(|node| node.links().is_none()));
    });
}

#[tokio::test]
async fn test_removing_local_node_clears_view() {
    let (network, [a, ..]) = chain();
    let service =
        LinkStateService::start(a, network.as_ref(), network.clone(), LinkStateConfig::default());

    announce(&network, a).await;
    eventually(|| known(&service).len() == 4).await;
    settled(&service).await;

    play(&network, SimEvent::NodeRemoved { node_id: a }).await;
    eventually(|| known(&service).is_empty()).await;
    assert!(service.sync_state().is_empty());
}

#[tokio::test]
async fn test_scenario_file_plays_to_convergence() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/chain.yaml");
    let (network, local, events) = Scenario::load(path).unwrap().build().unwrap();
    let network = Arc::new(network);
    let service =
        LinkStateService::start(local, network.as_ref(), network.clone(), LinkStateConfig::default());

    announce(&network, local).await;
    for event in events {
        if let SimEvent::Wait { duration } = event {
            tokio::time::sleep(duration).await;
            continue;
        }
        play(&network, event).await;
    }

    eventually(|| network.convergence(local, &known(&service)).converged).await;
}
