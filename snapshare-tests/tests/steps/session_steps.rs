use cucumber::{given, then, when};
use snapshare_core::PeerConnectionState;
use snapshare_tests::SessionWorld;

// ===== Given Steps =====

#[given(expr = "{string} is hosting a session")]
async fn given_hosting(world: &mut SessionWorld, name: String) {
    world.host(&name).await;
}

#[given(expr = "{string} has joined the session hosted by {string}")]
async fn given_joined(world: &mut SessionWorld, name: String, host: String) {
    world.join(&name, &host).await;
    world
        .wait_for_state(&host, &name, PeerConnectionState::Connected)
        .await;
}

// ===== When Steps =====

#[when(expr = "{string} joins the session hosted by {string}")]
async fn joins(world: &mut SessionWorld, name: String, host: String) {
    world.join(&name, &host).await;
}

#[when(expr = "{string} leaves the session")]
async fn leaves(world: &mut SessionWorld, name: String) {
    world.peer(&name).session.leave().await;
}

#[when(expr = "{string} disconnects {string}")]
async fn disconnects(world: &mut SessionWorld, name: String, other: String) {
    let other_id = world.peer(&other).identity.id();
    world
        .peer(&name)
        .session
        .disconnect(&other_id)
        .await
        .unwrap_or_else(|e| panic!("{name} could not disconnect {other}: {e}"));
}

// ===== Then Steps =====

#[then(expr = "{string} sees {string} as connected")]
async fn sees_connected(world: &mut SessionWorld, name: String, other: String) {
    world
        .wait_for_state(&name, &other, PeerConnectionState::Connected)
        .await;
}

#[then(expr = "{string} sees {string} as disconnected")]
async fn sees_disconnected(world: &mut SessionWorld, name: String, other: String) {
    world
        .wait_for_state(&name, &other, PeerConnectionState::NotConnected)
        .await;
}

#[then(regex = r#"^"([^"]*)" has (\d+) connected peers?$"#)]
async fn connected_count(world: &mut SessionWorld, name: String, count: usize) {
    let connected = world.peer(&name).session.connected_peers();
    assert_eq!(
        connected.len(),
        count,
        "{name} is connected to {:?}",
        connected
            .iter()
            .map(|p| p.display_name().to_string())
            .collect::<Vec<_>>()
    );
}

#[then(expr = "{string} is connected to {string}")]
async fn is_connected_to(world: &mut SessionWorld, name: String, other: String) {
    let other_id = world.peer(&other).identity.id();
    assert_eq!(
        world.peer(&name).session.peer_state(&other_id),
        Some(PeerConnectionState::Connected)
    );
}

#[then(expr = "{string} receives no events")]
async fn receives_nothing(world: &mut SessionWorld, name: String) {
    let events = world.drain(&name).await;
    assert!(events.is_empty(), "{name} received {:?}", events);
}
