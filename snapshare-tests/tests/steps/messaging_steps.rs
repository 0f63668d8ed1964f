use cucumber::{then, when};
use snapshare_core::ImageFormat;
use snapshare_p2p::SessionEvent;
use snapshare_tests::{sample_png, SessionWorld};

// ===== When Steps =====

#[when(expr = "{string} sends the text {string}")]
async fn sends_text(world: &mut SessionWorld, name: String, body: String) {
    let result = world.peer(&name).session.send_text(&body);
    world.record_send(result);
}

#[when(expr = "{string} sends a photo")]
async fn sends_photo(world: &mut SessionWorld, name: String) {
    let photo = sample_png();
    world.last_image = photo.clone();
    let result = world.peer(&name).session.send_payload(photo);
    world.record_send(result);
}

// ===== Then Steps =====

#[then(regex = r"^the (?:text|photo) was queued for (\d+) peers?$")]
async fn queued_for(world: &mut SessionWorld, count: usize) {
    assert_eq!(
        world.last_sent,
        Some(count),
        "last error: {:?}",
        world.last_error
    );
}

#[then(expr = "sending fails with {string}")]
async fn sending_fails(world: &mut SessionWorld, message: String) {
    assert_eq!(world.last_sent, None);
    assert_eq!(world.last_error.as_deref(), Some(message.as_str()));
}

#[then(expr = "{string} receives the text {string} from {string}")]
async fn receives_text(world: &mut SessionWorld, name: String, body: String, sender: String) {
    let sender_id = world.peer(&sender).identity.id();
    let event = world
        .wait_for(&name, &format!("{body:?} from {sender}"), |event| {
            matches!(
                event,
                SessionEvent::TextReceived { from, body: b, .. }
                    if from.id() == sender_id && *b == body
            )
        })
        .await;

    if let SessionEvent::TextReceived { sender: claimed, .. } = event {
        assert_eq!(claimed, sender);
    }
}

#[then(expr = "{string} receives the photo from {string}")]
async fn receives_photo(world: &mut SessionWorld, name: String, sender: String) {
    let sender_id = world.peer(&sender).identity.id();
    let expected = world.last_image.clone();
    let event = world
        .wait_for(&name, &format!("a photo from {sender}"), |event| {
            matches!(
                event,
                SessionEvent::PayloadReceived { from, .. } if from.id() == sender_id
            )
        })
        .await;

    match event {
        SessionEvent::PayloadReceived { bytes, format, .. } => {
            assert_eq!(bytes, expected);
            assert_eq!(format, ImageFormat::Png);
        }
        other => panic!("Expected a photo, got {:?}", other),
    }
}

#[then(expr = "{string} receives nothing from {string}")]
async fn receives_nothing_from(world: &mut SessionWorld, name: String, sender: String) {
    let sender_id = world.peer(&sender).identity.id();
    let events = world.drain(&name).await;
    assert!(
        !events.iter().any(|event| matches!(
            event,
            SessionEvent::TextReceived { from, .. } | SessionEvent::PayloadReceived { from, .. }
                if from.id() == sender_id
        )),
        "{name} received {:?}",
        events
    );
}
