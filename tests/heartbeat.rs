#[allow(dead_code)]
mod common;

use std::net;
use std::time;

use tether::{Config, Endpoint};

#[test]
fn unanswered_heartbeat_raises_notification() {
    common::init_tracing();

    // A peer which never answers
    let silent = net::UdpSocket::bind("127.0.0.1:0").unwrap();
    silent
        .set_read_timeout(Some(time::Duration::from_millis(100)))
        .unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let (recorder, recording) = common::recorder();
    let mut client = Endpoint::client(
        Config {
            retry_timeout_ms: 200,
            ..common::local_config()
        },
        common::registry(),
        recorder,
    );
    client.start().unwrap();

    client.heartbeat(silent_addr).unwrap();

    recording
        .outages
        .recv_timeout(time::Duration::from_secs(2))
        .expect("no connectivity notification");

    // The heartbeat is still tracked, and was never resent
    assert_eq!(client.pending_count(), 1);

    let mut buffer = [0; 1024];
    let mut count = 0;

    while let Ok((len, _)) = silent.recv_from(&mut buffer) {
        assert_eq!(
            common::relay::kind_of(&buffer[..len]).as_deref(),
            Some("tether.Alive")
        );
        count += 1;
    }

    assert_eq!(count, 1);

    // The heartbeat stays expired, so every retry tick raises the notification again. Reading the
    // silent socket above took at least one read timeout, i.e. many ticks.
    let repeats = recording.outages.try_iter().count();
    assert!(repeats >= 3, "only {} repeated notifications", repeats);

    recording
        .outages
        .recv_timeout(time::Duration::from_millis(100))
        .expect("notification not repeated on the next tick");
}

#[test]
fn answered_heartbeat_is_silent() {
    common::init_tracing();

    let (server_recorder, server_recording) = common::recorder();
    let mut server = Endpoint::server(common::local_config(), common::registry(), server_recorder);
    let server_addr = server.start().unwrap();

    let (recorder, recording) = common::recorder();
    let mut client = Endpoint::client(
        Config {
            retry_timeout_ms: 200,
            ..common::local_config()
        },
        common::registry(),
        recorder,
    );
    client.start().unwrap();

    client.heartbeat(server_addr).unwrap();

    let alive = server_recording
        .messages
        .recv_timeout(time::Duration::from_secs(1))
        .unwrap();
    assert!(alive.is::<tether::protocol::Alive>());

    assert!(common::wait_until(time::Duration::from_secs(1), || {
        client.pending_count() == 0
    }));

    assert!(recording
        .outages
        .recv_timeout(time::Duration::from_millis(500))
        .is_err());
}
