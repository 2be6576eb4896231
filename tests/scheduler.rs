#[allow(dead_code)]
mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use tether::registry::Job;
use tether::{Endpoint, Envelope, Message, Reliability, Scheduler};

static SCORE: AtomicU32 = AtomicU32::new(0);

#[derive(Serialize, Deserialize)]
struct Goal {
    points: u32,
}

impl Message for Goal {
    const KIND: &'static str = "test.Goal";
    const RELIABILITY: Reliability = Reliability::Reliable;
    const MAIN_THREAD: bool = true;

    fn process(self) {
        SCORE.fetch_add(self.points, Ordering::SeqCst);
    }
}

struct Queue(Sender<(Job, thread::ThreadId)>);

impl Scheduler for Queue {
    fn schedule(&self, job: Job) {
        let _ = self.0.send((job, thread::current().id()));
    }
}

#[test]
fn main_thread_kinds_go_through_scheduler() {
    common::init_tracing();

    let mut registry = common::registry();
    registry.register::<Goal>().unwrap();

    let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();

    let (recorder, _recording) = common::recorder();
    let mut server = Endpoint::server(common::local_config(), registry, recorder)
        .with_scheduler(Queue(jobs_tx));
    let server_addr = server.start().unwrap();

    let mut client_registry = common::registry();
    client_registry.register::<Goal>().unwrap();

    let (client_recorder, _client_recording) = common::recorder();
    let mut client = Endpoint::client(common::local_config(), client_registry, client_recorder);
    client.start().unwrap();

    client.send_to(&Goal { points: 3 }, server_addr).unwrap();

    let (job, scheduled_on) = jobs_rx
        .recv_timeout(time::Duration::from_secs(2))
        .expect("nothing scheduled");

    assert_ne!(scheduled_on, thread::current().id());

    // Not processed until the main thread runs the job
    assert_eq!(SCORE.load(Ordering::SeqCst), 0);

    job();

    assert_eq!(SCORE.load(Ordering::SeqCst), 3);
}

#[test]
fn declined_message_is_not_processed() {
    common::init_tracing();

    #[derive(Serialize, Deserialize)]
    struct Penalty {}

    static PENALTIES: AtomicU32 = AtomicU32::new(0);

    impl Message for Penalty {
        const KIND: &'static str = "test.Penalty";
        const RELIABILITY: Reliability = Reliability::Reliable;

        fn process(self) {
            PENALTIES.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut registry = common::registry();
    registry.register::<Penalty>().unwrap();

    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();

    let mut server = Endpoint::server(
        common::local_config(),
        registry,
        common::FnHandler(move |_: &tether::Outbox, message: &Envelope| {
            let _ = seen_tx.send(message.kind.clone());
            false
        }),
    );
    let server_addr = server.start().unwrap();

    let mut client_registry = common::registry();
    client_registry.register::<Penalty>().unwrap();

    let (client_recorder, _client_recording) = common::recorder();
    let mut client = Endpoint::client(common::local_config(), client_registry, client_recorder);
    client.start().unwrap();

    client.send_to(&Penalty {}, server_addr).unwrap();

    assert_eq!(
        seen_rx.recv_timeout(time::Duration::from_secs(2)).unwrap(),
        Penalty::KIND
    );

    // Still acknowledged
    assert!(common::wait_until(time::Duration::from_secs(2), || {
        client.pending_count() == 0
    }));

    assert_eq!(PENALTIES.load(Ordering::SeqCst), 0);
}
