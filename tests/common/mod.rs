pub mod relay;

use std::net;
use std::thread;
use std::time;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use tether::{Config, Envelope, Handler, Message, Outbox, Registry, Reliability};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Reliable message with an arbitrarily large body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub data: String,
}

impl Message for Blob {
    const KIND: &'static str = "test.Blob";
    const RELIABILITY: Reliability = Reliability::Reliable;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub n: u32,
}

impl Message for Step {
    const KIND: &'static str = "test.Step";
    const RELIABILITY: Reliability = Reliability::OrderedAndReliable;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl Message for Note {
    const KIND: &'static str = "test.Note";
    const RELIABILITY: Reliability = Reliability::Unreliable;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
}

impl Message for Question {
    const KIND: &'static str = "test.Question";
    const RELIABILITY: Reliability = Reliability::Reliable;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
}

impl Message for Answer {
    const KIND: &'static str = "test.Answer";
    const RELIABILITY: Reliability = Reliability::Reliable;
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();

    registry.register::<Blob>().unwrap();
    registry.register::<Step>().unwrap();
    registry.register::<Note>().unwrap();
    registry.register::<Question>().unwrap();
    registry.register::<Answer>().unwrap();

    registry
}

/// Loopback configuration with an ephemeral server port.
pub fn local_config() -> Config {
    Config {
        server_port: 0,
        bind_ip: net::Ipv4Addr::LOCALHOST.into(),
        ..Default::default()
    }
}

/// Forwards everything the endpoint delivers to a channel.
pub struct Recorder {
    messages: Sender<Envelope>,
    outages: Sender<()>,
}

pub struct Recording {
    pub messages: Receiver<Envelope>,
    pub outages: Receiver<()>,
}

pub fn recorder() -> (Recorder, Recording) {
    let (messages_tx, messages_rx) = crossbeam_channel::unbounded();
    let (outages_tx, outages_rx) = crossbeam_channel::unbounded();

    (
        Recorder {
            messages: messages_tx,
            outages: outages_tx,
        },
        Recording {
            messages: messages_rx,
            outages: outages_rx,
        },
    )
}

impl Handler for Recorder {
    fn receive(&self, _outbox: &Outbox, message: &Envelope) -> bool {
        let _ = self.messages.send(message.clone());
        true
    }

    fn connectivity_changed(&self, _outbox: &Outbox) {
        let _ = self.outages.send(());
    }
}

/// Handler built from a closure.
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Outbox, &Envelope) -> bool + Send + Sync + 'static,
{
    fn receive(&self, outbox: &Outbox, message: &Envelope) -> bool {
        (self.0)(outbox, message)
    }
}

/// Polls `condition` until it holds or `timeout` passes. Returns the final result.
pub fn wait_until(timeout: time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = time::Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        if time::Instant::now() >= deadline {
            return false;
        }

        thread::sleep(time::Duration::from_millis(5));
    }
}
