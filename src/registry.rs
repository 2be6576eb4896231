//! Closed table of the message kinds an endpoint understands.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::message::{Envelope, Message};
use crate::protocol;
use crate::Reliability;

/// Deferred call to a received message's processing hook.
pub type Job = Box<dyn FnOnce() + Send>;

struct KindInfo {
    reliability: Reliability,
    main_thread: bool,
    // Rebuilds the typed message and binds its process() hook
    prepare: fn(&Envelope) -> Result<Job>,
}

/// Maps type tags to the kinds they reconstruct.
///
/// The protocol kinds ([`protocol::Pack`], [`protocol::Received`], [`protocol::Alive`]) are always
/// present. Application kinds are added with [`Registry::register`] before the registry is handed
/// to an endpoint; a datagram naming any other tag is dropped on arrival.
pub struct Registry {
    kinds: HashMap<&'static str, KindInfo>,
}

fn prepare<M: Message>(envelope: &Envelope) -> Result<Job> {
    let message = envelope.decode::<M>()?;
    Ok(Box::new(move || message.process()))
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            kinds: HashMap::new(),
        };

        registry.insert::<protocol::Pack>();
        registry.insert::<protocol::Received>();
        registry.insert::<protocol::Alive>();

        registry
    }

    fn insert<M: Message>(&mut self) {
        self.kinds.insert(
            M::KIND,
            KindInfo {
                reliability: M::RELIABILITY,
                main_thread: M::MAIN_THREAD,
                prepare: prepare::<M>,
            },
        );
    }

    /// Adds the kind `M`. Fails if its tag is empty or already taken, including by a protocol
    /// kind.
    pub fn register<M: Message>(&mut self) -> Result<&mut Self> {
        if M::KIND.is_empty() || self.kinds.contains_key(M::KIND) {
            return Err(Error::DuplicateKind(M::KIND.to_owned()));
        }

        self.insert::<M>();

        Ok(self)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn reliability(&self, kind: &str) -> Option<Reliability> {
        self.kinds.get(kind).map(|info| info.reliability)
    }

    /// Returns true if messages of this kind must be processed on the application's main thread.
    pub fn main_thread(&self, kind: &str) -> bool {
        self.kinds.get(kind).map_or(false, |info| info.main_thread)
    }

    /// Reconstructs the typed message carried by `envelope` and returns its processing hook.
    pub fn prepare(&self, envelope: &Envelope) -> Result<Job> {
        match self.kinds.get(envelope.kind.as_str()) {
            Some(info) => (info.prepare)(envelope),
            None => Err(Error::UnknownKind(envelope.kind.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;

    static PROCESSED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Serialize, Deserialize)]
    struct Harvest {
        amount: usize,
    }

    impl Message for Harvest {
        const KIND: &'static str = "test.Harvest";
        const RELIABILITY: Reliability = Reliability::OrderedAndReliable;
        const MAIN_THREAD: bool = true;

        fn process(self) {
            PROCESSED.fetch_add(self.amount, Ordering::SeqCst);
        }
    }

    #[derive(Serialize, Deserialize)]
    struct FakeAck {}

    impl Message for FakeAck {
        const KIND: &'static str = protocol::Received::KIND;
        const RELIABILITY: Reliability = Reliability::Reliable;
    }

    #[test]
    fn protocol_kinds_are_preregistered() {
        let registry = Registry::new();

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.reliability(protocol::Alive::KIND),
            Some(Reliability::Reliable)
        );
        assert_eq!(
            registry.reliability(protocol::Received::KIND),
            Some(Reliability::Unreliable)
        );
    }

    #[test]
    fn duplicate_kinds_are_rejected() {
        let mut registry = Registry::new();

        registry.register::<Harvest>().unwrap();

        assert!(matches!(
            registry.register::<Harvest>(),
            Err(Error::DuplicateKind(_))
        ));
        assert!(matches!(
            registry.register::<FakeAck>(),
            Err(Error::DuplicateKind(_))
        ));
        assert_eq!(
            registry.reliability(protocol::Received::KIND),
            Some(Reliability::Unreliable)
        );
    }

    #[test]
    fn prepare_binds_process_hook() {
        let mut registry = Registry::new();
        registry.register::<Harvest>().unwrap();

        let envelope = Envelope::new(&Harvest { amount: 7 }).unwrap();

        assert!(registry.main_thread(Harvest::KIND));

        let job = registry.prepare(&envelope).unwrap();
        job();

        assert_eq!(PROCESSED.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn unknown_kind_cannot_be_prepared() {
        let registry = Registry::new();

        let envelope = Envelope::new(&Harvest { amount: 1 }).unwrap();

        assert!(matches!(
            registry.prepare(&envelope),
            Err(Error::UnknownKind(_))
        ));
    }
}
