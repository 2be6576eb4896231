use std::collections::VecDeque;

use crate::error::{Error, Result};

/// First byte of every fragment datagram.
pub const FRAGMENT_MARKER: u8 = b'P';

/// Returns the number of fragments needed to carry `len` bytes in datagrams of at most
/// `datagram_size_max` bytes.
pub fn fragment_count(len: usize, datagram_size_max: usize) -> usize {
    debug_assert!(datagram_size_max > 1);

    let chunk_size = datagram_size_max - 1;

    (len + chunk_size - 1) / chunk_size
}

/// Splits an encoded message into marker-prefixed fragments of at most `datagram_size_max` bytes.
pub fn split(bytes: &[u8], datagram_size_max: usize) -> Vec<Box<[u8]>> {
    debug_assert!(datagram_size_max > 1);

    let mut fragments = Vec::with_capacity(fragment_count(bytes.len(), datagram_size_max));

    for chunk in bytes.chunks(datagram_size_max - 1) {
        let mut fragment = Vec::with_capacity(chunk.len() + 1);
        fragment.push(FRAGMENT_MARKER);
        fragment.extend_from_slice(chunk);
        fragments.push(fragment.into_boxed_slice());
    }

    fragments
}

/// Collects fragments until the announced count is reached.
///
/// Announcements queue up in arrival order; fragments always count towards the oldest one.
#[derive(Debug, Default)]
pub struct Reassembly {
    // Fragment counts of announced packs, oldest first
    announced: VecDeque<usize>,
    // Fragments of the oldest announced pack
    fragments: Vec<Box<[u8]>>,
}

impl Reassembly {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a pack announcement.
    pub fn announce(&mut self, number_of_parts: usize) {
        self.announced.push_back(number_of_parts);
    }

    /// Returns true if fragments are currently expected.
    pub fn is_pending(&self) -> bool {
        !self.announced.is_empty()
    }

    /// Number of fragments received so far for the current pack.
    pub fn fragments_received(&self) -> usize {
        self.fragments.len()
    }

    /// Adds a fragment to the current pack. Returns the reassembled message bytes once the pack is
    /// complete, and Ok(None) while more fragments are expected.
    ///
    /// A fragment arriving while no pack is announced is an error, as is a completed pack
    /// containing a datagram which does not begin with the fragment marker. In both cases the
    /// fragment is discarded; in the latter case, the pack is as well.
    pub fn push(&mut self, fragment: Box<[u8]>) -> Result<Option<Vec<u8>>> {
        let expected = match self.announced.front() {
            Some(&expected) => expected,
            None => return Err(Error::reassembly("fragment received without a pack announcement")),
        };

        self.fragments.push(fragment);

        if self.fragments.len() < expected {
            return Ok(None);
        }

        self.announced.pop_front();

        let fragments = std::mem::take(&mut self.fragments);

        join(&fragments).map(Some)
    }
}

/// Strips the marker from each fragment and concatenates the remainders in order.
pub fn join(fragments: &[Box<[u8]>]) -> Result<Vec<u8>> {
    let len = fragments
        .iter()
        .map(|fragment| fragment.len().saturating_sub(1))
        .sum();

    let mut bytes = Vec::with_capacity(len);

    for (index, fragment) in fragments.iter().enumerate() {
        match fragment.split_first() {
            Some((&FRAGMENT_MARKER, data)) => bytes.extend_from_slice(data),
            _ => {
                return Err(Error::reassembly(format!(
                    "part {} of {} is not a fragment",
                    index + 1,
                    fragments.len()
                )));
            }
        }
    }

    Ok(bytes)
}
