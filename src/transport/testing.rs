//! In-memory datagram sink for engine tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::core::DatagramSink;
use crate::packet::PacketKind;

/// Records every datagram and can drop the next few to simulate loss.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    drop_next: AtomicUsize,
    fail_next: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Silently lose the next `n` datagrams (reported as sent).
    pub fn drop_next(&self, n: usize) {
        self.drop_next.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` send attempts with an I/O error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn kinds(&self) -> Vec<PacketKind> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(d, _)| PacketKind::from_code(d[0]))
            .collect()
    }

    pub fn count(&self, kind: PacketKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl DatagramSink for RecordingSink {
    fn send_datagram(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        if take_one(&self.fail_next) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "sink full"));
        }
        if !take_one(&self.drop_next) {
            self.sent.lock().push((data.to_vec(), to));
        }
        Ok(data.len())
    }
}
