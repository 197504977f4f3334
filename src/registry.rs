use crate::receive_stream::ReceiveStream;
use crate::send_stream::SendStream;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// The identity of one transfer: the outer message token plus the peer address.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TransferKey {
    pub token: Bytes,
    pub peer_addr: SocketAddr,
}

impl TransferKey {
    pub fn new(token: Bytes, peer_addr: SocketAddr) -> TransferKey {
        TransferKey { token, peer_addr }
    }
}

#[derive(Clone)]
pub enum Transfer {
    Send(Arc<SendStream>),
    Receive(Arc<ReceiveStream>),
}

/// The store of live transfers, owned by the endpoint and passed around by reference - there is
///  deliberately no process-wide instance.
///
/// It guarantees at most one live transfer per key: the first creator wins, racing creators
///  observe the existing entry. Removing a key is how a transfer is completed, failed *and*
///  cancelled - a frame arriving for a removed key starts a fresh transfer, it never resumes
///  the old one.
#[derive(Default)]
pub struct TransferRegistry {
    transfers: Mutex<FxHashMap<TransferKey, Transfer>>,
}

impl TransferRegistry {
    pub fn new() -> TransferRegistry {
        TransferRegistry::default()
    }

    /// The live receive transfer for a key, creating it through `create` if there is none.
    ///  Returns `None` if the key is occupied by a *send* transfer - the frame that triggered
    ///  the lookup is bogus and must be dropped.
    pub fn get_or_create_receive(
        &self,
        key: &TransferKey,
        create: impl FnOnce() -> Arc<ReceiveStream>,
    ) -> Option<Arc<ReceiveStream>> {
        let mut transfers = self.transfers.lock().unwrap();

        match transfers.entry(key.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Transfer::Receive(stream) => Some(stream.clone()),
                Transfer::Send(_) => None,
            },
            Entry::Vacant(entry) => {
                let stream = create();
                entry.insert(Transfer::Receive(stream.clone()));
                Some(stream)
            }
        }
    }

    /// Register a send transfer. Returns `false` (leaving the registry untouched) if any live
    ///  transfer already exists for the key.
    pub fn insert_send(&self, key: &TransferKey, stream: Arc<SendStream>) -> bool {
        let mut transfers = self.transfers.lock().unwrap();

        match transfers.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Transfer::Send(stream));
                true
            }
        }
    }

    pub fn get_send(&self, key: &TransferKey) -> Option<Arc<SendStream>> {
        match self.transfers.lock().unwrap().get(key) {
            Some(Transfer::Send(stream)) => Some(stream.clone()),
            _ => None,
        }
    }

    pub fn get_receive(&self, key: &TransferKey) -> Option<Arc<ReceiveStream>> {
        match self.transfers.lock().unwrap().get(key) {
            Some(Transfer::Receive(stream)) => Some(stream.clone()),
            _ => None,
        }
    }

    pub fn remove(&self, key: &TransferKey) -> Option<Transfer> {
        self.transfers.lock().unwrap().remove(key)
    }

    pub fn num_transfers(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }
}
