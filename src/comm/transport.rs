use super::collective::Collective;
use super::{Body, Tag};

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// In-flight sends a rank may hold before it must block for drainage.
pub(crate) const MAX_PENDING_SENDS: usize = 256;

/// Per-rank inbox depth. Sends past this park in the pending pool.
const CHANNEL_DEPTH: usize = 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) source: usize,
    pub(crate) tag: Tag,
    pub(crate) body: Body,
}

/// A set of connected ranks. Point-to-point messages are FIFO per
/// (source, destination) pair; the collective is shared by all members.
pub(crate) struct World;

impl World {
    pub(crate) fn connect(size: usize) -> Vec<Communicator> {
        let collective = Arc::new(Collective::new(size));
        let mut senders = Vec::with_capacity(size);
        let mut inboxes = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
            senders.push(tx);
            inboxes.push(rx);
        }

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Communicator {
                rank,
                senders: senders.clone(),
                inbox,
                stash: VecDeque::new(),
                pending: VecDeque::new(),
                collective: Arc::clone(&collective),
            })
            .collect()
    }
}

struct PendingSend {
    dest: usize,
    envelope: Envelope,
}

/// One rank's endpoint: senders to every rank, its own inbox, a stash of
/// received-but-unmatched envelopes, and the pending-send pool. Single-owner,
/// mutated only by the rank's own loop.
pub(crate) struct Communicator {
    rank: usize,
    senders: Vec<SyncSender<Envelope>>,
    inbox: Receiver<Envelope>,
    stash: VecDeque<Envelope>,
    pending: VecDeque<PendingSend>,
    collective: Arc<Collective>,
}

impl Communicator {
    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn size(&self) -> usize {
        self.senders.len()
    }

    pub(crate) fn collective(&self) -> &Collective {
        &self.collective
    }

    /// Blocking send. A disconnected destination has already shut down; the
    /// message is dropped, matching a send into a finalized rank.
    pub(crate) fn send(&self, dest: usize, tag: Tag, body: Body) {
        let envelope = Envelope {
            source: self.rank,
            tag,
            body,
        };
        let _ = self.senders[dest].send(envelope);
    }

    /// Non-blocking send. The envelope stays owned by the pending pool until
    /// the destination inbox accepts it; a full pool forces a blocking drain
    /// first, so at most `MAX_PENDING_SENDS` envelopes are ever in flight.
    pub(crate) fn send_async(&mut self, dest: usize, tag: Tag, body: Body) {
        self.progress_sends();
        if self.pending.len() >= MAX_PENDING_SENDS {
            self.flush_sends();
        }

        let envelope = Envelope {
            source: self.rank,
            tag,
            body,
        };
        // A newer envelope must never overtake a parked one for the same
        // destination; messages between two ranks stay FIFO.
        if self.pending.iter().any(|entry| entry.dest == dest) {
            self.pending.push_back(PendingSend { dest, envelope });
            return;
        }
        match self.senders[dest].try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                self.pending.push_back(PendingSend { dest, envelope });
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Retry parked sends in order; completed entries release their payload.
    /// Once a destination refuses, later entries for it are kept back.
    pub(crate) fn progress_sends(&mut self) {
        let mut still_pending: VecDeque<PendingSend> = VecDeque::new();
        let mut refusing: Vec<usize> = Vec::new();
        while let Some(entry) = self.pending.pop_front() {
            if refusing.contains(&entry.dest) {
                still_pending.push_back(entry);
                continue;
            }
            match self.senders[entry.dest].try_send(entry.envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => {
                    refusing.push(entry.dest);
                    still_pending.push_back(PendingSend {
                        dest: entry.dest,
                        envelope,
                    });
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        self.pending = still_pending;
    }

    /// Block until every parked send is delivered or its peer is gone.
    pub(crate) fn flush_sends(&mut self) {
        while !self.pending.is_empty() {
            self.progress_sends();
            if !self.pending.is_empty() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    fn matches(envelope: &Envelope, source: Option<usize>, tag: Option<Tag>) -> bool {
        source.is_none_or(|s| envelope.source == s) && tag.is_none_or(|t| envelope.tag == t)
    }

    fn drain_inbox(&mut self) {
        while let Ok(envelope) = self.inbox.try_recv() {
            self.stash.push_back(envelope);
        }
    }

    /// Non-blocking probe: is a matching message waiting?
    pub(crate) fn iprobe(&mut self, source: Option<usize>, tag: Option<Tag>) -> bool {
        self.drain_inbox();
        self.stash.iter().any(|e| Self::matches(e, source, tag))
    }

    /// Receive the earliest matching message, if one is already here.
    /// Non-matching traffic stays queued in arrival order.
    pub(crate) fn try_recv_match(&mut self, source: Option<usize>, tag: Option<Tag>) -> Option<Envelope> {
        self.drain_inbox();
        let index = self
            .stash
            .iter()
            .position(|e| Self::matches(e, source, tag))?;
        self.stash.remove(index)
    }

    /// Blocking matched receive. Parked sends are progressed while waiting so
    /// two ranks receiving from each other cannot starve.
    pub(crate) fn recv_match(&mut self, source: Option<usize>, tag: Option<Tag>) -> Envelope {
        loop {
            if let Some(envelope) = self.try_recv_match(source, tag) {
                return envelope;
            }
            self.progress_sends();
            match self.inbox.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => self.stash.push_back(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => unreachable!("own sender is always held"),
            }
        }
    }

    /// Matched receive bounded by a deadline, for drain phases.
    pub(crate) fn recv_match_deadline(
        &mut self,
        source: Option<usize>,
        tag: Option<Tag>,
        deadline: Instant,
    ) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.try_recv_match(source, tag) {
                return Some(envelope);
            }
            if Instant::now() >= deadline {
                return None;
            }
            self.progress_sends();
            if let Ok(envelope) = self.inbox.recv_timeout(POLL_INTERVAL) {
                self.stash.push_back(envelope);
            }
        }
    }
}
