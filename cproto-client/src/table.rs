//! Lock-free completion table.
//!
//! A fixed array of slots indexed by `seq % capacity`. Each slot owns one
//! atomic word packing the occupant's sequence number with the slot state:
//!
//! ```text
//! word = (seq << 32) | state
//!
//! FREE --claim--> CLAIMED --arm--> ARMED --take--> RESOLVING --release--> FREE
//! ```
//!
//! Only the thread that moved a slot into `CLAIMED` or `RESOLVING` touches
//! its entry cell. Resolution compares against the full word, so a late
//! response or timeout for an old sequence can never hit a newer occupant of
//! the same slot.
//!
//! The table does **not** queue: two live calls whose sequence numbers differ
//! by a multiple of the capacity collide, and the second claim fails. Callers
//! must keep at most `capacity` calls outstanding to avoid such collisions.

use crate::answer::Answer;
use crate::error::ClientError;
use cproto_protocol::CmdCode;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback invoked exactly once with the outcome of a call.
pub type Completion = Box<dyn for<'a> FnOnce(Result<Answer<'a>, ClientError>) + Send + 'static>;

/// Boxes a closure as a [`Completion`], pinning down its higher-ranked signature.
pub fn completion<F>(f: F) -> Completion
where
    F: for<'a> FnOnce(Result<Answer<'a>, ClientError>) + Send + 'static,
{
    Box::new(f)
}

const FREE: u64 = 0;
const CLAIMED: u64 = 1;
const ARMED: u64 = 2;
const RESOLVING: u64 = 3;
const STATE_MASK: u64 = 0xFFFF_FFFF;

fn pack(seq: u32, state: u64) -> u64 {
    (u64::from(seq) << 32) | state
}

fn state_of(word: u64) -> u64 {
    word & STATE_MASK
}

fn seq_of(word: u64) -> u32 {
    (word >> 32) as u32
}

/// A call taken out of the table by whoever resolves it.
pub struct Entry {
    pub seq: u32,
    pub command: CmdCode,
    pub completion: Completion,
}

impl Entry {
    /// Invokes the completion, consuming the entry.
    pub fn resolve(self, result: Result<Answer<'_>, ClientError>) {
        (self.completion)(result)
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("seq", &self.seq)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

struct Pending {
    command: CmdCode,
    completion: Completion,
}

struct Slot {
    word: AtomicU64,
    deadline: AtomicU64,
    pending: UnsafeCell<Option<Pending>>,
}

// SAFETY: `pending` is only accessed by the thread that won the FREE->CLAIMED
// or ARMED->RESOLVING transition of `word`; the acquire/release pairs on
// `word` order those accesses. `Completion` is `Send`.
unsafe impl Sync for Slot {}

impl Slot {
    fn new() -> Self {
        Self {
            word: AtomicU64::new(pack(0, FREE)),
            deadline: AtomicU64::new(0),
            pending: UnsafeCell::new(None),
        }
    }

    /// ARMED(seq) -> RESOLVING(seq) -> FREE(seq), returning the entry.
    fn take_if(&self, word: u64) -> Option<Entry> {
        debug_assert_eq!(state_of(word), ARMED);
        let seq = seq_of(word);
        self.word
            .compare_exchange(word, pack(seq, RESOLVING), Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;

        // SAFETY: we own the slot until it is released below.
        let pending = unsafe { (*self.pending.get()).take() };
        self.deadline.store(0, Ordering::Relaxed);
        self.word.store(pack(seq, FREE), Ordering::Release);

        pending.map(|p| Entry {
            seq,
            command: p.command,
            completion: p.completion,
        })
    }
}

/// Fixed-capacity map from sequence number to pending completion.
pub struct CompletionTable {
    slots: Box<[Slot]>,
}

impl CompletionTable {
    /// Creates a table with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, seq: u32) -> &Slot {
        &self.slots[seq as usize % self.slots.len()]
    }

    /// Registers a call under `seq`.
    ///
    /// Fails without blocking when the slot `seq` maps to is occupied, handing
    /// the completion back to the caller.
    pub fn claim(
        &self,
        seq: u32,
        command: CmdCode,
        deadline: u64,
        completion: Completion,
    ) -> Result<(), Completion> {
        let slot = self.slot(seq);
        let current = slot.word.load(Ordering::Acquire);
        if state_of(current) != FREE {
            return Err(completion);
        }
        if slot
            .word
            .compare_exchange(current, pack(seq, CLAIMED), Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(completion);
        }

        // SAFETY: the CAS above gave us exclusive ownership of the slot.
        unsafe {
            *slot.pending.get() = Some(Pending {
                command,
                completion,
            });
        }
        slot.deadline.store(deadline, Ordering::Relaxed);
        // SeqCst pairs with the state check dispatchers perform after arming
        // and with `take_all`, so a failing connection cannot miss this slot.
        slot.word.store(pack(seq, ARMED), Ordering::SeqCst);
        Ok(())
    }

    /// Removes the live call registered under `seq`.
    ///
    /// Returns `None` if the call was already resolved (timeout, cascade,
    /// duplicate response) or never existed.
    pub fn take(&self, seq: u32) -> Option<Entry> {
        self.slot(seq).take_if(pack(seq, ARMED))
    }

    /// Removes every live call whose non-zero deadline is at or before `now`.
    pub fn take_expired(&self, now: u64) -> Vec<Entry> {
        let mut expired = Vec::new();
        for slot in self.slots.iter() {
            let word = slot.word.load(Ordering::Acquire);
            if state_of(word) != ARMED {
                continue;
            }
            let deadline = slot.deadline.load(Ordering::Relaxed);
            if deadline == 0 || now < deadline {
                continue;
            }
            if let Some(entry) = slot.take_if(word) {
                expired.push(entry);
            }
        }
        expired
    }

    /// Removes every live call.
    pub fn take_all(&self) -> Vec<Entry> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let word = slot.word.load(Ordering::SeqCst);
                if state_of(word) == ARMED {
                    slot.take_if(word)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Number of occupied slots.
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| state_of(slot.word.load(Ordering::Relaxed)) != FREE)
            .count()
    }
}

impl std::fmt::Debug for CompletionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTable")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}
