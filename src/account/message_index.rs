//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.


//! The UID to sequence number mapping for a selected mailbox.
//!
//! Nothing here does I/O; it's simply the pure state management, wrapped in a
//! lock so that one index can be shared by every session that has the
//! mailbox selected.

use std::sync::{Mutex, MutexGuard};

use super::event::*;
use super::model::*;
use crate::support::error::Error;

/// The bidirectional mapping between UIDs and sequence numbers.
///
/// Every operation takes the instance's lock for its whole duration, so the
/// mapping is always observed in a consistent state.
///
/// The index can be mutated in two ways: by calling `add()` and `expunge()`
/// directly, or by feeding it events through `event()`, which only reacts to
/// `Added`. The owner must pick one path per change; applying the same
/// change through both is an error for expunges (the second attempt fails
/// with `NotTracked`) and a silent no-op for additions.
#[derive(Debug, Default)]
pub struct MessageIndex {
    state: Mutex<IndexState>,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    /// The UIDs of the current non-expunged messages.
    ///
    /// Sequence numbers correspond (with bias 1) to the elements in this
    /// array, which is therefore always sorted ascending with no duplicates.
    /// This makes both directions of translation at worst a binary search.
    ///
    /// New UIDs are always appended to the end, which is only valid because
    /// `add()` refuses UIDs less than `max_uid`.
    extant_messages: Vec<Uid>,

    /// The greatest UID ever tracked by this index.
    ///
    /// This does not go down when that message is expunged.
    max_uid: Option<Uid>,
}

impl MessageIndex {
    /// Build an index from the UIDs present in the mailbox at selection time.
    ///
    /// The input need not be sorted, and duplicates are ignored.
    pub fn new(initial_uids: impl IntoIterator<Item = Uid>) -> Self {
        let mut extant_messages = initial_uids.into_iter().collect::<Vec<_>>();
        extant_messages.sort_unstable();
        extant_messages.dedup();
        let max_uid = extant_messages.last().copied();

        MessageIndex {
            state: Mutex::new(IndexState {
                extant_messages,
                max_uid,
            }),
        }
    }

    /// Translate a sequence number query into a UID.
    ///
    /// A sequence number beyond the end of the mailbox yields the greatest UID
    /// ever seen, which is how `*` behaves at the end of a range. The
    /// wildcard itself resolves to the last message currently in the
    /// mailbox. `None` is only returned if there is no such UID.
    pub fn get_uid(&self, query: MsnQuery) -> Option<Uid> {
        self.state().get_uid(query)
    }

    /// Like `get_uid()`, but for a raw sequence number where -1 stands for
    /// `*`.
    ///
    /// Zero and other negative values are never valid and yield `None`.
    pub fn get_uid_raw(&self, raw: i64) -> Option<Uid> {
        MsnQuery::from_raw(raw).and_then(|q| self.get_uid(q))
    }

    /// Translate a UID into its current sequence number.
    ///
    /// Returns `None` if the message has been expunged or was never added.
    /// Callers must check this before using the result.
    pub fn get_msn(&self, uid: Uid) -> Option<Seqnum> {
        self.state().seqnum_of(uid)
    }

    /// Return whether the given UID currently has a sequence number.
    pub fn contains(&self, uid: Uid) -> bool {
        self.get_msn(uid).is_some()
    }

    /// Start tracking a new message, which is given the next sequence number.
    ///
    /// This is a no-op if `uid` is already tracked. Otherwise, fails with
    /// `Error::OutOfOrderUid` unless `uid` is greater than every UID seen so
    /// far: a lower UID would be out of place at the end of the sequence, and
    /// an expunged UID is never reused.
    pub fn add(&self, uid: Uid) -> Result<(), Error> {
        self.state().add(uid)
    }

    /// Stop tracking `uid`.
    ///
    /// Every message after it moves down one sequence number. Returns the
    /// sequence number the message had, which is what the `EXPUNGE`
    /// response must carry.
    pub fn expunge(&self, uid: Uid) -> Result<Seqnum, Error> {
        self.state().expunge(uid)
    }

    /// Stop tracking every UID in `uids` in one pass.
    ///
    /// If any UID is not tracked, nothing is changed and the first such UID
    /// is reported through `Error::NotTracked`.
    ///
    /// The returned pairs hold the sequence numbers from *before* the call,
    /// sorted ascending. `EXPUNGE` responses must be sent in the opposite
    /// order so that each sequence number is still correct when the client
    /// sees it.
    pub fn expunge_all(
        &self,
        uids: &[Uid],
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        self.state().expunge_all(uids)
    }

    /// React to a mailbox event.
    ///
    /// Only `Added` has any effect. Expunges must be applied with
    /// `expunge()`, since the caller generally needs the old sequence number.
    pub fn event(&self, event: &MailboxEvent) -> Result<(), Error> {
        match event.kind {
            EventKind::Added(uid) => self.add(uid),
            EventKind::Expunged(_)
            | EventKind::FlagsUpdated { .. }
            | EventKind::Other => Ok(()),
        }
    }

    /// Return the greatest UID ever tracked, including expunged messages.
    pub fn highest_uid(&self) -> Option<Uid> {
        self.state().max_uid
    }

    /// Return the number of messages, which is also the greatest sequence
    /// number.
    pub fn highest_msn(&self) -> usize {
        self.state().extant_messages.len()
    }

    /// Return the greatest sequence number, or `None` if the mailbox is
    /// empty.
    pub fn max_seqnum(&self) -> Option<Seqnum> {
        let len = self.highest_msn();
        if 0 == len {
            None
        } else {
            Some(Seqnum::from_index(len - 1))
        }
    }

    /// Return a snapshot of the tracked UIDs in sequence number order.
    pub fn uids(&self) -> Vec<Uid> {
        self.state().extant_messages.clone()
    }

    /// Return a snapshot of every sequence number and its UID.
    pub fn seqnums_uids(&self) -> Vec<(Seqnum, Uid)> {
        self.state()
            .extant_messages
            .iter()
            .copied()
            .enumerate()
            .map(|(ix, uid)| (Seqnum::from_index(ix), uid))
            .collect()
    }

    /// Verify the internal consistency of the index.
    ///
    /// This is a debugging aid; a correct index never fails it.
    pub fn check_valid(&self) -> Result<(), String> {
        self.state().check_valid()
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap()
    }
}

impl IndexState {
    fn seqnum_of(&self, uid: Uid) -> Option<Seqnum> {
        self.extant_messages
            .binary_search(&uid)
            .ok()
            .map(Seqnum::from_index)
    }

    fn get_uid(&self, query: MsnQuery) -> Option<Uid> {
        match query {
            MsnQuery::Exact(seqnum) => self
                .extant_messages
                .get(seqnum.to_index())
                .copied()
                .or(self.max_uid),
            MsnQuery::WildcardLargest => self.extant_messages.last().copied(),
        }
    }

    fn add(&mut self, uid: Uid) -> Result<(), Error> {
        if self.seqnum_of(uid).is_some() {
            return Ok(());
        }

        if let Some(highest) = self.max_uid {
            if uid <= highest {
                return Err(Error::OutOfOrderUid { uid, highest });
            }
        }

        self.extant_messages.push(uid);
        self.max_uid = Some(uid);
        Ok(())
    }

    fn expunge(&mut self, uid: Uid) -> Result<Seqnum, Error> {
        let ix = self
            .extant_messages
            .binary_search(&uid)
            .map_err(|_| Error::NotTracked(uid))?;
        // Shifting the tail down is the renumbering.
        self.extant_messages.remove(ix);
        Ok(Seqnum::from_index(ix))
    }

    fn expunge_all(
        &mut self,
        uids: &[Uid],
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        if let Some(&missing) =
            uids.iter().find(|&&uid| self.seqnum_of(uid).is_none())
        {
            return Err(Error::NotTracked(missing));
        }

        let mut doomed = uids.to_vec();
        doomed.sort_unstable();
        doomed.dedup();

        let mut expunged = Vec::with_capacity(doomed.len());
        let mut doomed = doomed.into_iter().peekable();
        let mut index = 0;
        // Every element of `doomed` is known to be present, and both lists
        // are sorted, so the next doomed UID is never behind the cursor.
        self.extant_messages.retain(|&uid| {
            let seqnum = Seqnum::from_index(index);
            index += 1;
            if Some(&uid) == doomed.peek() {
                doomed.next();
                expunged.push((seqnum, uid));
                false
            } else {
                true
            }
        });

        Ok(expunged)
    }

    fn check_valid(&self) -> Result<(), String> {
        if let Some(pair) =
            self.extant_messages.windows(2).find(|pair| pair[0] >= pair[1])
        {
            return Err(format!(
                "{:?} is followed by {:?}",
                pair[0], pair[1]
            ));
        }

        if let Some(&last) = self.extant_messages.last() {
            match self.max_uid {
                Some(max) if max >= last => (),
                max => {
                    return Err(format!(
                        "Max UID is {:?}, but {:?} is present",
                        max, last
                    ))
                }
            }
        }

        if self.extant_messages.len() > u32::MAX as usize {
            return Err(format!(
                "{} messages exceeds the sequence number space",
                self.extant_messages.len()
            ));
        }

        for (ix, &uid) in self.extant_messages.iter().enumerate() {
            let seqnum = Seqnum::from_index(ix);
            if Some(seqnum) != self.seqnum_of(uid) {
                return Err(format!(
                    "{:?} does not map back to {:?}",
                    uid, seqnum
                ));
            }
            if Some(uid) != self.get_uid(MsnQuery::Exact(seqnum)) {
                return Err(format!(
                    "{:?} does not map back to {:?}",
                    seqnum, uid
                ));
            }
        }

        Ok(())
    }
}
