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


//! Per-session tracking of mailbox changes the client has yet to be told
//! about.

use std::collections::BTreeSet;
use std::mem;
use std::sync::{Mutex, MutexGuard};

use super::event::*;
use super::model::*;

/// Accumulates the changes one session needs to report through unsolicited
/// responses.
///
/// Events may be delivered from whatever thread commits them while the
/// session itself reads the accumulated state, so everything is behind a
/// lock.
#[derive(Debug)]
pub struct EventAnalyser {
    session: SessionId,
    state: Mutex<AnalyserState>,
}

#[derive(Debug, Default)]
struct AnalyserState {
    /// Whether any message has been added since the last reset.
    size_changed: bool,
    /// UIDs which have seen client-visible flag changes since the last
    /// reset.
    flag_update_uids: BTreeSet<Uid>,
    /// Sequence numbers of messages expunged by other sessions since the
    /// last reset, in the order the `EXPUNGE` responses must be sent.
    expunged: Vec<Seqnum>,
    /// If true, flag changes made by this very session are not recorded.
    silent_flag_changes: bool,
}

/// Everything accumulated by an `EventAnalyser` up to the point it was
/// drained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnalyserDrain {
    /// In the order they must be reported.
    pub expunged: Vec<Seqnum>,
    pub size_changed: bool,
    /// Sorted ascending.
    pub flag_update_uids: Vec<Uid>,
}

impl EventAnalyser {
    pub fn new(session: SessionId) -> Self {
        EventAnalyser {
            session,
            state: Mutex::new(AnalyserState::default()),
        }
    }

    /// The session whose view this analyser tracks.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Record whatever `event` implies for the session.
    pub fn event(&self, event: &MailboxEvent) {
        let mut state = self.state();
        match event.kind {
            EventKind::Added(_) => state.size_changed = true,
            EventKind::FlagsUpdated { uid, delta } => {
                if !delta.is_client_visible() {
                    return;
                }

                // The session that made a silent change (i.e. `STORE
                // .SILENT`) already knows the result.
                if state.silent_flag_changes
                    && Some(self.session) == event.source
                {
                    return;
                }

                state.flag_update_uids.insert(uid);
            }
            EventKind::Expunged(_) | EventKind::Other => (),
        }
    }

    /// Record that the message which had sequence number `seqnum` was
    /// expunged.
    ///
    /// `seqnum` must be relative to the mailbox as it was immediately before
    /// that expunge, i.e. it is only valid after every previously recorded
    /// expunge has been reported. Expunges made by this session itself are
    /// ignored, since the session reports those as part of the command.
    pub fn expunged(&self, seqnum: Seqnum, source: Option<SessionId>) {
        if Some(self.session) == source {
            return;
        }

        self.state().expunged.push(seqnum);
    }

    /// Return the sequence numbers of pending expunges, in the order they
    /// must be reported.
    pub fn pending_expunges(&self) -> Vec<Seqnum> {
        self.state().expunged.clone()
    }

    /// Return whether any messages have been added since the last reset.
    pub fn is_size_changed(&self) -> bool {
        self.state().size_changed
    }

    /// Return a snapshot of the UIDs with flag changes to report, in
    /// ascending order.
    ///
    /// Does not reset anything; events arriving after this call are not
    /// reflected in the returned iterator.
    pub fn flag_update_uids(&self) -> impl Iterator<Item = Uid> {
        self.state()
            .flag_update_uids
            .iter()
            .copied()
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Forget everything accumulated so far.
    ///
    /// Must be called once per response cycle after the accessors have been
    /// consumed. `drain()` does both at once.
    pub fn reset(&self) {
        let mut state = self.state();
        state.expunged.clear();
        state.size_changed = false;
        state.flag_update_uids.clear();
    }

    /// Atomically read and reset the accumulated state.
    pub fn drain(&self) -> AnalyserDrain {
        let mut state = self.state();
        AnalyserDrain {
            expunged: mem::take(&mut state.expunged),
            size_changed: mem::take(&mut state.size_changed),
            flag_update_uids: mem::take(&mut state.flag_update_uids)
                .into_iter()
                .collect(),
        }
    }

    /// Control whether flag changes made by this session are suppressed.
    ///
    /// This only affects events delivered after the call.
    pub fn set_silent_flag_changes(&self, silent: bool) {
        self.state().silent_flag_changes = silent;
    }

    pub fn is_silent_flag_changes(&self) -> bool {
        self.state().silent_flag_changes
    }

    fn state(&self) -> MutexGuard<'_, AnalyserState> {
        self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ME: SessionId = SessionId(1);
    const THEM: SessionId = SessionId(2);

    fn flags(uid: u64, delta: SystemFlags, source: SessionId) -> MailboxEvent {
        MailboxEvent::flags_updated(Uid::u(uid), delta, Some(source))
    }

    fn changed(analyser: &EventAnalyser) -> Vec<Uid> {
        analyser.flag_update_uids().collect()
    }

    #[test]
    fn added_sets_size_changed() {
        let analyser = EventAnalyser::new(ME);
        assert!(!analyser.is_size_changed());

        analyser.event(&MailboxEvent::added(Uid::u(1), None));
        assert!(analyser.is_size_changed());
        // Reading does not reset
        assert!(analyser.is_size_changed());
        assert!(changed(&analyser).is_empty());
    }

    #[test]
    fn expunged_and_other_ignored() {
        let analyser = EventAnalyser::new(ME);
        analyser.event(&MailboxEvent::expunged(Uid::u(1), Some(THEM)));
        analyser.event(&MailboxEvent {
            source: Some(THEM),
            kind: EventKind::Other,
        });
        assert_eq!(AnalyserDrain::default(), analyser.drain());
    }

    #[test]
    fn silent_changes_suppressed_only_for_own_session() {
        let analyser = EventAnalyser::new(ME);
        analyser.set_silent_flag_changes(true);

        analyser.event(&flags(1, SystemFlags::ANSWERED, ME));
        assert!(changed(&analyser).is_empty());

        analyser.event(&flags(1, SystemFlags::ANSWERED, THEM));
        assert_eq!(vec![Uid::u(1)], changed(&analyser));

        // Changes with no source session are never our own
        analyser.event(&MailboxEvent::flags_updated(
            Uid::u(2),
            SystemFlags::SEEN,
            None,
        ));
        assert_eq!(vec![Uid::u(1), Uid::u(2)], changed(&analyser));
    }

    #[test]
    fn own_changes_reported_when_not_silent() {
        let analyser = EventAnalyser::new(ME);
        analyser.event(&flags(3, SystemFlags::FLAGGED, ME));
        assert_eq!(vec![Uid::u(3)], changed(&analyser));
    }

    #[test]
    fn silent_mode_is_not_retroactive() {
        let analyser = EventAnalyser::new(ME);
        analyser.event(&flags(1, SystemFlags::SEEN, ME));
        analyser.set_silent_flag_changes(true);
        assert!(analyser.is_silent_flag_changes());
        analyser.event(&flags(2, SystemFlags::SEEN, ME));
        assert_eq!(vec![Uid::u(1)], changed(&analyser));

        analyser.set_silent_flag_changes(false);
        analyser.event(&flags(2, SystemFlags::SEEN, ME));
        assert_eq!(vec![Uid::u(1), Uid::u(2)], changed(&analyser));
    }

    #[test]
    fn recent_only_changes_never_reported() {
        for &silent in &[false, true] {
            for &source in &[ME, THEM] {
                let analyser = EventAnalyser::new(ME);
                analyser.set_silent_flag_changes(silent);
                analyser.event(&flags(1, SystemFlags::RECENT, source));
                analyser.event(&flags(2, SystemFlags::empty(), source));
                assert!(changed(&analyser).is_empty());
            }
        }

        let analyser = EventAnalyser::new(ME);
        analyser.event(&flags(
            1,
            SystemFlags::RECENT | SystemFlags::DELETED,
            THEM,
        ));
        assert_eq!(vec![Uid::u(1)], changed(&analyser));
    }

    #[test]
    fn reset_clears_exactly() {
        let analyser = EventAnalyser::new(ME);
        analyser.set_silent_flag_changes(true);
        analyser.event(&MailboxEvent::added(Uid::u(5), None));
        analyser.event(&flags(5, SystemFlags::SEEN, THEM));
        analyser.event(&flags(4, SystemFlags::SEEN, THEM));
        assert_eq!(vec![Uid::u(4), Uid::u(5)], changed(&analyser));

        analyser.reset();
        assert!(!analyser.is_size_changed());
        assert!(changed(&analyser).is_empty());
        // Silent mode is configuration, not accumulated state
        assert!(analyser.is_silent_flag_changes());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_events() {
        let analyser = EventAnalyser::new(ME);
        analyser.event(&flags(1, SystemFlags::SEEN, THEM));
        let snapshot = analyser.flag_update_uids();
        analyser.event(&flags(2, SystemFlags::SEEN, THEM));
        assert_eq!(vec![Uid::u(1)], snapshot.collect::<Vec<_>>());
        assert_eq!(vec![Uid::u(1), Uid::u(2)], changed(&analyser));
    }

    #[test]
    fn drain_reads_and_resets() {
        let analyser = EventAnalyser::new(ME);
        analyser.event(&MailboxEvent::added(Uid::u(9), None));
        analyser.event(&flags(2, SystemFlags::DRAFT, THEM));
        analyser.event(&flags(2, SystemFlags::SEEN, THEM));

        analyser.expunged(Seqnum::u(4), Some(THEM));

        assert_eq!(
            AnalyserDrain {
                expunged: vec![Seqnum::u(4)],
                size_changed: true,
                flag_update_uids: vec![Uid::u(2)],
            },
            analyser.drain()
        );
        assert_eq!(AnalyserDrain::default(), analyser.drain());
    }

    #[test]
    fn expunges_by_others_queued_in_order() {
        let analyser = EventAnalyser::new(ME);
        analyser.expunged(Seqnum::u(5), Some(THEM));
        analyser.expunged(Seqnum::u(2), None);
        // Our own expunges were already reported by the command
        analyser.expunged(Seqnum::u(1), Some(ME));
        analyser.expunged(Seqnum::u(2), Some(THEM));
        assert_eq!(
            vec![Seqnum::u(5), Seqnum::u(2), Seqnum::u(2)],
            analyser.pending_expunges()
        );
        assert!(!analyser.is_size_changed());

        analyser.reset();
        assert!(analyser.pending_expunges().is_empty());
    }
}
