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


//! Ties the shared index and the per-session analysers together.
//!
//! A `SharedMailbox` exists once per mailbox and is where every change gets
//! committed. Each session that selects the mailbox gets a
//! `SelectedMailbox`, which it polls between commands to learn what it must
//! tell the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};

use super::event::*;
use super::event_analyser::EventAnalyser;
use super::message_index::MessageIndex;
use super::model::*;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SessionConfig;

/// The state of one mailbox shared by every session that has it selected.
pub struct SharedMailbox {
    index: MessageIndex,
    /// The analysers of every session that has the mailbox selected.
    ///
    /// This lock is held for the whole of every commit, so that the index
    /// and every analyser see changes in the same order.
    subscribers: Mutex<Vec<Weak<EventAnalyser>>>,
    next_session: AtomicU64,
    config: SessionConfig,
    log_prefix: LogPrefix,
}

/// One session's view of a `SharedMailbox`.
///
/// Dropping this deselects the mailbox.
pub struct SelectedMailbox {
    shared: Arc<SharedMailbox>,
    analyser: Arc<EventAnalyser>,
    log_prefix: LogPrefix,
}

/// The unsolicited responses a session must send after a command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollResponse {
    /// Messages expunged by other sessions, in the order the `EXPUNGE`
    /// responses must be sent. These go out before anything else.
    pub expunge: Vec<Seqnum>,
    /// If messages were added, the new value to report via `EXISTS`.
    pub exists: Option<usize>,
    /// Messages which need an unsolicited `FETCH` response for their flags,
    /// sorted by sequence number.
    pub fetch: Vec<(Seqnum, Uid)>,
}

impl SharedMailbox {
    /// Set up the shared state for a mailbox containing `initial_uids`.
    pub fn open(
        name: &str,
        initial_uids: impl IntoIterator<Item = Uid>,
        config: &SessionConfig,
    ) -> Arc<Self> {
        let index = MessageIndex::new(initial_uids);
        let log_prefix = LogPrefix::new(name.to_owned());
        info!(
            "{} Opened with {} messages, max UID {:?}",
            log_prefix,
            index.highest_msn(),
            index.highest_uid()
        );

        Arc::new(SharedMailbox {
            index,
            subscribers: Mutex::new(Vec::new()),
            next_session: AtomicU64::new(1),
            config: config.clone(),
            log_prefix,
        })
    }

    /// Start a new session on this mailbox.
    pub fn select(self: &Arc<Self>) -> SelectedMailbox {
        let session =
            SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let analyser = Arc::new(EventAnalyser::new(session));
        analyser.set_silent_flag_changes(self.config.silent_flag_changes);

        let log_prefix = self.log_prefix.deep_clone();
        log_prefix.set_session(session);

        self.subscribers
            .lock()
            .unwrap()
            .push(Arc::downgrade(&analyser));
        info!(
            "{} Selected, {} messages",
            log_prefix,
            self.index.highest_msn()
        );

        SelectedMailbox {
            shared: Arc::clone(self),
            analyser,
            log_prefix,
        }
    }

    /// The UID/sequence number mapping of this mailbox.
    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    /// Return the number of sessions currently subscribed.
    pub fn num_sessions(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.strong_count() > 0);
        subscribers.len()
    }

    /// Apply a change and deliver it to every session.
    ///
    /// Additions go through the index's event hook; expunges go through a
    /// direct `expunge()`, whose result (the sequence number the message
    /// had) is returned and queued for every other session. Flag changes
    /// fail with `Error::NotTracked` if the message does not exist. If the
    /// change is rejected, the error is returned and no session hears about
    /// it.
    pub fn commit(
        &self,
        event: MailboxEvent,
    ) -> Result<Option<Seqnum>, Error> {
        let mut subscribers = self.subscribers.lock().unwrap();

        let applied = match event.kind {
            EventKind::Expunged(uid) => self.index.expunge(uid).map(Some),
            EventKind::FlagsUpdated { uid, .. }
                if !self.index.contains(uid) =>
            {
                Err(Error::NotTracked(uid))
            }
            EventKind::Added(_)
            | EventKind::FlagsUpdated { .. }
            | EventKind::Other => self.index.event(&event).map(|()| None),
        };

        let seqnum = match applied {
            Ok(seqnum) => seqnum,
            Err(e) => {
                warn!("{} Rejected {:?}: {}", self.log_prefix, event, e);
                return Err(e);
            }
        };

        debug!("{} Committed {:?}", self.log_prefix, event);
        fan_out(&mut subscribers, &event, seqnum);
        Ok(seqnum)
    }

    /// Expunge several messages at once.
    ///
    /// Sessions receive one `Expunged` event per message. See
    /// `MessageIndex::expunge_all()` for the meaning of the return value.
    pub fn commit_expunge_all(
        &self,
        uids: &[Uid],
        source: Option<SessionId>,
    ) -> Result<Vec<(Seqnum, Uid)>, Error> {
        let mut subscribers = self.subscribers.lock().unwrap();

        let expunged = self.index.expunge_all(uids).map_err(|e| {
            warn!("{} Rejected bulk expunge: {}", self.log_prefix, e);
            e
        })?;

        debug!("{} Expunged {} messages", self.log_prefix, expunged.len());
        // Highest first, so that each pre-batch sequence number is still
        // correct when the session reports it
        for &(seqnum, uid) in expunged.iter().rev() {
            fan_out(
                &mut subscribers,
                &MailboxEvent::expunged(uid, source),
                Some(seqnum),
            );
        }

        Ok(expunged)
    }
}

/// Deliver `event` to every live subscriber, forgetting the dead ones.
///
/// `expunged` is the sequence number an expunged message had.
fn fan_out(
    subscribers: &mut Vec<Weak<EventAnalyser>>,
    event: &MailboxEvent,
    expunged: Option<Seqnum>,
) {
    subscribers.retain(|subscriber| match subscriber.upgrade() {
        Some(analyser) => {
            analyser.event(event);
            if let Some(seqnum) = expunged {
                analyser.expunged(seqnum, event.source);
            }
            true
        }
        None => false,
    });
}

impl SelectedMailbox {
    pub fn session(&self) -> SessionId {
        self.analyser.session()
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// Commit the arrival of a new message, e.g. via `APPEND`.
    pub fn append(&self, uid: Uid) -> Result<(), Error> {
        self.shared
            .commit(MailboxEvent::added(uid, Some(self.session())))
            .map(|_| ())
    }

    /// Commit a change to the flags in `delta` on `uid`, e.g. via `STORE`.
    ///
    /// Fails with `Error::NotTracked` if the message does not exist.
    pub fn store_flags(
        &self,
        uid: Uid,
        delta: SystemFlags,
    ) -> Result<(), Error> {
        self.shared
            .commit(MailboxEvent::flags_updated(
                uid,
                delta,
                Some(self.session()),
            ))
            .map(|_| ())
    }

    /// Commit the removal of the given messages, e.g. via `EXPUNGE`.
    ///
    /// Returns the sequence numbers to report, in the order the `EXPUNGE`
    /// responses must be sent (descending).
    pub fn expunge(&self, uids: &[Uid]) -> Result<Vec<(Seqnum, Uid)>, Error> {
        let mut expunged = self
            .shared
            .commit_expunge_all(uids, Some(self.session()))?;
        expunged.reverse();
        info!("{} Expunged {} messages", self.log_prefix, expunged.len());
        Ok(expunged)
    }

    /// Collect everything that must be reported to the client, and reset the
    /// tracking state.
    ///
    /// Expunges made by other sessions come first, then the new message
    /// count, then flag changes resolved against the current sequence
    /// numbers. Flag changes on messages that have since been expunged are
    /// dropped, since the client is going to be told about the expunge
    /// instead.
    pub fn poll(&self) -> PollResponse {
        let drain = self.analyser.drain();
        let index = &self.shared.index;

        let fetch = drain
            .flag_update_uids
            .into_iter()
            .filter_map(|uid| match index.get_msn(uid) {
                Some(seqnum) => Some((seqnum, uid)),
                None => {
                    debug!(
                        "{} Dropping flag update for vanished {:?}",
                        self.log_prefix, uid
                    );
                    None
                }
            })
            .collect();

        PollResponse {
            expunge: drain.expunged,
            exists: if drain.size_changed {
                Some(index.highest_msn())
            } else {
                None
            },
            fetch,
        }
    }

    /// Control whether this session hears about its own flag changes.
    pub fn set_silent_flag_changes(&self, silent: bool) {
        self.analyser.set_silent_flag_changes(silent);
    }

    pub fn seqnum_to_uid(&self, query: MsnQuery) -> Option<Uid> {
        self.shared.index.get_uid(query)
    }

    pub fn uid_to_seqnum(&self, uid: Uid) -> Option<Seqnum> {
        self.shared.index.get_msn(uid)
    }

    pub fn num_messages(&self) -> usize {
        self.shared.index.highest_msn()
    }
}

impl Drop for SelectedMailbox {
    fn drop(&mut self) {
        let this = Arc::downgrade(&self.analyser);
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.retain(|s| !Weak::ptr_eq(s, &this));
        }
        info!("{} Deselected", self.log_prefix);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn open(uids: &[u64]) -> Arc<SharedMailbox> {
        crate::init_test_log();
        SharedMailbox::open(
            "INBOX",
            uids.iter().copied().map(Uid::u),
            &SessionConfig::default(),
        )
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let mailbox = open(&[]);
        let a = mailbox.select();
        let b = mailbox.select();
        assert_ne!(a.session(), b.session());
        assert_eq!(2, mailbox.num_sessions());

        drop(a);
        assert_eq!(1, mailbox.num_sessions());
        drop(b);
        assert_eq!(0, mailbox.num_sessions());
    }

    #[test]
    fn append_reported_to_everyone() {
        let mailbox = open(&[1, 2]);
        let a = mailbox.select();
        let b = mailbox.select();

        a.append(Uid::u(3)).unwrap();
        let expected = PollResponse {
            expunge: vec![],
            exists: Some(3),
            fetch: vec![],
        };
        assert_eq!(expected, a.poll());
        assert_eq!(expected, b.poll());
        assert_eq!(PollResponse::default(), b.poll());

        assert_eq!(Some(Seqnum::u(3)), b.uid_to_seqnum(Uid::u(3)));
        assert_eq!(
            Some(Uid::u(3)),
            b.seqnum_to_uid(MsnQuery::WildcardLargest)
        );
    }

    #[test]
    fn silent_store_not_echoed() {
        let mailbox = open(&[10, 20, 30]);
        let a = mailbox.select();
        let b = mailbox.select();
        a.set_silent_flag_changes(true);

        a.store_flags(Uid::u(20), SystemFlags::SEEN).unwrap();
        assert_eq!(PollResponse::default(), a.poll());
        assert_eq!(
            PollResponse {
                expunge: vec![],
                exists: None,
                fetch: vec![(Seqnum::u(2), Uid::u(20))],
            },
            b.poll()
        );

        a.set_silent_flag_changes(false);
        a.store_flags(Uid::u(30), SystemFlags::ANSWERED).unwrap();
        assert_eq!(vec![(Seqnum::u(3), Uid::u(30))], a.poll().fetch);
    }

    #[test]
    fn silent_default_from_config() {
        crate::init_test_log();
        let mailbox = SharedMailbox::open(
            "INBOX",
            vec![Uid::u(1)],
            &SessionConfig {
                silent_flag_changes: true,
            },
        );
        let a = mailbox.select();
        a.store_flags(Uid::u(1), SystemFlags::FLAGGED).unwrap();
        assert!(a.poll().fetch.is_empty());
    }

    #[test]
    fn recent_only_store_not_reported() {
        let mailbox = open(&[1]);
        let a = mailbox.select();
        let b = mailbox.select();
        a.store_flags(Uid::u(1), SystemFlags::RECENT).unwrap();
        assert_eq!(PollResponse::default(), b.poll());
    }

    #[test]
    fn store_on_missing_message_rejected() {
        let mailbox = open(&[1]);
        let a = mailbox.select();
        assert_matches!(
            Err(Error::NotTracked(_)),
            a.store_flags(Uid::u(2), SystemFlags::SEEN)
        );
    }

    #[test]
    fn expunge_renumbers_for_everyone() {
        let mailbox = open(&[1, 2, 3, 4, 5]);
        let a = mailbox.select();
        let b = mailbox.select();

        b.store_flags(Uid::u(5), SystemFlags::DELETED).unwrap();
        b.store_flags(Uid::u(2), SystemFlags::DELETED).unwrap();
        assert_eq!(
            vec![(Seqnum::u(5), Uid::u(5)), (Seqnum::u(2), Uid::u(2))],
            a.expunge(&[Uid::u(2), Uid::u(5)]).unwrap()
        );

        assert_eq!(3, b.num_messages());
        assert_eq!(Some(Seqnum::u(2)), b.uid_to_seqnum(Uid::u(3)));
        assert_eq!(None, b.uid_to_seqnum(Uid::u(5)));
        // B hears about both expunges, highest first. The flag changes were
        // to messages that no longer exist.
        assert_eq!(
            PollResponse {
                expunge: vec![Seqnum::u(5), Seqnum::u(2)],
                exists: None,
                fetch: vec![],
            },
            b.poll()
        );
        assert_eq!(PollResponse::default(), b.poll());
        // A already reported its expunges with the command
        assert_eq!(PollResponse::default(), a.poll());
        mailbox.index().check_valid().unwrap();
    }

    #[test]
    fn expunge_reported_before_exists() {
        let mailbox = open(&[10, 20, 30]);
        let a = mailbox.select();
        let b = mailbox.select();

        a.expunge(&[Uid::u(20)]).unwrap();
        a.append(Uid::u(40)).unwrap();
        b.store_flags(Uid::u(30), SystemFlags::SEEN).unwrap();

        assert_eq!(
            Some(Uid::u(30)),
            b.seqnum_to_uid(MsnQuery::from(Seqnum::u(2)))
        );
        assert_eq!(
            PollResponse {
                expunge: vec![Seqnum::u(2)],
                exists: Some(3),
                fetch: vec![(Seqnum::u(2), Uid::u(30))],
            },
            b.poll()
        );
        assert_eq!(
            PollResponse {
                expunge: vec![],
                exists: Some(3),
                fetch: vec![(Seqnum::u(2), Uid::u(30))],
            },
            a.poll()
        );
    }

    #[test]
    fn sourceless_expunges_reach_every_session() {
        let mailbox = open(&[7, 8, 9]);
        let a = mailbox.select();
        let b = mailbox.select();

        mailbox
            .commit(MailboxEvent::expunged(Uid::u(9), None))
            .unwrap();
        mailbox
            .commit(MailboxEvent::expunged(Uid::u(7), None))
            .unwrap();
        mailbox.commit_expunge_all(&[Uid::u(8)], None).unwrap();

        for session in &[a, b] {
            assert_eq!(
                vec![Seqnum::u(3), Seqnum::u(1), Seqnum::u(1)],
                session.poll().expunge
            );
        }
        assert_eq!(0, mailbox.index().highest_msn());
    }

    #[test]
    fn flag_change_on_vanished_message_not_fanned_out() {
        let mailbox = open(&[1, 2]);
        let a = mailbox.select();
        mailbox
            .commit(MailboxEvent::expunged(Uid::u(2), None))
            .unwrap();

        assert_matches!(
            Err(Error::NotTracked(_)),
            mailbox.commit(MailboxEvent::flags_updated(
                Uid::u(2),
                SystemFlags::SEEN,
                None,
            ))
        );
        assert_eq!(0, a.analyser.flag_update_uids().count());
        let poll = a.poll();
        assert_eq!(vec![Seqnum::u(2)], poll.expunge);
        assert!(poll.fetch.is_empty());
    }

    #[test]
    fn rejected_commit_not_fanned_out() {
        let mailbox = open(&[5]);
        let a = mailbox.select();

        assert_matches!(
            Err(Error::OutOfOrderUid { .. }),
            mailbox.commit(MailboxEvent::added(Uid::u(4), None))
        );
        assert_matches!(
            Err(Error::NotTracked(_)),
            mailbox.commit(MailboxEvent::expunged(Uid::u(4), None))
        );
        assert_matches!(Err(Error::NotTracked(_)), a.expunge(&[Uid::u(4)]));
        assert_eq!(PollResponse::default(), a.poll());
        assert_eq!(1, a.num_messages());
    }

    #[test]
    fn commit_returns_old_seqnum() {
        let mailbox = open(&[7, 8, 9]);
        assert_eq!(
            Some(Seqnum::u(2)),
            mailbox
                .commit(MailboxEvent::expunged(Uid::u(8), None))
                .unwrap()
        );
        assert_eq!(
            None,
            mailbox.commit(MailboxEvent::added(Uid::u(10), None)).unwrap()
        );
        assert_eq!(
            None,
            mailbox
                .commit(MailboxEvent {
                    source: None,
                    kind: EventKind::Other,
                })
                .unwrap()
        );
        assert_eq!(
            vec![Uid::u(7), Uid::u(9), Uid::u(10)],
            mailbox.index().uids()
        );
    }

    #[test]
    fn concurrent_commits_and_polls() {
        let initial = (1..=100).collect::<Vec<u64>>();
        let mailbox = open(&initial);
        let sessions = (0..4).map(|_| mailbox.select()).collect::<Vec<_>>();
        let deliverer = mailbox.select();

        crossbeam::scope(|s| {
            for session in &sessions {
                s.spawn(move |_| {
                    for uid in 1..=100 {
                        session
                            .store_flags(Uid::u(uid), SystemFlags::SEEN)
                            .unwrap();
                        // Poll occasionally to race drains with deliveries
                        if 5 == uid % 10 {
                            session.poll();
                        }
                    }
                });
            }

            let deliverer = &deliverer;
            s.spawn(move |_| {
                for uid in 101..=200 {
                    deliverer.append(Uid::u(uid)).unwrap();
                }
            });
        })
        .unwrap();

        assert_eq!(200, mailbox.index().highest_msn());
        mailbox.index().check_valid().unwrap();

        // Each session stored flags on the last few UIDs after its last
        // poll, so at least those are still pending.
        for session in &sessions {
            let poll = session.poll();
            for uid in 96..=100u32 {
                let pair = (Seqnum::u(uid), Uid::u(u64::from(uid)));
                assert!(poll.fetch.contains(&pair));
            }
        }
    }
}
