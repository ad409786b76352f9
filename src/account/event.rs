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


use super::model::*;

/// One observable change to a mailbox, as reported by the storage layer.
///
/// Events must be delivered to every subscriber in the order they were
/// committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxEvent {
    /// The session which caused the change, if it came from a session at
    /// all (as opposed to e.g. mail delivery).
    pub source: Option<SessionId>,
    pub kind: EventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A new message now exists.
    Added(Uid),
    /// A message has been permanently removed.
    Expunged(Uid),
    /// The flags in `delta` changed on the message.
    FlagsUpdated { uid: Uid, delta: SystemFlags },
    /// Anything else, such as a mailbox rename. Nothing in the UID/sequence
    /// number bookkeeping reacts to these.
    Other,
}

impl MailboxEvent {
    pub fn added(uid: Uid, source: Option<SessionId>) -> Self {
        MailboxEvent {
            source,
            kind: EventKind::Added(uid),
        }
    }

    pub fn expunged(uid: Uid, source: Option<SessionId>) -> Self {
        MailboxEvent {
            source,
            kind: EventKind::Expunged(uid),
        }
    }

    pub fn flags_updated(
        uid: Uid,
        delta: SystemFlags,
        source: Option<SessionId>,
    ) -> Self {
        MailboxEvent {
            source,
            kind: EventKind::FlagsUpdated { uid, delta },
        }
    }

    /// The message this event concerns, if any.
    pub fn uid(&self) -> Option<Uid> {
        match self.kind {
            EventKind::Added(uid)
            | EventKind::Expunged(uid)
            | EventKind::FlagsUpdated { uid, .. } => Some(uid),
            EventKind::Other => None,
        }
    }
}
