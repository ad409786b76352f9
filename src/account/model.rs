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


//! Identifier types shared by the index, the analyser, and the session glue.

use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs increase monotonically as messages are added to the mailbox and are
/// never reused while UIDVALIDITY stays the same. Nothing here cares about
/// their value beyond ordering.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU64);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    pub fn of(uid: u64) -> Option<Self> {
        NonZeroU64::new(uid).map(Uid)
    }

    #[cfg(test)]
    pub fn u(uid: u64) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u64> for Uid {
    type Error = ();

    fn try_from(v: u64) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> u64 {
        uid.0.get()
    }
}

/// A message sequence number.
///
/// The sequence number of a message is one plus the number of live messages
/// with a UID less than it. Every expunge shifts the sequence numbers of all
/// later messages down by one, so these are only meaningful against a
/// specific point-in-time view of the mailbox.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    pub fn to_index(self) -> usize {
        let u: Result<usize, _> = self.0.get().try_into();
        u.unwrap() - 1
    }

    /// Return the sequence number for the given zero-based index.
    ///
    /// Panics if `ix` does not fit in a sequence number. Mailboxes never get
    /// anywhere close to that size.
    pub fn from_index(ix: usize) -> Self {
        Seqnum::of((ix + 1).try_into().unwrap()).unwrap()
    }
}

impl TryFrom<u32> for Seqnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

impl fmt::Display for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// A request to translate a sequence number into a UID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsnQuery {
    /// A specific sequence number.
    Exact(Seqnum),
    /// The `*` of a sequence set, i.e., the last message in the mailbox.
    WildcardLargest,
}

impl MsnQuery {
    /// Interpret a raw sequence number as produced by a parser that encodes
    /// `*` as -1.
    ///
    /// Returns `None` for zero and other negative values; no message can
    /// ever have those.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if -1 == raw {
            Some(MsnQuery::WildcardLargest)
        } else {
            u32::try_from(raw)
                .ok()
                .and_then(Seqnum::of)
                .map(MsnQuery::Exact)
        }
    }
}

impl From<Seqnum> for MsnQuery {
    fn from(seqnum: Seqnum) -> Self {
        MsnQuery::Exact(seqnum)
    }
}

/// Identifies one client session which has a mailbox selected.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// The IMAP system flags.
    ///
    /// `\Recent` is included here since the mailbox layer reports changes to
    /// it, but it is a property of a session's view rather than real message
    /// state and is never echoed to clients as a flag change.
    pub struct SystemFlags: u32 {
        const ANSWERED = 1 << 0;
        const DELETED = 1 << 1;
        const DRAFT = 1 << 2;
        const FLAGGED = 1 << 3;
        const SEEN = 1 << 4;
        const RECENT = 1 << 5;
    }
}

const FLAG_NAMES: &[(SystemFlags, &str)] = &[
    (SystemFlags::ANSWERED, "\\Answered"),
    (SystemFlags::DELETED, "\\Deleted"),
    (SystemFlags::DRAFT, "\\Draft"),
    (SystemFlags::FLAGGED, "\\Flagged"),
    (SystemFlags::SEEN, "\\Seen"),
    (SystemFlags::RECENT, "\\Recent"),
];

impl SystemFlags {
    /// Return whether this set, seen as a change, is something a client
    /// needs to be told about.
    ///
    /// That is the case when at least one flag other than `\Recent` is
    /// present.
    pub fn is_client_visible(self) -> bool {
        !(self - SystemFlags::RECENT).is_empty()
    }
}

impl fmt::Display for SystemFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for &(flag, name) in FLAG_NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

impl FromStr for SystemFlags {
    type Err = Error;

    /// Parse a single system flag by its wire name, accepting non-standard
    /// casing.
    fn from_str(s: &str) -> Result<Self, Error> {
        FLAG_NAMES
            .iter()
            .find(|&&(_, name)| s.eq_ignore_ascii_case(name))
            .map(|&(flag, _)| flag)
            .ok_or_else(|| Error::BadFlag(s.to_owned()))
    }
}
