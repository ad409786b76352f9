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


//! Replays a scripted series of mailbox changes against the sequence number
//! bookkeeping and prints what each session would tell its client.
//!
//! A script looks like this:
//!
//! ```toml
//! mailbox = "INBOX"
//! initial_uids = [10, 20, 30]
//! sessions = ["alice", "bob"]
//!
//! [[step]]
//! op = "store"
//! session = "alice"
//! uid = 20
//! flags = ["\\Seen"]
//!
//! [[step]]
//! op = "poll"
//! session = "bob"
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::{error, info};
use serde::Deserialize;

use crate::account::event::MailboxEvent;
use crate::account::model::*;
use crate::account::shared_mailbox::{SelectedMailbox, SharedMailbox};
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default)]
    pub initial_uids: Vec<Uid>,
    /// The names of the sessions which select the mailbox at the start.
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

fn default_mailbox() -> String {
    "INBOX".to_owned()
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    /// The session appends a message.
    Append { session: String, uid: Uid },
    /// A message arrives from outside any session.
    Deliver { uid: Uid },
    /// The session changes the flags on a message.
    Store {
        session: String,
        uid: Uid,
        flags: Vec<String>,
    },
    /// The session turns silent flag changes on or off.
    Silent { session: String, enabled: bool },
    /// The session expunges messages.
    Expunge { session: String, uids: Vec<Uid> },
    /// The session finishes a command and reports pending changes.
    Poll { session: String },
    /// The session looks up the UID for a sequence number, -1 being `*`.
    Uid { session: String, msn: i64 },
    /// The session looks up the sequence number for a UID.
    Msn { session: String, uid: Uid },
    /// The session deselects the mailbox.
    Close { session: String },
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        Self::parse(&fs::read_to_string(path)?)
    }
}

/// Run `script`, writing each session's responses to `out`.
///
/// Failures of individual commands are reported as `NO` responses and do
/// not stop the replay. Malformed steps do.
pub fn run(
    script: &Script,
    config: &SystemConfig,
    out: &mut dyn Write,
) -> Result<(), Error> {
    let mailbox = SharedMailbox::open(
        &script.mailbox,
        script.initial_uids.iter().copied(),
        &config.session,
    );
    let mut sessions = HashMap::<String, SelectedMailbox>::new();
    for name in &script.sessions {
        open_session(&mailbox, &mut sessions, name)?;
    }

    for (ix, step) in script.steps.iter().enumerate() {
        info!("Step {}: {:?}", ix + 1, step);
        run_step(&mailbox, &mut sessions, step, out)?;
    }

    Ok(())
}

fn open_session(
    mailbox: &Arc<SharedMailbox>,
    sessions: &mut HashMap<String, SelectedMailbox>,
    name: &str,
) -> Result<(), Error> {
    if sessions.contains_key(name) {
        return Err(Error::BadScript(format!(
            "Session '{}' declared twice",
            name
        )));
    }

    let session = mailbox.select();
    session.log_prefix().set_user(name.to_owned());
    sessions.insert(name.to_owned(), session);
    Ok(())
}

fn run_step(
    mailbox: &Arc<SharedMailbox>,
    sessions: &mut HashMap<String, SelectedMailbox>,
    step: &Step,
    out: &mut dyn Write,
) -> Result<(), Error> {
    match *step {
        Step::Append { ref session, uid } => {
            let result = lookup(sessions, session)?.append(uid);
            report(out, session, result)?;
        }

        Step::Deliver { uid } => {
            report(
                out,
                "deliver",
                mailbox.commit(MailboxEvent::added(uid, None)).map(|_| ()),
            )?;
        }

        Step::Store {
            ref session,
            uid,
            ref flags,
        } => {
            let delta = flags.iter().try_fold(
                SystemFlags::empty(),
                |acc, flag| -> Result<SystemFlags, Error> {
                    Ok(acc | flag.parse::<SystemFlags>()?)
                },
            )?;
            let result = lookup(sessions, session)?.store_flags(uid, delta);
            report(out, session, result)?;
        }

        Step::Silent {
            ref session,
            enabled,
        } => {
            lookup(sessions, session)?.set_silent_flag_changes(enabled);
        }

        Step::Expunge {
            ref session,
            ref uids,
        } => match lookup(sessions, session)?.expunge(uids) {
            Ok(expunged) => {
                for (seqnum, _) in expunged {
                    writeln!(out, "{}> * {} EXPUNGE", session, seqnum)?;
                }
            }
            Err(e) => report(out, session, Err(e))?,
        },

        Step::Poll { ref session } => {
            let poll = lookup(sessions, session)?.poll();
            for seqnum in poll.expunge {
                writeln!(out, "{}> * {} EXPUNGE", session, seqnum)?;
            }
            if let Some(exists) = poll.exists {
                writeln!(out, "{}> * {} EXISTS", session, exists)?;
            }
            for (seqnum, uid) in poll.fetch {
                writeln!(out, "{}> * {} FETCH (UID {})", session, seqnum, uid)?;
            }
        }

        Step::Uid { ref session, msn } => {
            let session_mailbox = lookup(sessions, session)?;
            let shown = if -1 == msn {
                "*".to_owned()
            } else {
                msn.to_string()
            };
            match MsnQuery::from_raw(msn)
                .and_then(|query| session_mailbox.seqnum_to_uid(query))
            {
                Some(uid) => {
                    writeln!(out, "{}> MSN {} = UID {}", session, shown, uid)?
                }
                None => writeln!(out, "{}> MSN {} has no UID", session, shown)?,
            }
        }

        Step::Msn { ref session, uid } => {
            match lookup(sessions, session)?.uid_to_seqnum(uid) {
                Some(seqnum) => {
                    writeln!(out, "{}> UID {} = MSN {}", session, uid, seqnum)?
                }
                None => writeln!(out, "{}> UID {} has no MSN", session, uid)?,
            }
        }

        Step::Close { ref session } => {
            lookup(sessions, session)?;
            sessions.remove(session);
        }
    }

    Ok(())
}

fn lookup<'a>(
    sessions: &'a HashMap<String, SelectedMailbox>,
    name: &str,
) -> Result<&'a SelectedMailbox, Error> {
    sessions.get(name).ok_or_else(|| {
        Error::BadScript(format!("No open session named '{}'", name))
    })
}

/// Write a `NO` response for a failed command.
///
/// The failure only aborts that command, so it is not propagated.
fn report(
    out: &mut dyn Write,
    who: &str,
    result: Result<(), Error>,
) -> Result<(), Error> {
    if let Err(e) = result {
        error!("{}: command failed: {}", who, e);
        writeln!(out, "{}> NO {}", who, e)?;
    }

    Ok(())
}
