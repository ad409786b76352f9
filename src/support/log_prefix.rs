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


use std::fmt;
use std::sync::{Arc, Mutex};

use crate::account::model::SessionId;

/// Tracks text that should be included in at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    mailbox: String,
    session: Option<SessionId>,
    user: Option<String>,
}

impl LogPrefix {
    pub fn new(mailbox: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                mailbox: sanitise(mailbox),
                session: None,
                user: None,
            })),
        }
    }

    /// Make an independent copy, e.g. to give a new session a prefix derived
    /// from its mailbox.
    pub fn deep_clone(&self) -> Self {
        let inner = self.inner.lock().unwrap();
        Self {
            inner: Arc::new(Mutex::new(Inner::clone(&inner))),
        }
    }

    pub fn set_session(&self, session: SessionId) {
        self.inner.lock().unwrap().session = Some(session);
    }

    pub fn set_user(&self, user: String) {
        self.inner.lock().unwrap().user = Some(sanitise(user));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.mailbox)?;
        match (inner.session, inner.user.as_deref()) {
            (None, None) => Ok(()),
            (Some(session), None) => write!(f, "[{}]", session),
            (None, Some(user)) => write!(f, "[{}]", user),
            (Some(session), Some(user)) => {
                write!(f, "[{} {}]", session, user)
            }
        }
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}
