// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::fmt::Write as _;

/// Physical names of the tables the cleanup statements operate on
///
/// Names may be schema-qualified (`auth.sessions`). They are always rendered
/// as quoted identifiers, so they are matched case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Table holding the session refresh tokens
    pub refresh_tokens: String,

    /// Table holding the sessions
    pub sessions: String,

    /// Table holding the relay states of external identity logins
    pub relay_states: String,

    /// Table holding the flow states of local multi-step logins
    pub flow_states: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            refresh_tokens: "refresh_tokens".to_owned(),
            sessions: "sessions".to_owned(),
            relay_states: "saml_relay_states".to_owned(),
            flow_states: "flow_state".to_owned(),
        }
    }
}

/// Render a possibly schema-qualified table name as a quoted SQL identifier
pub(crate) fn quote_identifier(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    for (i, part) in name.split('.').enumerate() {
        if i > 0 {
            quoted.push('.');
        }

        // Writing to a String never fails
        let _ = write!(quoted, "\"{}\"", part.replace('"', "\"\""));
    }
    quoted
}
