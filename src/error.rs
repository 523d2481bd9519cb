/*
Copyright (C) 2022 Aurora McGinnis

This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use thiserror::Error;

/// Everything that can go wrong while forwarding a single record. None of these ever leave the
/// sink; they end up as a diagnostic on stderr and the record is dropped.
#[derive(Debug, Error)]
pub(crate) enum PushError {
    #[error("Invalid Loki URL: {0}")]
    InvalidEndpoint(String),

    #[error("{0}")]
    Transport(String),

    #[error("Unexpected response status {code}")]
    Status { code: u16, body: String },

    #[error("Failed to serialize push request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to format record: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("Unknown error")]
    Unknown,
}

impl PushError {
    /// HTTP status of the response, or -1 if no response was received.
    pub(crate) fn status_code(&self) -> i32 {
        match self {
            PushError::Status { code, .. } => i32::from(*code),
            _ => -1,
        }
    }

    pub(crate) fn body(&self) -> Option<&str> {
        match self {
            PushError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub(crate) fn diagnostic(&self) -> String {
        let mut msg = format!(
            "(Loki) Failed to send log to Loki. Status code: {}, Error: {}",
            self.status_code(),
            self
        );
        if let Some(body) = self.body() {
            msg.push_str("\n(Loki) Loki response body: ");
            msg.push_str(body);
        }
        msg
    }

    pub(crate) fn report(&self) {
        eprintln!("{}", self.diagnostic());
    }
}
