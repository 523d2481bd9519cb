/*
Copyright (C) 2022 Aurora McGinnis

This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use crate::error::PushError;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use serde_json::to_string;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use ureq::{Agent, AgentBuilder, Error};
use url::Url;

// Used when the configured endpoint has nothing after the host
pub const DEFAULT_PUSH_PATH: &str = "/loki/api/v1/push";

const TENANT_HEADER: &str = "X-Scope-OrgID";

// Pusher sends one record per request to Loki
pub struct Pusher {
    agent: Agent,
    endpoint: String,
    labels: HashMap<String, String>,
    headers: Vec<(String, String)>,
}

impl Pusher {
    pub fn new(
        endpoint: String,
        labels: HashMap<String, String>,
        extra_headers: HashMap<String, String>,
        tenant: &str,
        username: &str,
        password: &str,
    ) -> Pusher {
        let mut headers: Vec<(String, String)> = extra_headers.into_iter().collect();

        if !tenant.is_empty() {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(TENANT_HEADER));
            headers.push((TENANT_HEADER.to_owned(), tenant.to_owned()));
        }

        if !username.is_empty() && !password.is_empty() {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Authorization"));
            headers.push(("Authorization".to_owned(), basic_auth(username, password)));
        }

        Pusher {
            agent: AgentBuilder::new().redirects(0).build(),
            endpoint,
            labels,
            headers,
        }
    }

    // Serialize and POST a single formatted line. Only a 204 counts as delivered.
    pub fn push(&self, time: SystemTime, line: &str) -> Result<(), PushError> {
        let body = to_string(&LokiPush::single(&self.labels, time, line))?;
        let url = self.url()?;

        let mut request = self.agent.request_url("POST", &url);
        for (k, v) in &self.headers {
            request = request.set(k, v);
        }
        request = request.set("Content-Type", "application/json");

        match request.send_string(&body) {
            Ok(resp) if resp.status() == 204 => Ok(()),
            Ok(resp) => Err(PushError::Status {
                code: resp.status(),
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(Error::Status(code, resp)) => Err(PushError::Status {
                code,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(PushError::Transport(e.to_string())),
        }
    }

    fn url(&self) -> Result<Url, PushError> {
        let (base, path) = split_endpoint(&self.endpoint)?;
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| PushError::InvalidEndpoint(format!("{} ({})", self.endpoint, e)))
    }
}

/// Split `scheme://host[:port][/path]` into the base and the path, defaulting the path to the push
/// API. Only http and https are accepted, and `?` or `#` straight after the host is rejected.
pub fn split_endpoint(endpoint: &str) -> Result<(&str, &str), PushError> {
    let scheme_len = if endpoint.starts_with("https://") {
        "https://".len()
    } else if endpoint.starts_with("http://") {
        "http://".len()
    } else {
        return Err(PushError::InvalidEndpoint(endpoint.to_owned()));
    };

    let authority = &endpoint[scheme_len..];
    let host_len = authority
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(authority.len());
    // a query or fragment needs an explicit path in front of it
    if host_len == 0 || !matches!(authority[host_len..].chars().next(), None | Some('/')) {
        return Err(PushError::InvalidEndpoint(endpoint.to_owned()));
    }

    let (base, path) = endpoint.split_at(scheme_len + host_len);
    if path.is_empty() {
        Ok((base, DEFAULT_PUSH_PATH))
    } else {
        Ok((base, path))
    }
}

/// Nanoseconds since the Unix epoch as a decimal string. Instants before the epoch come out negative.
pub fn unix_nanos(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos().to_string(),
        Err(e) => format!("-{}", e.duration().as_nanos()),
    }
}

fn basic_auth(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

#[derive(Serialize)]
struct LokiPush<'a> {
    streams: [LokiStream<'a>; 1],
}

#[derive(Serialize)]
struct LokiStream<'a> {
    stream: &'a HashMap<String, String>,
    values: [(String, &'a str); 1],
}

impl<'a> LokiPush<'a> {
    fn single(labels: &'a HashMap<String, String>, time: SystemTime, line: &'a str) -> Self {
        LokiPush {
            streams: [LokiStream {
                stream: labels,
                values: [(unix_nanos(time), line)],
            }],
        }
    }
}
