/*
Copyright (C) 2022 Aurora McGinnis

This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use log::{set_boxed_logger, set_max_level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

mod error;
use error::PushError;
// a single POST per record
mod push;
use push::Pusher;
mod fmt;
pub use fmt::{LokiFormatter, MessageFormatter};
#[cfg(feature = "logfmt")]
mod logfmt;
#[cfg(feature = "logfmt")]
pub use logfmt::{LogfmtAutoFields, LogfmtFormatter};

/// `LokiBuilder` is used to construct the `Loki` sink.
///
/// Nothing is validated here. A malformed endpoint only shows up as a diagnostic on stderr once a
/// record is sent.
#[must_use = "Has no affect unless .build() is called."]
pub struct LokiBuilder {
    endpoint: String,
    labels: HashMap<String, String>,
    headers: HashMap<String, String>,
    tenant: String,
    username: String,
    password: String,
    level_filter: LevelFilter,
    lock_policy: LockPolicy,
    formatter: Box<dyn LokiFormatter>,
}

impl LokiBuilder {
    /// Construct a new builder pushing to `endpoint`. If the endpoint has no path,
    /// `/loki/api/v1/push` is used.
    pub fn new(endpoint: impl Into<String>) -> LokiBuilder {
        LokiBuilder {
            endpoint: endpoint.into(),
            labels: HashMap::new(),
            headers: HashMap::new(),
            tenant: String::new(),
            username: String::new(),
            password: String::new(),
            level_filter: LevelFilter::Trace,
            lock_policy: LockPolicy::default(),
            #[cfg(feature = "logfmt")]
            formatter: Box::new(LogfmtFormatter::default()),
            #[cfg(not(feature = "logfmt"))]
            formatter: Box::new(MessageFormatter),
        }
    }

    /// Replace the stream labels sent with every record.
    pub fn labels(mut self, labels: HashMap<String, String>) -> LokiBuilder {
        self.labels = labels;
        self
    }

    /// Add a single stream label.
    pub fn add_label(mut self, name: &str, value: &str) -> LokiBuilder {
        self.labels.insert(String::from(name), String::from(value));
        self
    }

    /// Sent as `X-Scope-OrgID`. An empty tenant sends no header.
    pub fn tenant(mut self, tenant: &str) -> LokiBuilder {
        self.tenant = String::from(tenant);
        self
    }

    /// HTTP basic authentication. Only used if both the username and the password are non-empty.
    pub fn basic_auth(mut self, username: &str, password: &str) -> LokiBuilder {
        self.username = String::from(username);
        self.password = String::from(password);
        self
    }

    /// Specify a header to send in HTTP(s) requests to Loki.
    pub fn add_header(mut self, name: &str, value: &str) -> LokiBuilder {
        self.headers.insert(String::from(name), String::from(value));
        self
    }

    /// Sets the verbosity of this logger
    pub fn level(mut self, lf: LevelFilter) -> LokiBuilder {
        self.level_filter = lf;
        self
    }

    pub fn formatter(mut self, fmt: Box<dyn LokiFormatter>) -> LokiBuilder {
        self.formatter = fmt;
        self
    }

    /// Specifies how concurrent callers are coordinated. The default is `LockPolicy::Mutex`.
    pub fn lock_policy(mut self, policy: LockPolicy) -> LokiBuilder {
        self.lock_policy = policy;
        self
    }

    pub fn build(self) -> Loki {
        let scratch = match self.lock_policy {
            LockPolicy::Mutex => Scratch::Shared(Mutex::new(String::new())),
            LockPolicy::NoOp => Scratch::Local,
        };

        Loki {
            pusher: Pusher::new(
                self.endpoint,
                self.labels,
                self.headers,
                &self.tenant,
                &self.username,
                &self.password,
            ),
            level_filter: self.level_filter,
            fmt: self.formatter,
            scratch,
        }
    }
}

/// `LockPolicy` specifies how calls from several threads into the sink are coordinated.
#[derive(PartialEq, Debug, Clone, Copy, Eq, Default)]
pub enum LockPolicy {
    /// Sends and flushes are serialized by a mutex, and records are formatted into one buffer
    /// shared by all callers.
    #[default]
    Mutex,
    /// No lock is taken. Every send formats into its own buffer. Meant for single-threaded hosts.
    NoOp,
}

enum Scratch {
    Shared(Mutex<String>),
    Local,
}

/// Logger implementation that forwards every record to Loki as it is logged, in its own request,
/// on the calling thread. Create one using the `LokiBuilder`.
///
/// Delivery is best effort. A record that can't be delivered is dropped and a diagnostic is
/// printed to stderr; the caller never sees the failure.
pub struct Loki {
    pusher: Pusher,
    level_filter: LevelFilter,
    fmt: Box<dyn LokiFormatter>,
    scratch: Scratch,
}

impl Loki {
    /// Shorthand for `LokiBuilder` with labels, tenant and basic auth. Pass empty strings to leave
    /// the tenant or the credentials out.
    pub fn new(
        endpoint: &str,
        labels: HashMap<String, String>,
        tenant: &str,
        username: &str,
        password: &str,
    ) -> Loki {
        LokiBuilder::new(endpoint)
            .labels(labels)
            .tenant(tenant)
            .basic_auth(username, password)
            .build()
    }

    /// Installs the logger as the default logger for the entire program.
    /// Calling this (or any similar function from other libraries) more than once is a bug.
    pub fn apply(self) -> Result<(), SetLoggerError> {
        set_max_level(self.level_filter);
        set_boxed_logger(Box::from(self))
    }

    /// Send a record stamped with the current time. Unlike `Log::log`, this ignores the level
    /// filter.
    pub fn send_log(&self, record: &Record) {
        self.send_log_at(SystemTime::now(), record);
    }

    /// Send a record stamped with `time`.
    pub fn send_log_at(&self, time: SystemTime, record: &Record) {
        if let Err(e) = self.try_send_log_at(time, record) {
            e.report();
        }
    }

    fn try_send_log_at(&self, time: SystemTime, record: &Record) -> Result<(), PushError> {
        // panics from the formatter stop here
        catch_unwind(AssertUnwindSafe(|| self.emit(time, record)))
            .unwrap_or(Err(PushError::Unknown))
    }

    fn emit(&self, time: SystemTime, record: &Record) -> Result<(), PushError> {
        match &self.scratch {
            Scratch::Shared(mtx) => {
                let mut buf = mtx.lock().unwrap_or_else(PoisonError::into_inner);
                buf.clear();
                self.fmt.write_record(&mut buf, record)?;
                self.pusher.push(time, &buf)
            }
            Scratch::Local => {
                let mut buf = String::new();
                self.fmt.write_record(&mut buf, record)?;
                self.pusher.push(time, &buf)
            }
        }
    }
}

impl Log for Loki {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.send_log(record);
    }

    // Every record is sent as it arrives, so there is nothing to flush. Under the mutex policy
    // this still waits for an in-flight send.
    fn flush(&self) {
        if let Scratch::Shared(mtx) = &self.scratch {
            drop(mtx.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}
