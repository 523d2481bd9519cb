/*
Copyright (C) 2022 Aurora McGinnis

This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use log::Record;
use std::fmt::Write;

/// `LokiFormatter` implementations render a log record into the line that gets pushed to Loki.
/// `dst` is handed over empty. If the `logfmt` feature is enabled, `LogfmtFormatter` is used by
/// default; otherwise `MessageFormatter` is.
///
/// Closures with the signature `Fn(&mut String, &Record) -> std::fmt::Result` are formatters too.
pub trait LokiFormatter: Send + Sync {
    fn write_record(&self, dst: &mut String, rec: &Record) -> std::fmt::Result;
}

/// Writes only the message of the record, without level or location.
#[derive(Default, Debug, Clone, Copy)]
pub struct MessageFormatter;

impl LokiFormatter for MessageFormatter {
    fn write_record(&self, dst: &mut String, rec: &Record) -> std::fmt::Result {
        write!(dst, "{}", rec.args())
    }
}

impl<F> LokiFormatter for F
where
    F: Fn(&mut String, &Record) -> std::fmt::Result + Send + Sync,
{
    fn write_record(&self, dst: &mut String, rec: &Record) -> std::fmt::Result {
        self(dst, rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn render(fmt: &dyn LokiFormatter, args: std::fmt::Arguments) -> String {
        let mut dst = String::new();
        fmt.write_record(
            &mut dst,
            &Record::builder().args(args).level(Level::Warn).build(),
        )
        .unwrap();
        dst
    }

    #[test]
    fn message_formatter_writes_args_only() {
        assert_eq!(
            render(&MessageFormatter, format_args!("disk {}% full", 93)),
            "disk 93% full"
        );
    }

    fn closure<F>(f: F) -> F
    where
        F: Fn(&mut String, &Record) -> std::fmt::Result + Send + Sync,
    {
        f
    }

    #[test]
    fn closures_are_formatters() {
        let fmt = closure(|dst, rec| write!(dst, "[{}] {}", rec.level(), rec.args()));
        assert_eq!(render(&fmt, format_args!("retrying")), "[WARN] retrying");
    }
}
