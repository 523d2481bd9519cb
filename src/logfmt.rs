/*
Copyright (C) 2022 Aurora McGinnis

This Source Code Form is subject to the terms of the Mozilla Public
License, v. 2.0. If a copy of the MPL was not distributed with this
file, You can obtain one at http://mozilla.org/MPL/2.0/.
*/

use crate::LokiFormatter;
use bitflags::bitflags;
#[cfg(feature = "kv_unstable")]
use log::kv::{Error as KvError, Key, Value, Visitor};
use log::Record;
use std::collections::HashSet;
use std::fmt::Write;

// Characters dropped from keys
const INVALID_KEY_CHARS: &[char] = &[' ', '=', '"'];

/// `LogfmtFormatter` renders records as logfmt lines (`level=info message="disk full"`), which
/// Loki can parse out of the box with its `logfmt` stage. It is the default formatter of the sink
/// when the `logfmt` feature is enabled.
/// To learn more about logfmt, see: <https://www.brandur.org/logfmt>
#[derive(Default, Debug)]
pub struct LogfmtFormatter {
    include_fields: LogfmtAutoFields,
    escape_newlines: bool,
}

impl LogfmtFormatter {
    /// `include_fields` picks which parts of the record become fields. With `escape_newlines`,
    /// `\n`, `\r` and `\t` inside values are written as escape sequences instead of raw characters.
    pub fn new(include_fields: LogfmtAutoFields, escape_newlines: bool) -> Self {
        LogfmtFormatter {
            include_fields,
            escape_newlines,
        }
    }
}

impl LokiFormatter for LogfmtFormatter {
    fn write_record(&self, dst: &mut String, rec: &Record) -> std::fmt::Result {
        let mut line = LogfmtLine::new(dst, self.escape_newlines);
        let fields = self.include_fields;

        if fields.contains(LogfmtAutoFields::LEVEL) {
            line.field("level", &rec.level().as_str().to_lowercase())?;
        }

        if fields.contains(LogfmtAutoFields::MESSAGE) {
            let message = rec.args().to_string();
            if !message.is_empty() {
                line.field("message", &message)?;
            }
        }

        if fields.contains(LogfmtAutoFields::TARGET) && !rec.target().is_empty() {
            line.field("target", rec.target())?;
        }

        if fields.contains(LogfmtAutoFields::MODULE_PATH) {
            if let Some(module) = rec.module_path() {
                line.field("module", module)?;
            }
        }

        if fields.contains(LogfmtAutoFields::FILE) {
            if let Some(file) = rec.file() {
                line.field("file", file)?;
            }
        }

        if fields.contains(LogfmtAutoFields::LINE) {
            if let Some(n) = rec.line() {
                line.field("line", &n.to_string())?;
            }
        }

        #[cfg(feature = "kv_unstable")]
        if fields.contains(LogfmtAutoFields::EXTRA) {
            rec.key_values()
                .visit(&mut line)
                .map_err(|_| std::fmt::Error)?;
        }

        Ok(())
    }
}

// One logfmt line being written. Keys are written at most once; later duplicates are skipped.
struct LogfmtLine<'a> {
    dst: &'a mut String,
    seen: HashSet<String>,
    escape_newlines: bool,
}

impl<'a> LogfmtLine<'a> {
    fn new(dst: &'a mut String, escape_newlines: bool) -> Self {
        LogfmtLine {
            dst,
            seen: HashSet::with_capacity(8),
            escape_newlines,
        }
    }

    fn field(&mut self, key: &str, value: &str) -> std::fmt::Result {
        let key = normalize_key(key);
        if self.seen.contains(&key) {
            return Ok(());
        }

        if !self.seen.is_empty() {
            self.dst.push(' ');
        }
        self.dst.push_str(&key);
        self.dst.push('=');
        self.seen.insert(key);

        self.value(value)
    }

    fn value(&mut self, value: &str) -> std::fmt::Result {
        if !value.chars().any(needs_quotes) {
            self.dst.push_str(value);
            return Ok(());
        }

        self.dst.push('"');
        for c in value.chars() {
            match c {
                '\\' | '"' => {
                    self.dst.push('\\');
                    self.dst.push(c);
                }
                '\n' if self.escape_newlines => self.dst.push_str("\\n"),
                '\r' if self.escape_newlines => self.dst.push_str("\\r"),
                '\t' if self.escape_newlines => self.dst.push_str("\\t"),
                '\n' | '\r' | '\t' => self.dst.push(c),
                c if c.is_control() => write!(self.dst, "{}", c.escape_unicode())?,
                c => self.dst.push(c),
            }
        }
        self.dst.push('"');

        Ok(())
    }
}

#[cfg(feature = "kv_unstable")]
impl<'kvs> Visitor<'kvs> for LogfmtLine<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), KvError> {
        self.field(key.as_str(), &value.to_string())?;
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    let key: String = key
        .chars()
        .filter(|c| !INVALID_KEY_CHARS.contains(c))
        .collect();
    if key.is_empty() {
        "_".to_owned()
    } else {
        key
    }
}

fn needs_quotes(c: char) -> bool {
    matches!(c, ' ' | '=' | '"' | '\\') || c.is_control()
}

bitflags! {
    /// `LogfmtAutoFields` selects the parts of a `log::Record` that `LogfmtFormatter` writes out.
    /// The default set is LEVEL | MESSAGE | MODULE_PATH, plus EXTRA when `kv_unstable` is enabled.
    pub struct LogfmtAutoFields: u32 {
        /// `level`, lowercased.
        const LEVEL = 1;
        /// `message`, skipped when the message is empty.
        const MESSAGE = 1 << 1;
        /// `target`, skipped when empty.
        const TARGET = 1 << 2;
        /// `module`
        const MODULE_PATH = 1 << 3;
        /// `file`
        const FILE = 1 << 4;
        /// `line`
        const LINE = 1 << 5;
        /// Every key value pair attached through the structured logging API.
        #[cfg(feature = "kv_unstable")]
        const EXTRA = 1 << 6;
    }
}

impl Default for LogfmtAutoFields {
    fn default() -> Self {
        let fields =
            LogfmtAutoFields::LEVEL | LogfmtAutoFields::MESSAGE | LogfmtAutoFields::MODULE_PATH;
        #[cfg(feature = "kv_unstable")]
        let fields = fields | LogfmtAutoFields::EXTRA;
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn render(fmt: &LogfmtFormatter, level: Level, args: std::fmt::Arguments) -> String {
        let mut dst = String::new();
        fmt.write_record(
            &mut dst,
            &Record::builder()
                .args(args)
                .level(level)
                .target("billing")
                .module_path(Some("billing::invoice"))
                .file(Some("src/invoice.rs"))
                .line(Some(42))
                .build(),
        )
        .unwrap();
        dst
    }

    #[test]
    fn default_fields() {
        let out = render(&LogfmtFormatter::default(), Level::Info, format_args!("hello world"));
        assert_eq!(out, r#"level=info message="hello world" module=billing::invoice"#);
    }

    #[test]
    fn all_fields() {
        let fmt = LogfmtFormatter::new(
            LogfmtAutoFields::default()
                | LogfmtAutoFields::TARGET
                | LogfmtAutoFields::FILE
                | LogfmtAutoFields::LINE,
            false,
        );
        let out = render(&fmt, Level::Error, format_args!("paid"));
        assert_eq!(
            out,
            "level=error message=paid target=billing module=billing::invoice file=src/invoice.rs line=42"
        );
    }

    #[test]
    fn empty_message_is_skipped() {
        let fmt = LogfmtFormatter::new(LogfmtAutoFields::LEVEL | LogfmtAutoFields::MESSAGE, false);
        assert_eq!(render(&fmt, Level::Debug, format_args!("")), "level=debug");
    }

    #[test]
    fn values_are_quoted_and_escaped() {
        let fmt = LogfmtFormatter::new(LogfmtAutoFields::MESSAGE, false);
        assert_eq!(
            render(&fmt, Level::Info, format_args!(r#"say "hi" a=b c\d"#)),
            r#"message="say \"hi\" a=b c\\d""#
        );
        assert_eq!(
            render(&fmt, Level::Info, format_args!("bell\u{7}")),
            r#"message="bell\u{7}""#
        );
    }

    #[test]
    fn newlines_are_escaped_on_request() {
        let raw = LogfmtFormatter::new(LogfmtAutoFields::MESSAGE, false);
        assert_eq!(
            render(&raw, Level::Info, format_args!("a\nb")),
            "message=\"a\nb\""
        );

        let escaped = LogfmtFormatter::new(LogfmtAutoFields::MESSAGE, true);
        assert_eq!(
            render(&escaped, Level::Info, format_args!("a\nb\tc")),
            r#"message="a\nb\tc""#
        );
    }

    #[test]
    fn keys_are_normalized_and_deduplicated() {
        let mut dst = String::new();
        let mut line = LogfmtLine::new(&mut dst, false);
        line.field("user id", "7").unwrap();
        line.field("userid", "8").unwrap();
        line.field("= \"", "x").unwrap();
        assert_eq!(dst, "userid=7 _=x");
    }
}
