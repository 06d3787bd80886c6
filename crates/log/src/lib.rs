//! A simple logging facade for the needs of the Cobble renderer.

use std::fmt::Arguments;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A verbosity level for a [`Message`].
///
/// # Remarks
///
/// The ordering of the levels is in *increasing verbosity*: [`Error`] is the
/// *least verbose* and [`Trace`] is the *most verbose*. This is useful for
/// filtering messages based on their level.
///
/// [`Error`]: Level::Error
/// [`Trace`]: Level::Trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// A fatal error. Not necessarily a panic, but a situation that prevents
    /// at least part of the program from working correctly.
    Error,
    /// An error from which the program has recovered by itself, but which may
    /// indicate that something is wrong.
    Warning,
    /// Information that is useful most of the time, without indicating that
    /// something is wrong.
    Info,
    /// Information that is useful for debugging purposes only.
    Trace,
}

impl Level {
    fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Info,
            _ => Self::Trace,
        }
    }
}

/// The most verbose [`Level`] that is currently written out.
static MAX_LEVEL: AtomicUsize = AtomicUsize::new(Level::Trace as usize);

/// Changes the most verbose [`Level`] that is written out.
///
/// Messages more verbose than `level` are dropped by [`Message::log`].
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as usize, Ordering::Relaxed);
}

/// Returns the most verbose [`Level`] that is currently written out.
pub fn max_level() -> Level {
    Level::from_index(MAX_LEVEL.load(Ordering::Relaxed))
}

/// A message that can be logged.
pub struct Message<'a> {
    /// The name of the file in which the message was logged.
    pub file: &'static str,
    /// The line at which the message was logged.
    pub line: u32,
    /// The verbosity level of the message.
    pub level: Level,
    /// The module in which the message was logged.
    pub module: &'static str,
    /// The message itself.
    pub message: Arguments<'a>,
}

impl<'a> Message<'a> {
    /// Writes this message to the standard error stream, unless it is more
    /// verbose than the current [`max_level`].
    pub fn log(self) {
        if self.level > max_level() {
            return;
        }

        let prefix = match self.level {
            Level::Error => "\x1B[1;31mERROR\x1B[0m  ",
            Level::Warning => "\x1B[1;33mWARNING\x1B[0m",
            Level::Info => "\x1B[1;34mINFO\x1B[0m   ",
            Level::Trace => "\x1B[1;30mTRACE\x1B[0m  ",
        };

        let Message {
            file,
            line,
            message,
            ..
        } = self;

        let _ = writeln!(
            std::io::stderr().lock(),
            "{prefix}{message} \x1B[2;90m(at {file}:{line})\x1B[0m"
        );
    }
}

/// Creates a [`Message`] instance with the current invoking location.
#[macro_export]
macro_rules! message {
    ($level:expr, $($args:tt)*) => {
        $crate::Message {
            file: ::core::file!(),
            line: ::core::line!(),
            level: $level,
            module: ::core::module_path!(),
            message: ::core::format_args!($($args)*),
        }
    };
}

/// Logs a message with the current invoking location.
#[macro_export]
macro_rules! log {
    ($level:expr, $($args:tt)*) => {
        $crate::Message::log($crate::message!($level, $($args)*))
    };
}

/// Logs a message with a verbosity level of [`Level::Error`].
#[macro_export]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::log!($crate::Level::Error, $($args)*)
    };
}

/// Logs a message with a verbosity level of [`Level::Warning`].
#[macro_export]
macro_rules! warning {
    ($($args:tt)*) => {
        $crate::log!($crate::Level::Warning, $($args)*)
    };
}

/// Logs a message with a verbosity level of [`Level::Info`].
#[macro_export]
macro_rules! info {
    ($($args:tt)*) => {
        $crate::log!($crate::Level::Info, $($args)*)
    };
}

/// Logs a message with a verbosity level of [`Level::Trace`].
#[macro_export]
macro_rules! trace {
    ($($args:tt)*) => {
        $crate::log!($crate::Level::Trace, $($args)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_is_increasing_verbosity() {
        assert!(Level::Error < Level::Warning);
        assert!(Level::Warning < Level::Info);
        assert!(Level::Info < Level::Trace);
    }

    #[test]
    fn max_level_round_trips() {
        set_max_level(Level::Warning);
        assert_eq!(max_level(), Level::Warning);
        set_max_level(Level::Trace);
        assert_eq!(max_level(), Level::Trace);
    }
}
