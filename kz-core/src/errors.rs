pub use std::backtrace::Backtrace;

pub use anyhow::{
    anyhow,
    bail,
    ensure,
};
pub use paste::paste;
pub use regex::{
    Regex,
    RegexBuilder,
};
pub use thiserror::Error;

pub type EmptyResult = anyhow::Result<()>;

const BUILD_DIR: &str = "/.build/";
const RUSTC_DIR: &str = "/rustc/";
const GLIBC: &str = "glibc";

// Generates a thiserror enum plus a snake-case constructor helper per
// variant that wraps the value straight into an anyhow::Error, so call
// sites can write `bail!(FooError::some_variant(x))` without naming the
// enum twice.  String-typed variants get an `impl Into<String>` constructor;
// everything else is taken by reference and cloned.
#[macro_export]
macro_rules! err_impl {
    (@ctor $errtype:ident, $item:ident, String) => {
        paste! {
            pub(crate) fn [<$item:snake>](in_: impl Into<String>) -> anyhow::Error {
                anyhow!{$errtype::$item(in_.into())}
            }
        }
    };

    (@ctor $errtype:ident, $item:ident, $($dtype:tt)::+) => {
        paste! {
            pub(crate) fn [<$item:snake>](in_: &$($dtype)::+) -> anyhow::Error {
                anyhow!{$errtype::$item(in_.clone())}
            }
        }
    };

    ($errtype:ident, $(#[$errinfo:meta] $item:ident($($dtype:tt)::+),)+) => {
        #[derive(Debug, Error)]
        pub(crate) enum $errtype {
            $(#[$errinfo] $item($($dtype)::+),)+
        }

        impl $errtype {
            $(err_impl! {@ctor $errtype, $item, $($dtype)::+})+
        }
    };
}

// Strip the tokio and libc noise out of a captured backtrace so that the
// error report in the logs is mostly frames we actually wrote.  Only called
// when the process is already giving up, so the cost doesn't matter.
pub fn prune_backtrace(bt: &str) -> String {
    let re = RegexBuilder::new(r"^\s+\d+(?s:.*?)(\s+at\s+.*:\d+)$")
        .multi_line(true)
        .build()
        .unwrap();

    let mut skipped = 0;
    let mut pruned = re.find_iter(bt).fold(String::new(), |mut acc, frame| {
        let frame = frame.as_str();
        if frame.contains(BUILD_DIR) || frame.contains(RUSTC_DIR) || frame.contains(GLIBC) {
            skipped += 1;
        } else if !frame.is_empty() {
            if skipped > 0 {
                acc += &format!("      -- <skipped {skipped} frames> --\n");
            }
            acc += &format!("{frame}\n");
            skipped = 0;
        }
        acc
    });

    if skipped > 0 {
        pruned += &format!("      -- <skipped {skipped} frames> --");
    }
    pruned
}

// Log an anyhow::Error with its full chain and a pruned stack trace; used at
// the top of the binaries right before exiting non-zero.
#[macro_export]
macro_rules! kzerr {
    ($err:ident, $msg:literal $(, $args:expr)*) => {
        let filtered_bt = $crate::errors::prune_backtrace(&$err.backtrace().to_string());
        error!(concat!($msg, "\n\n{}\n\nPartial Stack Trace:\n\n{}\n\n") $(, $args)*, $err, filtered_bt);
    };
}

pub use {
    err_impl,
    kzerr,
};
