// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded cooperative coroutine scheduler.
//!
//! Coroutines run on their own stacks and only give up control by yielding back to the root context, the code that
//! resumed them.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod runtime;

pub use self::runtime::{
    config::Config,
    fail::Fail,
    scheduler::{
        CoroutineId,
        CoroutineStatus,
        SharedScheduler,
        Yielder,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equivalent. Bails out of the enclosing function with an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equivalent. Bails out of the enclosing function with an [anyhow::Error]
/// otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}
