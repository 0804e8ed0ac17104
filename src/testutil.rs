//! Assertion helpers for tests written against the mocks of this crate.
//!
//! Every assertion panics on failure, failing the surrounding test.
//! The helpers are `#[track_caller]`, so the panic location is the failing assertion.

use std::error::Error;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rand::RngCore;

/// Assert that `f` panics. `msg` is a description included in the failure message.
#[track_caller]
pub fn assert_panic(f: impl FnOnce(), msg: &str) {
    if catch_unwind(AssertUnwindSafe(f)).is_ok() {
        panic!(
            "expected panic{}, but function did not panic",
            format_msg(msg)
        );
    }
}

/// Assert that `actual` is the same error as `expected`, or has it in its source chain.
///
/// Errors are the same when their messages are equal, or when `expected` is a bare
/// [std::io::Error] made from an [std::io::ErrorKind] and `actual` is an `io::Error` of that kind.
#[track_caller]
pub fn assert_error(
    expected: Option<&(dyn Error + 'static)>,
    actual: Option<&(dyn Error + 'static)>,
) {
    match (expected, actual) {
        (None, None) => {}
        (None, Some(actual)) => panic!("expected no error, got {actual}"),
        (Some(expected), None) => panic!("expected error {expected}, got nil"),
        (Some(expected), Some(actual)) => {
            let mut current = Some(actual);
            while let Some(err) = current {
                if same_error(expected, err) {
                    return;
                }
                current = err.source();
            }
            panic!("expected error {expected}, got {actual}");
        }
    }
}

fn same_error(expected: &(dyn Error + 'static), actual: &(dyn Error + 'static)) -> bool {
    if expected.to_string() == actual.to_string() {
        return true;
    }

    match (
        expected.downcast_ref::<std::io::Error>(),
        actual.downcast_ref::<std::io::Error>(),
    ) {
        (Some(expected), Some(actual)) => {
            expected.get_ref().is_none() && expected.kind() == actual.kind()
        }
        _ => false,
    }
}

/// Assert that two byte slices are equal.
#[track_caller]
pub fn assert_bytes(expected: &[u8], actual: &[u8]) {
    if expected != actual {
        panic!("byte slices differ:\nexpected: {expected:?}\nactual:   {actual:?}");
    }
}

/// Assert that two values are equal.
///
/// With the `pretty-print` feature the failure shows a colored diff.
#[track_caller]
pub fn assert_equal<T: PartialEq + Debug + ?Sized>(expected: &T, actual: &T) {
    if expected != actual {
        values_differ(expected, actual);
    }
}

#[cfg(feature = "pretty-print")]
#[track_caller]
fn values_differ<T: PartialEq + Debug + ?Sized>(expected: &T, actual: &T) {
    pretty_assertions::assert_eq!(expected, actual, "values differ");
}

#[cfg(not(feature = "pretty-print"))]
#[track_caller]
fn values_differ<T: Debug + ?Sized>(expected: &T, actual: &T) {
    panic!("values differ:\nexpected: {expected:?}\nactual:   {actual:?}");
}

/// Assert that two values differ, printing the shared value otherwise.
#[track_caller]
pub fn assert_not_equal<T: PartialEq + Debug + ?Sized>(expected: &T, actual: &T) {
    if expected == actual {
        panic!("expected values to differ, but both are: {expected:?}");
    }
}

/// Assert that an optional value is absent.
#[track_caller]
pub fn assert_none<T: Debug>(value: &Option<T>) {
    if let Some(value) = value {
        panic!("expected nil, got {value:?}");
    }
}

/// Alias of [assert_none].
#[track_caller]
pub fn assert_nil<T: Debug>(value: &Option<T>) {
    assert_none(value)
}

/// Assert that an optional value is present.
#[track_caller]
pub fn assert_some<T>(value: &Option<T>) {
    if value.is_none() {
        panic!("expected non-nil value, got nil");
    }
}

/// Alias of [assert_some].
#[track_caller]
pub fn assert_not_nil<T>(value: &Option<T>) {
    assert_some(value)
}

/// Assert that a result is `Ok`.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Display>(result: &Result<T, E>) {
    if let Err(err) = result {
        panic!("expected no error, got {err}");
    }
}

/// `n` bytes from the thread-local random generator.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0; n];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Format an optional description for a failure message: empty, or `" (msg)"`.
pub fn format_msg(msg: &str) -> String {
    if msg.is_empty() {
        String::new()
    } else {
        format!(" ({msg})")
    }
}
