//! Listing order for directory pages.
//!
//! Names compare case-insensitively with runs of digits compared by
//! numeric value, so `file2` sorts before `file10`. Exact ties fall back
//! to byte order so the result is total and stable across calls.

use crate::item::Item;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Order in which a directory page is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortKey {
    /// Natural name order.
    #[default]
    ByName,
    /// Creation time, then natural name order.
    ByCreationDate,
}

/// Compares two names in natural order.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                let ord = compare_digit_runs(&l_run, &r_run);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                let ord = Iterator::cmp(l.to_lowercase(), r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }

    a.cmp(b)
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compares two rows under the given sort key.
#[must_use]
pub fn compare_items(a: &Item, b: &Item, key: SortKey) -> Ordering {
    let by_name = || natural_cmp(&a.name, &b.name).then_with(|| a.id.cmp(&b.id));
    match key {
        SortKey::ByName => by_name(),
        SortKey::ByCreationDate => a.created_at.cmp(&b.created_at).then_with(by_name),
    }
}

/// Sorts rows in place.
pub fn sort_items(items: &mut [Item], key: SortKey) {
    items.sort_by(|a, b| compare_items(a, b, key));
}
