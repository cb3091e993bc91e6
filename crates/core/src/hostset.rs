// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compact host-range expressions.
//!
//! Credentials carry their host set as a compact expression such as
//! `node[1-4,7],login0`. A bracket group expands numeric ranges with the
//! zero padding preserved (`n[01-03]` is `n01,n02,n03`). Member order is
//! the expansion order, which gives every host a stable index within the
//! set: the index used to look up this node's task count.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostSetError {
    #[error("empty host expression")]
    Empty,
    #[error("unbalanced brackets in `{0}`")]
    UnbalancedBrackets(String),
    #[error("bad range `{0}`")]
    BadRange(String),
    #[error("host set too large ({0} members)")]
    TooLarge(usize),
}

/// Upper bound on expansion, to keep a malformed credential from
/// allocating without limit.
const MAX_HOSTS: usize = 64 * 1024;

/// An ordered set of host names parsed from a range expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSet {
    hosts: Vec<String>,
}

impl HostSet {
    pub fn parse(expr: &str) -> Result<Self, HostSetError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(HostSetError::Empty);
        }

        let mut hosts = Vec::new();
        for item in split_outside_brackets(expr)? {
            expand_item(&item, &mut hosts)?;
            if hosts.len() > MAX_HOSTS {
                return Err(HostSetError::TooLarge(hosts.len()));
            }
        }
        if hosts.is_empty() {
            return Err(HostSetError::Empty);
        }
        Ok(Self { hosts })
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Stable index of `host` within the set, in expansion order.
    pub fn index_of(&self, host: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h == host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.hosts.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hosts.join(","))
    }
}

/// Split on commas that are not inside a bracket group.
fn split_outside_brackets(expr: &str) -> Result<Vec<String>, HostSetError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in expr.chars() {
        match c {
            '[' => {
                depth += 1;
                cur.push(c);
            }
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| HostSetError::UnbalancedBrackets(expr.to_string()))?;
                cur.push(c);
            }
            ',' if depth == 0 => {
                if !cur.is_empty() {
                    items.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if depth != 0 {
        return Err(HostSetError::UnbalancedBrackets(expr.to_string()));
    }
    if !cur.is_empty() {
        items.push(cur);
    }
    Ok(items)
}

/// Expand a single item, which is either a literal host name or
/// `prefix[spec]suffix` with a comma-separated range spec.
fn expand_item(item: &str, out: &mut Vec<String>) -> Result<(), HostSetError> {
    let Some(open) = item.find('[') else {
        out.push(item.to_string());
        return Ok(());
    };
    let close = item
        .rfind(']')
        .ok_or_else(|| HostSetError::UnbalancedBrackets(item.to_string()))?;
    if close < open {
        return Err(HostSetError::UnbalancedBrackets(item.to_string()));
    }
    let prefix = &item[..open];
    let spec = &item[open + 1..close];
    let suffix = &item[close + 1..];

    for part in spec.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let width = lo.len();
                let lo: u64 = lo
                    .parse()
                    .map_err(|_| HostSetError::BadRange(part.to_string()))?;
                let hi: u64 = hi
                    .parse()
                    .map_err(|_| HostSetError::BadRange(part.to_string()))?;
                if hi < lo || (hi - lo) as usize >= MAX_HOSTS {
                    return Err(HostSetError::BadRange(part.to_string()));
                }
                for n in lo..=hi {
                    out.push(format!("{prefix}{n:0width$}{suffix}"));
                }
            }
            None => {
                let width = part.len();
                let n: u64 = part
                    .parse()
                    .map_err(|_| HostSetError::BadRange(part.to_string()))?;
                out.push(format!("{prefix}{n:0width$}{suffix}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "hostset_tests.rs"]
mod tests;
