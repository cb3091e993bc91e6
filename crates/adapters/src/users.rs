// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System user database access.
//!
//! Behind a trait so the node-agent's group cache and the dispatcher's
//! identity checks are testable without real accounts.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserDbError {
    #[error("no such user: {0}")]
    NoSuchUser(String),
    #[error("no such uid: {0}")]
    NoSuchUid(u32),
    #[error("user name contains NUL")]
    BadName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

pub trait UserDb: Send + Sync + 'static {
    fn lookup_name(&self, name: &str) -> Result<UserRecord, UserDbError>;

    fn lookup_uid(&self, uid: u32) -> Result<UserRecord, UserDbError>;

    /// Supplementary groups for a user (including the primary gid).
    fn group_list(&self, name: &str, gid: u32) -> Result<Vec<u32>, UserDbError>;

    /// All users, for warming the group cache at startup.
    fn enumerate(&self) -> Vec<UserRecord>;
}

/// The real passwd database via libc.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUserDb;

impl SystemUserDb {
    pub fn new() -> Self {
        Self
    }
}

fn record_from_passwd(pw: &libc::passwd) -> Option<UserRecord> {
    if pw.pw_name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(pw.pw_name) }
        .to_string_lossy()
        .into_owned();
    Some(UserRecord {
        name,
        uid: pw.pw_uid,
        gid: pw.pw_gid,
    })
}

impl UserDb for SystemUserDb {
    fn lookup_name(&self, name: &str) -> Result<UserRecord, UserDbError> {
        let cname = CString::new(name).map_err(|_| UserDbError::BadName)?;
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0u8; 4096];
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 || result.is_null() {
            return Err(UserDbError::NoSuchUser(name.to_string()));
        }
        record_from_passwd(&pwd).ok_or_else(|| UserDbError::NoSuchUser(name.to_string()))
    }

    fn lookup_uid(&self, uid: u32) -> Result<UserRecord, UserDbError> {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0u8; 4096];
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 || result.is_null() {
            return Err(UserDbError::NoSuchUid(uid));
        }
        record_from_passwd(&pwd).ok_or(UserDbError::NoSuchUid(uid))
    }

    fn group_list(&self, name: &str, gid: u32) -> Result<Vec<u32>, UserDbError> {
        let cname = CString::new(name).map_err(|_| UserDbError::BadName)?;
        let mut ngroups: libc::c_int = 32;
        let mut groups = vec![0 as libc::gid_t; ngroups as usize];
        let rc = unsafe {
            libc::getgrouplist(cname.as_ptr(), gid, groups.as_mut_ptr(), &mut ngroups)
        };
        if rc < 0 {
            // Buffer too small; ngroups now holds the real count
            groups = vec![0 as libc::gid_t; ngroups as usize];
            let rc = unsafe {
                libc::getgrouplist(cname.as_ptr(), gid, groups.as_mut_ptr(), &mut ngroups)
            };
            if rc < 0 {
                return Err(UserDbError::NoSuchUser(name.to_string()));
            }
        }
        groups.truncate(ngroups.max(0) as usize);
        Ok(groups.into_iter().map(|g| g as u32).collect())
    }

    fn enumerate(&self) -> Vec<UserRecord> {
        let mut out = Vec::new();
        unsafe {
            libc::setpwent();
            loop {
                let pw = libc::getpwent();
                if pw.is_null() {
                    break;
                }
                if let Some(rec) = record_from_passwd(&*pw) {
                    out.push(rec);
                }
            }
            libc::endpwent();
        }
        out
    }
}

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Static user table for tests.
    #[derive(Default)]
    pub struct FakeUserDb {
        users: Mutex<Vec<UserRecord>>,
        groups: Mutex<HashMap<String, Vec<u32>>>,
    }

    impl FakeUserDb {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_user(self, name: &str, uid: u32, gid: u32, groups: &[u32]) -> Self {
            self.users.lock().push(UserRecord {
                name: name.to_string(),
                uid,
                gid,
            });
            self.groups.lock().insert(name.to_string(), groups.to_vec());
            self
        }
    }

    impl UserDb for FakeUserDb {
        fn lookup_name(&self, name: &str) -> Result<UserRecord, UserDbError> {
            self.users
                .lock()
                .iter()
                .find(|u| u.name == name)
                .cloned()
                .ok_or_else(|| UserDbError::NoSuchUser(name.to_string()))
        }

        fn lookup_uid(&self, uid: u32) -> Result<UserRecord, UserDbError> {
            self.users
                .lock()
                .iter()
                .find(|u| u.uid == uid)
                .cloned()
                .ok_or(UserDbError::NoSuchUid(uid))
        }

        fn group_list(&self, name: &str, gid: u32) -> Result<Vec<u32>, UserDbError> {
            Ok(self
                .groups
                .lock()
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![gid]))
        }

        fn enumerate(&self) -> Vec<UserRecord> {
            self.users.lock().clone()
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeUserDb;

#[cfg(test)]
#[path = "users_tests.rs"]
mod tests;
