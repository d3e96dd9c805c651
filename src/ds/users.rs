//! Minimal user database (spec §1 Non-goals excludes on-disk format from
//! the contractual surface; this exists purely so `LOGIN` is exercisable
//! end to end). Format is `username:hash` lines, hashed with `sha2`
//! following the same hashing crate the pack's `xeno-auth` uses.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::Result;

fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct UserDb {
    path: PathBuf,
    users: Mutex<HashMap<String, String>>,
}

impl UserDb {
    pub fn new(path: PathBuf) -> Self {
        Self { path, users: Mutex::new(HashMap::new()) }
    }

    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let mut guard = self.users.lock().unwrap();
        for line in contents.lines() {
            if let Some((user, hash)) = line.split_once(':') {
                guard.insert(user.to_string(), hash.to_string());
            }
        }
        Ok(())
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users.lock().unwrap().get(username).is_some_and(|stored| *stored == hash_password(password))
    }

    pub fn ensure_user(&self, username: &str, password: &str) -> Result<()> {
        {
            let mut guard = self.users.lock().unwrap();
            guard.entry(username.to_string()).or_insert_with(|| hash_password(password));
        }
        self.persist()
    }

    pub fn list_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let guard = self.users.lock().unwrap();
        let mut out = std::fs::File::create(&self.path)?;
        for (user, hash) in guard.iter() {
            writeln!(out, "{user}:{hash}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_user_then_verify_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");
        let db = UserDb::new(path.clone());
        db.ensure_user("alice", "hunter2").unwrap();
        assert!(db.verify("alice", "hunter2"));
        assert!(!db.verify("alice", "wrong"));

        let reloaded = UserDb::new(path);
        reloaded.load().unwrap();
        assert!(reloaded.verify("alice", "hunter2"));
    }
}
