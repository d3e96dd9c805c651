//! Access control (C4, spec §4.6): outer hash `username -> inner hash
//! filename -> permission string`. One file per user persisted as
//! `filename|perms` lines.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Result;

pub struct AccessControl {
    users: Mutex<HashMap<String, HashMap<String, String>>>,
    data_dir: PathBuf,
}

impl AccessControl {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { users: Mutex::new(HashMap::new()), data_dir }
    }

    fn user_file(&self, user: &str) -> PathBuf {
        self.data_dir.join(format!("{user}.access"))
    }

    pub fn add(&self, user: &str, filename: &str, perms: &str) -> Result<()> {
        {
            let mut guard = self.users.lock().unwrap();
            guard.entry(user.to_string()).or_default().insert(filename.to_string(), perms.to_string());
        }
        self.persist(user)
    }

    pub fn get(&self, user: &str, filename: &str) -> Option<String> {
        self.users.lock().unwrap().get(user).and_then(|files| files.get(filename)).cloned()
    }

    pub fn revoke(&self, user: &str, filename: &str) -> Result<()> {
        {
            let mut guard = self.users.lock().unwrap();
            if let Some(files) = guard.get_mut(user) {
                files.remove(filename);
            }
        }
        self.persist(user)
    }

    /// Revokes `filename` for every user holding a permission on it
    /// (spec §4.2 Delete step h).
    pub fn revoke_for_all(&self, filename: &str) -> Result<()> {
        let users_to_persist: Vec<String> = {
            let mut guard = self.users.lock().unwrap();
            let mut touched = Vec::new();
            for (user, files) in guard.iter_mut() {
                if files.remove(filename).is_some() {
                    touched.push(user.clone());
                }
            }
            touched
        };
        for user in users_to_persist {
            self.persist(&user)?;
        }
        Ok(())
    }

    fn persist(&self, user: &str) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let guard = self.users.lock().unwrap();
        let Some(files) = guard.get(user) else { return Ok(()) };
        let mut out = std::fs::File::create(self.user_file(user))?;
        for (filename, perms) in files {
            writeln!(out, "{filename}|{perms}")?;
        }
        Ok(())
    }

    pub fn load_user(&self, user: &str) -> Result<()> {
        let path = self.user_file(user);
        if !path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut files = HashMap::new();
        for line in contents.lines() {
            if let Some((filename, perms)) = line.split_once('|') {
                files.insert(filename.to_string(), perms.to_string());
            }
        }
        self.users.lock().unwrap().insert(user.to_string(), files);
        Ok(())
    }

    pub fn load_all(&self) -> Result<()> {
        if !self.data_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(user) = name.strip_suffix(".access") {
                self.load_user(user)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_revoke_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ac = AccessControl::new(dir.path().to_path_buf());
        ac.add("bob", "notes.txt", "rw").unwrap();
        assert_eq!(ac.get("bob", "notes.txt").as_deref(), Some("rw"));
        ac.revoke("bob", "notes.txt").unwrap();
        assert_eq!(ac.get("bob", "notes.txt"), None);
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ac = AccessControl::new(dir.path().to_path_buf());
        ac.add("carol", "plan.txt", "rwo").unwrap();

        let reloaded = AccessControl::new(dir.path().to_path_buf());
        reloaded.load_user("carol").unwrap();
        assert_eq!(reloaded.get("carol", "plan.txt").as_deref(), Some("rwo"));
    }

    #[test]
    fn revoke_for_all_clears_every_holder() {
        let dir = tempfile::tempdir().unwrap();
        let ac = AccessControl::new(dir.path().to_path_buf());
        ac.add("dave", "shared.txt", "r").unwrap();
        ac.add("erin", "shared.txt", "rw").unwrap();
        ac.revoke_for_all("shared.txt").unwrap();
        assert_eq!(ac.get("dave", "shared.txt"), None);
        assert_eq!(ac.get("erin", "shared.txt"), None);
    }
}
