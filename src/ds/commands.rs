//! Directory Service command handlers (spec §4.2): one function per
//! client-visible operation, composing the ring, file-map, access control,
//! location cache, and session state.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::DsConfig;
use crate::error::{Error, Result};
use crate::model::FileId;
use crate::proto::client_ds::{AccessRequestEntry, DsOk, ViewEntry};
use crate::proto::ds_sn::DsSnCommand;
use crate::proto::FileMetadataWire;

use super::access::AccessControl;
use super::cache::LocationCache;
use super::dsclient;
use super::filemap::{FileLocation, FileMap};
use super::ring::{Ring, RingAssignment};
use super::session::SessionTable;
use super::users::UserDb;

#[derive(Debug, Clone)]
struct PendingAccessRequest {
    requester: String,
    owner: String,
    filename: String,
}

pub struct DsState {
    pub config: DsConfig,
    pub ring: Ring,
    pub filemap: FileMap,
    pub access: AccessControl,
    pub cache: LocationCache,
    pub sessions: SessionTable,
    pub users: UserDb,
    pending_requests: Mutex<Vec<PendingAccessRequest>>,
}

impl DsState {
    pub fn new(config: DsConfig) -> Self {
        let access_dir = config.data_dir.join("access");
        let users_path = config.data_dir.join("users.db");
        Self {
            ring: Ring::new(config.heartbeat_timeout),
            access: AccessControl::new(access_dir),
            cache: LocationCache::new(4096),
            sessions: SessionTable::new(),
            users: UserDb::new(users_path),
            filemap: FileMap::new(),
            pending_requests: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn load(&self) -> Result<()> {
        self.users.load()?;
        self.access.load_all()
    }

    fn effective_perms(&self, user: &str, owner: &str, filename: &str) -> String {
        if user == owner {
            "rwo".to_string()
        } else {
            self.access.get(user, filename).unwrap_or_default()
        }
    }

    fn require_perm(&self, user: &str, owner: &str, filename: &str, perm: char) -> Result<()> {
        let perms = self.effective_perms(user, owner, filename);
        if perms.contains(perm) { Ok(()) } else { Err(Error::Access) }
    }

    pub fn login(&self, username: &str, password: &str) -> Result<u64> {
        if !self.users.verify(username, password) {
            return Err(Error::Access);
        }
        Ok(0)
    }

    /// Spec §4.2 Create flow, steps a-g.
    pub async fn create(&self, user: &str, filename: &str) -> Result<DsOk> {
        let id = FileId::new(user, filename);
        if self.filemap.contains(&id) {
            return Err(Error::Conflict("file already exists".into()));
        }
        let primary = self.ring.select_primary().ok_or(Error::PeerUnavailable)?;
        self.ring.increment_file_count(primary);

        let descriptor = self.ring.descriptor(primary).ok_or(Error::PeerUnavailable)?;
        let reply = dsclient::send_command(
            &descriptor.ds_command_addr(),
            &DsSnCommand::Create { owner: user.to_string(), filename: filename.to_string() },
        )
        .await;
        if reply.is_err() || matches!(reply, Ok(crate::proto::ds_sn::DsSnReply::Fail(_))) {
            self.ring.decrement_file_count(primary);
            return Err(Error::PeerUnavailable);
        }

        self.access.add(user, filename, "rwo")?;
        let backup = self.ring.backup_node_for(primary);
        self.filemap.insert(id, FileLocation { primary, backup });
        Ok(DsOk::Created)
    }

    /// Spec §4.2 Delete flow, steps a-i.
    pub async fn delete(&self, user: &str, filename: &str) -> Result<DsOk> {
        let owner = self.resolve_owner(user, filename)?;
        self.require_perm(user, &owner, filename, 'o')?;

        let id = FileId::new(&owner, filename);
        let location = self.filemap.search(&id).ok_or(Error::NotFound)?;

        let primary = self.ring.descriptor(location.primary).ok_or(Error::PeerUnavailable)?;
        let reply = dsclient::send_command(
            &primary.ds_command_addr(),
            &DsSnCommand::Delete { owner: owner.clone(), filename: filename.to_string() },
        )
        .await?;
        if let crate::proto::ds_sn::DsSnReply::Fail(msg) = reply {
            return Err(Error::Storage(std::io::Error::other(msg)));
        }

        if let Some(backup_id) = location.backup {
            if let Some(backup) = self.ring.descriptor(backup_id) {
                if backup.online {
                    if let Err(err) = dsclient::send_command(
                        &backup.ds_command_addr(),
                        &DsSnCommand::Delete { owner: owner.clone(), filename: filename.to_string() },
                    )
                    .await
                    {
                        tracing::warn!(%filename, %err, "backup delete failed, not fatal");
                    }
                }
            }
        }

        self.ring.decrement_file_count(location.primary);
        self.filemap.delete(&id);
        self.cache.invalidate(&id.cache_key());
        self.access.revoke_for_all(filename)?;
        Ok(DsOk::Deleted)
    }

    /// Spec §4.2 Info: always a live round-trip, never cached.
    pub async fn info(&self, user: &str, filename: &str) -> Result<DsOk> {
        let owner = self.resolve_owner(user, filename)?;
        self.require_perm(user, &owner, filename, 'r')?;
        let id = FileId::new(&owner, filename);
        let location = self.filemap.search(&id).ok_or(Error::NotFound)?;
        let primary = self.ring.descriptor(location.primary).ok_or(Error::PeerUnavailable)?;
        let reply = dsclient::send_command(
            &primary.ds_command_addr(),
            &DsSnCommand::GetInfo { owner: owner.clone(), filename: filename.to_string() },
        )
        .await?;
        match reply {
            crate::proto::ds_sn::DsSnReply::Info(meta) => Ok(DsOk::Info { metadata: meta }),
            _ => Err(Error::NotFound),
        }
    }

    /// Spec §4.2 View: iterates the file-map; `-l` attempts a live fetch
    /// per file, falling back to the backup, else `N/A`.
    pub async fn view(&self, user: &str, show_all: bool, long: bool) -> Result<DsOk> {
        let mut raw = Vec::new();
        self.filemap.for_each_consistent(|id, loc| raw.push((id.clone(), loc.clone())));

        let mut entries = Vec::new();
        for (id, loc) in raw {
            if !show_all {
                let perms = self.effective_perms(user, &id.owner, &id.filename);
                if id.owner != user && perms.is_empty() {
                    continue;
                }
            }
            let metadata = if long { self.fetch_metadata_best_effort(&id, &loc).await } else { None };
            entries.push(ViewEntry { owner: id.owner, filename: id.filename, metadata });
        }
        Ok(DsOk::View { entries })
    }

    async fn fetch_metadata_best_effort(&self, id: &FileId, loc: &FileLocation) -> Option<FileMetadataWire> {
        for candidate in [Some(loc.primary), loc.backup].into_iter().flatten() {
            let Some(descriptor) = self.ring.descriptor(candidate) else { continue };
            if !descriptor.online {
                continue;
            }
            let cmd = DsSnCommand::GetInfo { owner: id.owner.clone(), filename: id.filename.clone() };
            if let Ok(crate::proto::ds_sn::DsSnReply::Info(meta)) =
                dsclient::send_command(&descriptor.ds_command_addr(), &cmd).await
            {
                return Some(meta);
            }
        }
        None
    }

    /// Spec §4.2 Exec: gated behind `--enable-exec`; fetches content,
    /// writes a scratch script, runs it with a scrubbed environment and a
    /// hard timeout, captures stdout+stderr, unlinks the temp file.
    pub async fn exec(&self, user: &str, filename: &str) -> Result<DsOk> {
        if !self.config.enable_exec {
            return Err(Error::Access);
        }
        let owner = self.resolve_owner(user, filename)?;
        self.require_perm(user, &owner, filename, 'r')?;

        let id = FileId::new(&owner, filename);
        let location = self.filemap.search(&id).ok_or(Error::NotFound)?;
        let primary = self.ring.descriptor(location.primary).ok_or(Error::PeerUnavailable)?;
        let reply = dsclient::send_command(
            &primary.ds_command_addr(),
            &DsSnCommand::ExecGetContent { owner: owner.clone(), filename: filename.to_string() },
        )
        .await?;
        let crate::proto::ds_sn::DsSnReply::Content(bytes) = reply else { return Err(Error::NotFound) };

        let script_path = std::env::temp_dir().join(format!("scriptum-exec-{}-{}", std::process::id(), filename));
        tokio::fs::write(&script_path, &bytes).await?;

        let output = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::process::Command::new("sh")
                .arg(&script_path)
                .env_clear()
                .output(),
        )
        .await;

        let _ = tokio::fs::remove_file(&script_path).await;

        let output = output.map_err(|_| Error::Conflict("exec timed out".into()))?.map_err(Error::Storage)?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(DsOk::Exec { output: combined })
    }

    pub fn list_users(&self) -> DsOk {
        DsOk::Users { names: self.users.list_usernames() }
    }

    pub fn access_add(&self, owner: &str, filename: &str, user: &str, perms: &str) -> Result<DsOk> {
        if !self.filemap.contains(&FileId::new(owner, filename)) {
            return Err(Error::NotFound);
        }
        self.access.add(user, filename, perms)?;
        Ok(DsOk::AccessChanged)
    }

    pub fn access_remove(&self, owner: &str, filename: &str, user: &str) -> Result<DsOk> {
        if !self.filemap.contains(&FileId::new(owner, filename)) {
            return Err(Error::NotFound);
        }
        self.access.revoke(user, filename)?;
        Ok(DsOk::AccessChanged)
    }

    pub fn access_request(&self, requester: &str, filename: &str) -> Result<DsOk> {
        let owner = self.resolve_owner(requester, filename)?;
        self.pending_requests.lock().unwrap().push(PendingAccessRequest {
            requester: requester.to_string(),
            owner,
            filename: filename.to_string(),
        });
        Ok(DsOk::AccessChanged)
    }

    pub fn access_view_requests(&self, caller: &str) -> DsOk {
        let requests = self
            .pending_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.owner == caller)
            .map(|req| AccessRequestEntry {
                requester: req.requester.clone(),
                owner: req.owner.clone(),
                filename: req.filename.clone(),
            })
            .collect();
        DsOk::AccessRequests { requests }
    }

    /// `GRANTACCESS`/`ADDACCESS`: sets the permission and removes every
    /// matching pending request for `(requester, filename)` (duplicates
    /// are tolerated and all removed together, not just the first).
    pub fn access_grant(&self, owner: &str, requester: &str, filename: &str, perms: &str) -> Result<DsOk> {
        if !self.filemap.contains(&FileId::new(owner, filename)) {
            return Err(Error::NotFound);
        }
        self.access.add(requester, filename, perms)?;
        self.pending_requests
            .lock()
            .unwrap()
            .retain(|req| !(req.requester == requester && req.filename == filename));
        Ok(DsOk::AccessChanged)
    }

    /// Spec §4.2 Redirect flow: resolves the owning user, checks access for
    /// the requested operation, picks a routing SN, and returns its
    /// endpoint.
    pub async fn redirect(
        &self,
        user: &str,
        op: crate::proto::client_ds::RedirectOp,
        filename: &str,
    ) -> Result<DsOk> {
        use crate::proto::client_ds::RedirectOp as Op;

        let owner = self.resolve_owner(user, filename)?;
        let needed = match op {
            Op::Read | Op::Stream | Op::Checkpoint => 'r',
            Op::Write | Op::Undo => 'w',
        };
        self.require_perm(user, &owner, filename, needed)?;

        let id = FileId::new(&owner, filename);
        let location = self.filemap.search(&id).ok_or(Error::NotFound)?;

        let sn_id = if matches!(op, Op::Checkpoint) {
            // Primary first, then backup.
            match self.ring.descriptor(location.primary) {
                Some(d) if d.online => location.primary,
                _ => location.backup.ok_or(Error::PeerUnavailable)?,
            }
        } else if let Some(cached) = self.cache.get(&id.cache_key()) {
            if self.ring.descriptor(cached).is_some_and(|d| d.online) { cached } else { location.primary }
        } else {
            location.primary
        };

        let descriptor = self.ring.descriptor(sn_id).ok_or(Error::PeerUnavailable)?;
        if !descriptor.online {
            return Err(Error::PeerUnavailable);
        }
        self.cache.put(id.cache_key(), sn_id);
        Ok(DsOk::Redirect { ip: descriptor.ip, port: descriptor.client_port })
    }

    /// Spec §4.2 redirect step c: prefers a file the session user owns,
    /// else any owner in the file-map (the shared-file case).
    fn resolve_owner(&self, user: &str, filename: &str) -> Result<String> {
        if self.filemap.contains(&FileId::new(user, filename)) {
            return Ok(user.to_string());
        }
        self.filemap.find_owner_of_filename(filename).ok_or(Error::NotFound)
    }

    /// Recomputes ring backup assignments and pushes `update-backup` to
    /// every still-online SN whose target changed (spec §4.2).
    pub async fn propagate_ring_change(&self) {
        let assignments = self.ring.recompute_assignments();
        for (id, assignment) in assignments {
            let Some(descriptor) = self.ring.descriptor(id) else { continue };
            if !descriptor.online {
                continue;
            }
            let target = assignment
                .replication_target
                .and_then(|target_id| self.ring.descriptor(target_id))
                .map(|d| (d.ip, d.backup_port));
            let cmd = DsSnCommand::UpdateBackup { target: target.clone() };
            if let Err(err) = dsclient::send_command(&descriptor.ds_command_addr(), &cmd).await {
                tracing::warn!(sn = id, %err, "failed to push update-backup");
            }
            if self.needs_full_replication(id, &assignment) {
                if let Some((ip, port)) = target {
                    let _ = dsclient::send_command(
                        &descriptor.ds_command_addr(),
                        &DsSnCommand::ReReplicateAll { target_ip: ip, target_port: port },
                    )
                    .await;
                }
            }
        }
    }

    fn needs_full_replication(&self, id: u32, assignment: &RingAssignment) -> bool {
        let _ = assignment;
        self.ring.descriptor(id).is_some_and(|d| d.syncing)
    }
}
