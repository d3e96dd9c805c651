//! Process configuration: a `clap`-parsed command line layered over an
//! optional `toml` config file. CLI flags always win over file values.
//! Mirrors the `clap` + `serde` + `toml` dependency trio the teacher
//! declares but never wires together.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "scriptum-ds", about = "Directory Service for the scriptum text store")]
pub struct DsArgs {
    /// Path to a TOML config file; CLI flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub client_addr: Option<SocketAddr>,

    #[arg(long)]
    pub sn_addr: Option<SocketAddr>,

    /// Directory holding the user database and access-control files.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Seconds between heartbeat-monitor sweeps.
    #[arg(long)]
    pub heartbeat_timeout_secs: Option<u64>,

    /// Enable the EXEC command. Off by default: spawning an arbitrary
    /// shell script on behalf of a client is a deliberate security
    /// concession and must be opted into.
    #[arg(long)]
    pub enable_exec: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DsFileConfig {
    client_addr: Option<SocketAddr>,
    sn_addr: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    heartbeat_timeout_secs: Option<u64>,
    enable_exec: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DsConfig {
    pub client_addr: SocketAddr,
    pub sn_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub heartbeat_timeout: std::time::Duration,
    pub enable_exec: bool,
}

impl DsConfig {
    pub fn resolve(args: DsArgs) -> Result<Self> {
        let file = load_file::<DsFileConfig>(args.config.as_deref())?;
        Ok(Self {
            client_addr: args
                .client_addr
                .or(file.client_addr)
                .ok_or_else(|| Error::Fatal("missing client_addr".into()))?,
            sn_addr: args
                .sn_addr
                .or(file.sn_addr)
                .ok_or_else(|| Error::Fatal("missing sn_addr".into()))?,
            data_dir: args.data_dir.or(file.data_dir).unwrap_or_else(|| PathBuf::from("./ds-data")),
            heartbeat_timeout: std::time::Duration::from_secs(
                args.heartbeat_timeout_secs.or(file.heartbeat_timeout_secs).unwrap_or(15),
            ),
            enable_exec: args.enable_exec || file.enable_exec.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "scriptum-sn", about = "Storage Node for the scriptum text store")]
pub struct SnArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub client_addr: Option<SocketAddr>,

    #[arg(long)]
    pub backup_addr: Option<SocketAddr>,

    #[arg(long)]
    pub ds_addr: Option<SocketAddr>,

    /// Where this SN listens for DS-originated commands (create/delete/
    /// get_info/exec_get_content/sync_*/update_backup/re_replicate_all) —
    /// distinct from the client- and replication-facing ports named in the
    /// external interface, since the DS is neither a client nor a ring peer.
    #[arg(long)]
    pub ds_command_addr: Option<SocketAddr>,

    /// Root directory holding `files/`, `undo/`, `checkpoints/`, `swap/`,
    /// and the metadata snapshot.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Seconds between heartbeat emissions.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SnFileConfig {
    client_addr: Option<SocketAddr>,
    backup_addr: Option<SocketAddr>,
    ds_addr: Option<SocketAddr>,
    ds_command_addr: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    heartbeat_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SnConfig {
    pub client_addr: SocketAddr,
    pub backup_addr: SocketAddr,
    pub ds_addr: SocketAddr,
    pub ds_command_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub heartbeat_interval: std::time::Duration,
}

impl SnConfig {
    pub fn resolve(args: SnArgs) -> Result<Self> {
        let file = load_file::<SnFileConfig>(args.config.as_deref())?;
        Ok(Self {
            client_addr: args
                .client_addr
                .or(file.client_addr)
                .ok_or_else(|| Error::Fatal("missing client_addr".into()))?,
            backup_addr: args
                .backup_addr
                .or(file.backup_addr)
                .ok_or_else(|| Error::Fatal("missing backup_addr".into()))?,
            ds_addr: args
                .ds_addr
                .or(file.ds_addr)
                .ok_or_else(|| Error::Fatal("missing ds_addr".into()))?,
            ds_command_addr: args
                .ds_command_addr
                .or(file.ds_command_addr)
                .ok_or_else(|| Error::Fatal("missing ds_command_addr".into()))?,
            data_dir: args.data_dir.or(file.data_dir).unwrap_or_else(|| PathBuf::from("./sn-data")),
            heartbeat_interval: std::time::Duration::from_secs(
                args.heartbeat_interval_secs.or(file.heartbeat_interval_secs).unwrap_or(5),
            ),
        })
    }
}

fn load_file<T: for<'de> Deserialize<'de> + Default>(path: Option<&std::path::Path>) -> Result<T> {
    let Some(path) = path else { return Ok(T::default()) };
    let contents = std::fs::read_to_string(path)
        .map_err(|err| Error::Fatal(format!("reading config {}: {err}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|err| Error::Fatal(format!("parsing config {}: {err}", path.display())))
}
