//! Spawning one worker process per extra device

use super::bootstrap::{MASTER_ADDR_VAR, MASTER_PORT_VAR, RANK_VAR, WORLD_SIZE_VAR};
use super::DistributedEnv;
use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command};
use tracing::{info, warn};

/// A running worker process
#[derive(Debug)]
pub struct WorkerHandle {
    pub rank: usize,
    child: Child,
}

/// Start ranks `1..world_size` as copies of `program` with `args`.
///
/// Returns the environment rank 0 should use for itself. Workers inherit the
/// parent's environment plus the rendezvous variables.
pub fn launch_workers(
    program: PathBuf,
    args: &[OsString],
    world_size: usize,
    master_addr: &str,
    master_port: u16,
) -> Result<(DistributedEnv, Vec<WorkerHandle>)> {
    let mut workers = Vec::with_capacity(world_size.saturating_sub(1));
    for rank in 1..world_size {
        let child = Command::new(&program)
            .args(args)
            .env(RANK_VAR, rank.to_string())
            .env(WORLD_SIZE_VAR, world_size.to_string())
            .env(MASTER_ADDR_VAR, master_addr)
            .env(MASTER_PORT_VAR, master_port.to_string())
            .spawn()
            .map_err(|e| Error::DistributedSync(format!("failed to spawn rank {rank}: {e}")))?;
        workers.push(WorkerHandle { rank, child });
    }
    info!("Launched {} worker processes", workers.len());

    let env = DistributedEnv {
        rank: 0,
        world_size,
        master_addr: Some(master_addr.to_string()),
        master_port: Some(master_port),
    };
    Ok((env, workers))
}

/// Wait for every worker; any non-zero exit fails the run
pub fn wait_workers(workers: Vec<WorkerHandle>) -> Result<()> {
    let mut failed = Vec::new();
    for mut worker in workers {
        let status = worker.child.wait()?;
        if !status.success() {
            warn!("Rank {} exited with {status}", worker.rank);
            failed.push(worker.rank);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::DistributedSync(format!(
            "worker ranks {failed:?} exited with errors"
        )))
    }
}
