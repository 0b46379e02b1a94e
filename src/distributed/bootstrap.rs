//! Rank resolution, group creation and seeding

use super::{LocalGroup, ProcessGroup, TcpGroup, TcpRendezvous};
use crate::config::HarmonizeSpec;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const RANK_VAR: &str = "RANK";
pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
pub const MASTER_ADDR_VAR: &str = "MASTER_ADDR";
pub const MASTER_PORT_VAR: &str = "MASTER_PORT";

/// Rendezvous settings handed to a process by its launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedEnv {
    pub rank: usize,
    pub world_size: usize,
    pub master_addr: Option<String>,
    pub master_port: Option<u16>,
}

impl DistributedEnv {
    /// Read from the process environment
    pub fn from_process_env() -> Result<Option<Self>> {
        Self::from_vars(std::env::vars())
    }

    /// Read from explicit `(name, value)` pairs.
    ///
    /// Returns `None` when `RANK` is absent (not launched as a group member).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Option<Self>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut rank = None;
        let mut world_size = None;
        let mut master_addr = None;
        let mut master_port = None;

        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                RANK_VAR => rank = Some(parse_var(RANK_VAR, value)?),
                WORLD_SIZE_VAR => world_size = Some(parse_var(WORLD_SIZE_VAR, value)?),
                MASTER_ADDR_VAR => master_addr = Some(value.to_string()),
                MASTER_PORT_VAR => master_port = Some(parse_var(MASTER_PORT_VAR, value)?),
                _ => {}
            }
        }

        let Some(rank) = rank else {
            return Ok(None);
        };
        let world_size = world_size.ok_or_else(|| {
            Error::ConfigError(format!("{RANK_VAR} is set but {WORLD_SIZE_VAR} is not"))
        })?;
        if world_size == 0 || rank >= world_size {
            return Err(Error::ConfigError(format!(
                "rank {rank} is outside world size {world_size}"
            )));
        }

        Ok(Some(Self {
            rank,
            world_size,
            master_addr,
            master_port,
        }))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("{name}={value} is not a valid number")))
}

/// Build this process's group.
///
/// Without launcher variables only a single-device run is allowed. With
/// them, the advertised world size must equal `num_devices`.
pub fn init_process_group(
    spec: &HarmonizeSpec,
    env: Option<&DistributedEnv>,
) -> Result<Arc<dyn ProcessGroup>> {
    let Some(env) = env else {
        if spec.num_devices > 1 {
            return Err(Error::ConfigError(format!(
                "num_devices is {} but no {RANK_VAR}/{WORLD_SIZE_VAR} were provided",
                spec.num_devices
            )));
        }
        return Ok(Arc::new(LocalGroup::new()));
    };

    if env.world_size != spec.num_devices {
        return Err(Error::DistributedSync(format!(
            "launcher started {} processes, config expects {}",
            env.world_size, spec.num_devices
        )));
    }
    if env.world_size == 1 {
        return Ok(Arc::new(LocalGroup::new()));
    }

    let addr = env
        .master_addr
        .clone()
        .unwrap_or_else(|| spec.distributed.master_addr.clone());
    let port = env.master_port.unwrap_or(spec.distributed.master_port);
    let timeout = Duration::from_secs(spec.distributed.timeout_secs);
    let collective_timeout = spec.distributed.collective_timeout_secs.map(Duration::from_secs);

    if env.rank == 0 {
        info!(
            "Waiting for {} workers on {addr}:{port}",
            env.world_size - 1
        );
        let group = TcpRendezvous::bind((addr.as_str(), port), env.world_size, timeout)?
            .accept()?
            .with_collective_timeout(collective_timeout);
        info!("Process group ready (world size {})", env.world_size);
        Ok(Arc::new(group))
    } else {
        let group = TcpGroup::connect((addr.as_str(), port), env.rank, env.world_size, timeout)?
            .with_collective_timeout(collective_timeout);
        Ok(Arc::new(group))
    }
}

/// Seed for the epoch's sample order; identical on every rank
pub fn shuffle_seed(base: u64, epoch: usize) -> u64 {
    base.wrapping_add(epoch as u64)
}

/// Seed for per-process augmentation randomness
pub fn augment_seed(base: u64, rank: usize) -> u64 {
    base.wrapping_add(rank as u64)
}
