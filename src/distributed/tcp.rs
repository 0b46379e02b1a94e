//! Multi-process reduction over TCP
//!
//! Rank 0 listens; every other rank connects once at startup. A reduction is
//! a gather to rank 0 followed by a broadcast of the mean. Messages are
//! newline-delimited JSON.
//!
//! Each group drives its sockets from a current-thread tokio runtime it owns,
//! so the [`ProcessGroup`] calls stay blocking. Joining the group has a
//! deadline; a reduction waits for slow peers unless
//! [`TcpGroup::with_collective_timeout`] sets one.

use super::{mean_of, LossMap, ProcessGroup};
use crate::error::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, TcpStream, ToSocketAddrs};
use tokio::runtime::{Builder, Runtime};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodec};

const CONNECT_RETRY: Duration = Duration::from_millis(50);
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Message {
    Hello { rank: usize, world_size: usize },
    Welcome { world_size: usize },
    Reduce { round: u64, values: LossMap },
    Reduced { round: u64, values: LossMap },
}

struct Peer {
    rank: usize,
    lines: Framed<TcpStream, LinesCodec>,
}

impl Peer {
    fn new(rank: usize, stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            rank,
            lines: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
        })
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let line = serde_json::to_string(message)
            .map_err(|e| Error::DistributedSync(format!("encode failed: {e}")))?;
        self.lines.send(line).await.map_err(|e| {
            Error::DistributedSync(format!("connection to rank {} failed: {e}", self.rank))
        })
    }

    /// Next message; `None` waits as long as the peer keeps the connection
    async fn recv(&mut self, limit: Option<Duration>) -> Result<Message> {
        let next = match limit {
            Some(limit) => timeout(limit, self.lines.next()).await.map_err(|_| {
                Error::DistributedSync(format!("timed out waiting for rank {}", self.rank))
            })?,
            None => self.lines.next().await,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                return Err(Error::DistributedSync(format!(
                    "connection to rank {} failed: {e}",
                    self.rank
                )))
            }
            None => {
                return Err(Error::DistributedSync(format!(
                    "peer rank {} closed the connection",
                    self.rank
                )))
            }
        };
        serde_json::from_str(&line).map_err(|e| {
            Error::DistributedSync(format!("malformed message from rank {}: {e}", self.rank))
        })
    }
}

enum Role {
    /// Peers ordered by rank, starting at rank 1
    Master(Vec<Peer>),
    Worker(Peer),
}

struct State {
    round: u64,
    role: Role,
}

fn new_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_io().enable_time().build()?)
}

/// Listening half of the rendezvous, held by rank 0
pub struct TcpRendezvous {
    listener: TcpListener,
    world_size: usize,
    timeout: Duration,
    /// Declared last so the listener is dropped while its reactor is alive
    runtime: Runtime,
}

impl fmt::Debug for TcpRendezvous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpRendezvous")
            .field("addr", &self.listener.local_addr().ok())
            .field("world_size", &self.world_size)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TcpRendezvous {
    /// Bind the master socket
    pub fn bind(addr: impl ToSocketAddrs, world_size: usize, timeout: Duration) -> Result<Self> {
        let runtime = new_runtime()?;
        let listener = runtime.block_on(TcpListener::bind(addr))?;
        Ok(Self {
            listener,
            world_size,
            timeout,
            runtime,
        })
    }

    /// Address workers should connect to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for every worker to join and return the master's group.
    ///
    /// Fails if a worker announces a different world size, an out-of-range or
    /// duplicate rank, or if not everyone joins before the timeout.
    pub fn accept(self) -> Result<TcpGroup> {
        let expected = self.world_size.saturating_sub(1);
        let mut joined: Vec<Option<Peer>> = (0..expected).map(|_| None).collect();

        let gathered = self
            .runtime
            .block_on(async { timeout(self.timeout, self.gather(&mut joined)).await });
        match gathered {
            Ok(result) => result?,
            Err(_) => {
                let count = joined.iter().flatten().count();
                return Err(Error::DistributedSync(format!(
                    "only {count} of {expected} workers joined before the timeout"
                )));
            }
        }

        let peers = joined.into_iter().flatten().collect();
        Ok(TcpGroup {
            rank: 0,
            world_size: self.world_size,
            collective_timeout: None,
            state: Mutex::new(State {
                round: 0,
                role: Role::Master(peers),
            }),
            runtime: self.runtime,
        })
    }

    async fn gather(&self, joined: &mut [Option<Peer>]) -> Result<()> {
        while joined.iter().any(Option::is_none) {
            let (stream, _) = self.listener.accept().await?;
            let mut peer = Peer::new(0, stream)?;
            let (rank, world_size) = match peer.recv(None).await? {
                Message::Hello { rank, world_size } => (rank, world_size),
                other => {
                    return Err(Error::DistributedSync(format!(
                        "expected hello, got {other:?}"
                    )))
                }
            };
            if world_size != self.world_size {
                return Err(Error::DistributedSync(format!(
                    "rank {rank} expects world size {world_size}, master has {}",
                    self.world_size
                )));
            }
            if rank == 0 || rank >= self.world_size || joined[rank - 1].is_some() {
                return Err(Error::DistributedSync(format!(
                    "invalid or duplicate worker rank {rank}"
                )));
            }

            peer.rank = rank;
            peer.send(&Message::Welcome {
                world_size: self.world_size,
            })
            .await?;
            joined[rank - 1] = Some(peer);
        }
        Ok(())
    }
}

/// One rank of a multi-process group
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    collective_timeout: Option<Duration>,
    state: Mutex<State>,
    /// Declared last so the sockets are dropped while their reactor is alive
    runtime: Runtime,
}

impl fmt::Debug for TcpGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpGroup")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("collective_timeout", &self.collective_timeout)
            .finish_non_exhaustive()
    }
}

impl TcpGroup {
    /// Join the master at `addr` as `rank`.
    ///
    /// Connection attempts repeat until the timeout so workers may start
    /// before the master is listening.
    pub fn connect(
        addr: impl ToSocketAddrs,
        rank: usize,
        world_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let runtime = new_runtime()?;
        let peer = runtime.block_on(join_master(addr, rank, world_size, timeout))?;

        Ok(Self {
            rank,
            world_size,
            collective_timeout: None,
            state: Mutex::new(State {
                round: 0,
                role: Role::Worker(peer),
            }),
            runtime,
        })
    }

    /// Fail a reduction that waits longer than `limit` on any peer
    pub fn with_collective_timeout(mut self, limit: Option<Duration>) -> Self {
        self.collective_timeout = limit;
        self
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::DistributedSync(format!("rank {}: group state poisoned", self.rank)))
    }

    async fn reduce(&self, state: &mut State, values: &LossMap) -> Result<LossMap> {
        let round = state.round;
        let limit = self.collective_timeout;

        match &mut state.role {
            Role::Master(peers) => {
                let mut contributions = Vec::with_capacity(peers.len() + 1);
                contributions.push(values.clone());
                for peer in peers.iter_mut() {
                    match peer.recv(limit).await? {
                        Message::Reduce {
                            round: peer_round,
                            values,
                        } if peer_round == round => contributions.push(values),
                        other => {
                            return Err(Error::DistributedSync(format!(
                                "rank {} out of step in round {round}: {other:?}",
                                peer.rank
                            )))
                        }
                    }
                }

                let reduced = mean_of(&contributions)?;
                for peer in peers.iter_mut() {
                    peer.send(&Message::Reduced {
                        round,
                        values: reduced.clone(),
                    })
                    .await?;
                }
                Ok(reduced)
            }
            Role::Worker(peer) => {
                peer.send(&Message::Reduce {
                    round,
                    values: values.clone(),
                })
                .await?;
                match peer.recv(limit).await? {
                    Message::Reduced {
                        round: master_round,
                        values,
                    } if master_round == round => Ok(values),
                    other => Err(Error::DistributedSync(format!(
                        "rank {} got unexpected reply in round {round}: {other:?}",
                        self.rank
                    ))),
                }
            }
        }
    }
}

async fn join_master(
    addr: impl ToSocketAddrs,
    rank: usize,
    world_size: usize,
    limit: Duration,
) -> Result<Peer> {
    let addrs: Vec<SocketAddr> = lookup_host(addr).await?.collect();
    let joined = timeout(limit, async {
        let stream = loop {
            match TcpStream::connect(addrs.as_slice()).await {
                Ok(stream) => break stream,
                Err(_) => sleep(CONNECT_RETRY).await,
            }
        };
        handshake(stream, rank, world_size).await
    })
    .await;

    joined.map_err(|_| {
        Error::DistributedSync(format!("rank {rank} could not reach master at {addrs:?}"))
    })?
}

async fn handshake(stream: TcpStream, rank: usize, world_size: usize) -> Result<Peer> {
    let mut peer = Peer::new(0, stream)?;
    peer.send(&Message::Hello { rank, world_size }).await?;
    match peer.recv(None).await? {
        Message::Welcome {
            world_size: master_world,
        } if master_world == world_size => Ok(peer),
        other => Err(Error::DistributedSync(format!(
            "rank {rank} rejected by master: {other:?}"
        ))),
    }
}

impl ProcessGroup for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&self, values: &LossMap) -> Result<LossMap> {
        let mut state = self.lock_state()?;
        let reduced = self.runtime.block_on(self.reduce(&mut state, values))?;
        state.round += 1;
        Ok(reduced)
    }

    fn barrier(&self) -> Result<()> {
        self.all_reduce_mean(&LossMap::new()).map(|_| ())
    }
}
