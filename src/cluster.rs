//! In-process message passing substrate.
//!
//! A training job runs as a fixed set of ranks, one thread each, joined by a full mesh
//! of channels. Ranks share nothing: the codebook travels as a flat broadcast buffer
//! and partial sums travel as key/value frames, so a rank only ever reads state it
//! received in a message. The collectives are bulk-synchronous, every rank must enter
//! each of them in the same order.
//!
//! A disconnected channel means a peer died; every collective surfaces that as an error
//! and the whole job aborts, there is no recovery path.

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::mapreduce::KeyValue;

/// The rank running collective roots: codebook owner, gather target.
pub const ROOT: usize = 0;

enum Frame {
    Barrier,
    Scalar(f32),
    Buffer(Vec<f32>),
    Pairs(Vec<KeyValue>),
}

/// One rank's endpoint of the mesh.
pub struct Communicator {
    rank: usize,
    size: usize,
    /// peers[dst] sends to rank dst
    peers: Vec<Sender<Frame>>,
    /// inbox[src] receives what rank src sent us
    inbox: Vec<Receiver<Frame>>,
}

impl Communicator {
    /// Builds the full mesh for a cluster of the given size, one endpoint per rank.
    fn full_mesh(size: usize) -> Vec<Communicator> {
        let mut tx_grid: Vec<Vec<Sender<Frame>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut rx_grid: Vec<Vec<Receiver<Frame>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = unbounded();
                tx_grid[src].push(tx);
                rx_grid[dst].push(rx);
            }
        }
        // rx_grid[dst] was filled in increasing src order, so rx_grid[dst][src] holds
        // the receiving end of the (src, dst) channel
        tx_grid
            .into_iter()
            .zip(rx_grid)
            .enumerate()
            .map(|(rank, (peers, inbox))| Communicator { rank, size, peers, inbox })
            .collect()
    } // end of full_mesh

    pub fn get_rank(&self) -> usize {
        self.rank
    }

    pub fn get_size(&self) -> usize {
        self.size
    }

    fn send(&self, dst: usize, frame: Frame) -> Result<()> {
        self.peers[dst]
            .send(frame)
            .map_err(|_| anyhow!("rank {} lost, cannot send from rank {}", dst, self.rank))
    }

    fn recv(&self, src: usize) -> Result<Frame> {
        self.inbox[src]
            .recv()
            .map_err(|_| anyhow!("rank {} lost, rank {} aborts", src, self.rank))
    }

    /// Blocks until every rank of the cluster has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        if self.rank == ROOT {
            for src in 1..self.size {
                match self.recv(src)? {
                    Frame::Barrier => (),
                    _ => bail!("protocol error: rank {} sent data inside a barrier", src),
                }
            }
            for dst in 1..self.size {
                self.send(dst, Frame::Barrier)?;
            }
        } else {
            self.send(ROOT, Frame::Barrier)?;
            match self.recv(ROOT)? {
                Frame::Barrier => (),
                _ => bail!("protocol error: barrier release carried data"),
            }
        }
        Ok(())
    } // end of barrier

    /// Broadcasts one scalar from root; every rank returns root's value.
    pub fn broadcast_scalar(&self, value: f32, root: usize) -> Result<f32> {
        if self.rank == root {
            for dst in (0..self.size).filter(|dst| *dst != root) {
                self.send(dst, Frame::Scalar(value))?;
            }
            Ok(value)
        } else {
            match self.recv(root)? {
                Frame::Scalar(v) => Ok(v),
                _ => bail!("protocol error: expected a scalar from rank {}", root),
            }
        }
    } // end of broadcast_scalar

    /// Broadcasts a flat float buffer from root into every rank's buffer, which must
    /// already have the right length.
    pub fn broadcast_buffer(&self, buffer: &mut [f32], root: usize) -> Result<()> {
        if self.rank == root {
            for dst in (0..self.size).filter(|dst| *dst != root) {
                self.send(dst, Frame::Buffer(buffer.to_vec()))?;
            }
        } else {
            match self.recv(root)? {
                Frame::Buffer(data) => {
                    if data.len() != buffer.len() {
                        bail!(
                            "protocol error: broadcast buffer of length {}, expected {}",
                            data.len(),
                            buffer.len()
                        );
                    }
                    buffer.copy_from_slice(&data);
                }
                _ => bail!("protocol error: expected a buffer from rank {}", root),
            }
        }
        Ok(())
    } // end of broadcast_buffer

    /// All-to-all exchange: outgoing[dst] goes to rank dst, the result collects one
    /// batch per source rank, in rank order.
    pub fn exchange(&self, mut outgoing: Vec<Vec<KeyValue>>) -> Result<Vec<Vec<KeyValue>>> {
        if outgoing.len() != self.size {
            bail!("exchange needs one outgoing batch per rank, got {}", outgoing.len());
        }
        let mut local = Some(std::mem::take(&mut outgoing[self.rank]));
        for (dst, pairs) in outgoing.into_iter().enumerate() {
            if dst != self.rank {
                self.send(dst, Frame::Pairs(pairs))?;
            }
        }
        let mut incoming = Vec::with_capacity(self.size);
        for src in 0..self.size {
            if src == self.rank {
                incoming.push(local.take().unwrap_or_default());
            } else {
                match self.recv(src)? {
                    Frame::Pairs(pairs) => incoming.push(pairs),
                    _ => bail!("protocol error: expected pairs from rank {}", src),
                }
            }
        }
        Ok(incoming)
    } // end of exchange

    /// Centralizes every rank's pairs on root, in rank order. Other ranks return empty.
    pub fn gather(&self, pairs: Vec<KeyValue>, root: usize) -> Result<Vec<KeyValue>> {
        if self.rank == root {
            let mut gathered = Vec::new();
            for src in 0..self.size {
                if src == root {
                    gathered.extend_from_slice(&pairs);
                } else {
                    match self.recv(src)? {
                        Frame::Pairs(p) => gathered.extend(p),
                        _ => bail!("protocol error: expected pairs from rank {}", src),
                    }
                }
            }
            Ok(gathered)
        } else {
            self.send(root, Frame::Pairs(pairs))?;
            Ok(Vec::new())
        }
    } // end of gather
} // end of impl Communicator

/// Spawns one thread per rank, runs f on each rank's endpoint and joins them all.
/// Results come back in rank order; the first rank error (or panic) fails the job.
pub fn run_cluster<T, F>(size: usize, f: F) -> Result<Vec<T>>
where
    F: Fn(Communicator) -> Result<T> + Sync,
    T: Send,
{
    if size == 0 {
        bail!("a cluster needs at least one rank");
    }
    log::debug!("starting cluster of {} ranks", size);
    let comms = Communicator::full_mesh(size);
    std::thread::scope(|scope| {
        let task = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || task(comm)))
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("rank {} panicked", rank))?
            })
            .collect()
    })
} // end of run_cluster

//===========================================================================

// end of mod tests
