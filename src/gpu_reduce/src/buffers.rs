//! Ping/pong device buffer pair.
//!
//! Two equally sized buffers and a single "current" designation. In-place
//! passes work on the current buffer; out-of-place passes read the current
//! buffer, write the other one and then [`swap`](PingPongBuffers::swap) so
//! the output becomes the next pass's input. The designation is an index
//! into a two-element array, so a swap never moves data and the buffer
//! holding the result is never ambiguous.
//!
//! Both buffers are dropped together with the pair.

use serde::Serialize;

use crate::device::{PassIo, ReductionDevice};
use crate::error::Result;

/// Which physical buffer is designated current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Designation {
    Ping,
    Pong,
}

impl Designation {
    fn index(self) -> usize {
        match self {
            Designation::Ping => 0,
            Designation::Pong => 1,
        }
    }

    fn flipped(self) -> Self {
        match self {
            Designation::Ping => Designation::Pong,
            Designation::Pong => Designation::Ping,
        }
    }
}

/// Two device buffers of equal capacity used alternately as pass input and
/// output.
pub struct PingPongBuffers<B> {
    buffers: [B; 2],
    current: Designation,
    capacity: usize,
}

impl<B> PingPongBuffers<B> {
    /// Allocate both buffers with `capacity` elements each.
    pub fn new<D>(device: &D, capacity: usize) -> Result<Self>
    where
        D: ReductionDevice<Buffer = B>,
    {
        let ping = device.alloc(capacity, "ping buffer")?;
        let pong = device.alloc(capacity, "pong buffer")?;
        Ok(Self {
            buffers: [ping, pong],
            current: Designation::Ping,
            capacity,
        })
    }

    /// Elements per buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer currently designated as holding the live data.
    pub fn designation(&self) -> Designation {
        self.current
    }

    /// Enqueue an upload of `host` into the ping buffer and make it current.
    ///
    /// Does not block; passes issued afterwards observe the data through
    /// stream order.
    pub fn upload<D>(&mut self, device: &D, host: &[u32]) -> Result<()>
    where
        D: ReductionDevice<Buffer = B>,
    {
        self.current = Designation::Ping;
        device.upload(&mut self.buffers[Designation::Ping.index()], host)
    }

    /// Exchange the current/other designation. No data is copied.
    pub fn swap(&mut self) {
        self.current = self.current.flipped();
    }

    /// The current buffer.
    pub fn current(&self) -> &B {
        &self.buffers[self.current.index()]
    }

    /// Bind the current buffer for an in-place pass.
    pub fn in_place(&mut self) -> PassIo<'_, B> {
        PassIo::InPlace(&mut self.buffers[self.current.index()])
    }

    /// Bind current as source and other as destination for an out-of-place
    /// pass.
    pub fn split(&mut self) -> PassIo<'_, B> {
        let (ping, pong) = self.buffers.split_at_mut(1);
        let (src, dst) = match self.current {
            Designation::Ping => (&ping[0], &mut pong[0]),
            Designation::Pong => (&pong[0], &mut ping[0]),
        };
        PassIo::Split { src, dst }
    }

    /// Blocking read of one element of the current buffer.
    pub fn read_scalar<D>(&self, device: &D, index: usize) -> Result<u32>
    where
        D: ReductionDevice<Buffer = B>,
    {
        device.read_scalar(self.current(), index)
    }
}
