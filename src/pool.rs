//! Pooled byte buffers, one free list per stride.
//!
//! Every container buffer is rented from the pool matching its exact byte
//! length and handed back when the container is disposed or rescheme-d.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};

/// Free list of buffers that all share one exact length (the *stride*).
/// Two pools with different strides never exchange buffers.
pub struct FixedBytePool {
    stride: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl FixedBytePool {
    pub fn new(stride: usize) -> FixedBytePool {
        FixedBytePool {
            stride,
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of buffers currently parked in the free list.
    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Pops a pooled buffer or allocates a fresh one of exactly `stride`
    /// bytes. Pooled buffers were cleared on hand-back; `zeroed` forces a
    /// clear anyway for callers that must not trust that.
    pub fn rent(&self, zeroed: bool) -> Vec<u8> {
        let reused = self.buffers.lock().pop();
        match reused {
            Some(mut buf) => {
                if zeroed {
                    buf.iter_mut().for_each(|b| *b = 0);
                }
                buf
            }
            None => {
                trace!("pool stride={} grows", self.stride);
                vec![0u8; self.stride]
            }
        }
    }

    /// Clears the buffer and parks it. Buffers of any other length are
    /// refused: they belong to a different pool.
    pub fn hand_back(&self, mut buf: Vec<u8>) -> StoreResult<()> {
        if buf.len() != self.stride {
            return Err(StoreError::PoolViolation {
                stride: self.stride,
                got: buf.len(),
            });
        }
        buf.iter_mut().for_each(|b| *b = 0);
        self.buffers.lock().push(buf);
        Ok(())
    }
}

/// Stride-keyed pool map. Containers of many shapes coexist, so pools are
/// created on first demand and live as long as the registry owning them.
pub struct BufferPools {
    pools: Mutex<HashMap<usize, Arc<FixedBytePool>>>,
}

impl BufferPools {
    pub fn new() -> BufferPools {
        BufferPools {
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool_for(&self, stride: usize) -> Arc<FixedBytePool> {
        self.pools
            .lock()
            .entry(stride)
            .or_insert_with(|| Arc::new(FixedBytePool::new(stride)))
            .clone()
    }

    /// Rents from the pool of `stride`.
    pub fn rent(&self, stride: usize, zeroed: bool) -> Vec<u8> {
        self.pool_for(stride).rent(zeroed)
    }

    /// Hands a buffer back to the pool matching its length.
    pub fn hand_back(&self, buf: Vec<u8>) -> StoreResult<()> {
        self.pool_for(buf.len()).hand_back(buf)
    }
}

impl Default for BufferPools {
    fn default() -> Self {
        BufferPools::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_always_matches_stride() {
        let pool = FixedBytePool::new(64);
        let a = pool.rent(false);
        let b = pool.rent(true);
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn reuse_keeps_length_and_clears() {
        let pool = FixedBytePool::new(16);
        let mut buf = pool.rent(false);
        buf[3] = 0xff;
        pool.hand_back(buf).unwrap();
        assert_eq!(pool.pooled(), 1);

        let again = pool.rent(false);
        assert_eq!(again.len(), 16);
        assert!(again.iter().all(|&b| b == 0));
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn wrong_stride_is_refused() {
        let pool = FixedBytePool::new(8);
        let err = pool.hand_back(vec![0u8; 9]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::PoolViolation { stride: 8, got: 9 }
        ));
    }

    #[test]
    fn pools_map_separates_strides() {
        let pools = BufferPools::new();
        let a = pools.rent(8, true);
        let b = pools.rent(24, true);
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 24);
        pools.hand_back(a).unwrap();
        pools.hand_back(b).unwrap();
        assert_eq!(pools.pool_for(8).pooled(), 1);
        assert_eq!(pools.pool_for(24).pooled(), 1);
    }

    #[test]
    fn randomized_rent_return_cycles() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let pools = BufferPools::new();
        let mut rng = StdRng::seed_from_u64(7);
        let strides = [8usize, 16, 64, 256];
        let mut out: Vec<Vec<u8>> = Vec::new();
        for _ in 0..200 {
            if rng.gen_bool(0.6) || out.is_empty() {
                let stride = strides[rng.gen_range(0..strides.len())];
                out.push(pools.rent(stride, rng.gen_bool(0.5)));
            } else {
                let buf = out.swap_remove(rng.gen_range(0..out.len()));
                pools.hand_back(buf).unwrap();
            }
        }
        for buf in out {
            pools.hand_back(buf).unwrap();
        }
        for stride in strides {
            let pool = pools.pool_for(stride);
            let buf = pool.rent(false);
            assert_eq!(buf.len(), stride);
        }
    }
}
