//! Dynamic port allocator.
//!
//! Draws uniformly from `[10000, 20000]`, retries on collision against the
//! live pool, and returns a fatal error if the range is exhausted, bounding
//! the retry loop so exhaustion is an observable error instead of a hang.

use std::collections::HashSet;

use rand::Rng;

use crate::error::{BrokerError, BrokerResult};

pub const DYNAMIC_PORT_LOW: u16 = 10_000;
pub const DYNAMIC_PORT_HIGH: u16 = 20_000;

/// The broker's set of claimed TCP ports: registration ports plus every
/// dynamic port handed out so far. No port appears twice.
#[derive(Debug, Default)]
pub struct PortPool {
  claimed: HashSet<u16>,
}

impl PortPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks `port` as claimed without drawing it from the dynamic range.
  /// Used for the two registration ports, which are fixed (or
  /// incremented-on-conflict) rather than randomly drawn.
  pub fn reserve(&mut self, port: u16) {
    self.claimed.insert(port);
  }

  pub fn is_claimed(&self, port: u16) -> bool {
    self.claimed.contains(&port)
  }

  pub fn release(&mut self, port: u16) {
    self.claimed.remove(&port);
  }

  /// Draws a unique port from `[10000, 20000]`. Fatal if the whole range
  /// is already claimed.
  pub fn allocate(&mut self) -> BrokerResult<u16> {
    let span = (DYNAMIC_PORT_HIGH - DYNAMIC_PORT_LOW) as usize + 1;
    if self.claimed.len() >= span {
      return Err(BrokerError::PortsExhausted);
    }
    let mut rng = rand::rng();
    // The range is never close to exhausted in practice, so a bounded
    // reject-and-retry loop (rather than enumerating free ports) stays
    // O(1) in the common case and still terminates in the worst case.
    for _ in 0..(span * 4).max(1024) {
      let port = rng.random_range(DYNAMIC_PORT_LOW..=DYNAMIC_PORT_HIGH);
      if !self.claimed.contains(&port) {
        self.claimed.insert(port);
        return Ok(port);
      }
    }
    Err(BrokerError::PortsExhausted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocated_ports_are_in_range_and_unique() {
    let mut pool = PortPool::new();
    let mut seen = HashSet::new();
    for _ in 0..200 {
      let p = pool.allocate().unwrap();
      assert!((DYNAMIC_PORT_LOW..=DYNAMIC_PORT_HIGH).contains(&p));
      assert!(seen.insert(p), "port {p} allocated twice");
    }
  }

  #[test]
  fn released_port_can_be_reallocated() {
    let mut pool = PortPool::new();
    let p = pool.allocate().unwrap();
    pool.release(p);
    assert!(!pool.is_claimed(p));
  }

  #[test]
  fn reserve_blocks_allocation_of_that_port() {
    let mut pool = PortPool::new();
    pool.reserve(5555);
    assert!(pool.is_claimed(5555));
  }

  #[test]
  fn exhausted_pool_is_fatal() {
    let mut pool = PortPool::new();
    for p in DYNAMIC_PORT_LOW..=DYNAMIC_PORT_HIGH {
      pool.reserve(p);
    }
    assert!(matches!(pool.allocate(), Err(BrokerError::PortsExhausted)));
  }
}
