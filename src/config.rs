//! Broker configuration.
//!
//! Builder-style: construct with defaults, override fields, `build()` into
//! a validated value.

use std::time::Duration;

use crate::dissemination::Mode;

pub const DEFAULT_PUB_REG_PORT: u16 = 5555;
pub const DEFAULT_SUB_REG_PORT: u16 = 5556;
pub const DEFAULT_ZK_HOSTS: &str = "127.0.0.1:2181";
pub const DEFAULT_ELECTION_PATH: &str = "/election";
pub const DEFAULT_PRESENCE_PATH: &str = "/broker";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15);

/// Either poll for events indefinitely, or stop after a fixed count — kept
/// as a config knob so tests can run the broker to completion without a
/// shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopBound {
  Indefinite,
  MaxEvents(usize),
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
  pub own_host: String,
  pub pub_reg_port: u16,
  pub sub_reg_port: u16,
  pub mode: Mode,
  pub zk_hosts: String,
  pub election_path: String,
  pub presence_path: String,
  pub session_timeout: Duration,
  pub event_loop_bound: EventLoopBound,
}

impl Default for BrokerConfig {
  fn default() -> Self {
    BrokerConfig {
      own_host: "127.0.0.1".to_string(),
      pub_reg_port: DEFAULT_PUB_REG_PORT,
      sub_reg_port: DEFAULT_SUB_REG_PORT,
      mode: Mode::Centralized,
      zk_hosts: DEFAULT_ZK_HOSTS.to_string(),
      election_path: DEFAULT_ELECTION_PATH.to_string(),
      presence_path: DEFAULT_PRESENCE_PATH.to_string(),
      session_timeout: DEFAULT_SESSION_TIMEOUT,
      event_loop_bound: EventLoopBound::Indefinite,
    }
  }
}

/// Builder for [`BrokerConfig`].
#[derive(Debug, Clone, Default)]
pub struct BrokerConfigBuilder {
  config: BrokerConfig,
}

impl BrokerConfigBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn own_host(mut self, host: impl Into<String>) -> Self {
    self.config.own_host = host.into();
    self
  }

  pub fn pub_reg_port(mut self, port: u16) -> Self {
    self.config.pub_reg_port = port;
    self
  }

  pub fn sub_reg_port(mut self, port: u16) -> Self {
    self.config.sub_reg_port = port;
    self
  }

  pub fn mode(mut self, mode: Mode) -> Self {
    self.config.mode = mode;
    self
  }

  pub fn zk_hosts(mut self, hosts: impl Into<String>) -> Self {
    self.config.zk_hosts = hosts.into();
    self
  }

  pub fn election_path(mut self, path: impl Into<String>) -> Self {
    self.config.election_path = path.into();
    self
  }

  pub fn presence_path(mut self, path: impl Into<String>) -> Self {
    self.config.presence_path = path.into();
    self
  }

  pub fn session_timeout(mut self, timeout: Duration) -> Self {
    self.config.session_timeout = timeout;
    self
  }

  pub fn event_loop_bound(mut self, bound: EventLoopBound) -> Self {
    self.config.event_loop_bound = bound;
    self
  }

  pub fn build(self) -> BrokerConfig {
    self.config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec_ports() {
    let cfg = BrokerConfig::default();
    assert_eq!(cfg.pub_reg_port, 5555);
    assert_eq!(cfg.sub_reg_port, 5556);
    assert_eq!(cfg.mode, Mode::Centralized);
  }

  #[test]
  fn builder_overrides_apply() {
    let cfg = BrokerConfigBuilder::new()
      .mode(Mode::Decentralized)
      .pub_reg_port(6000)
      .event_loop_bound(EventLoopBound::MaxEvents(15))
      .build();
    assert_eq!(cfg.mode, Mode::Decentralized);
    assert_eq!(cfg.pub_reg_port, 6000);
    assert_eq!(cfg.event_loop_bound, EventLoopBound::MaxEvents(15));
  }
}
