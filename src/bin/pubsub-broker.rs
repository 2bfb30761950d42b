//! Broker daemon entry point.
//!
//! `clap::Parser` over a flat flags struct; error reporting follows the
//! daemon convention of a non-zero exit code on a fatal error instead of a
//! panic, since this process is meant to run unattended.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::error;
use pubsub_broker::{BrokerConfigBuilder, Mode};

#[derive(Parser)]
#[command(about = "Topic-based publish/subscribe broker")]
struct CommandLineArgs {
  /// Host this broker advertises and binds its sockets on.
  #[arg(long, default_value = "127.0.0.1")]
  host: String,

  /// Publisher-registration port (incremented on conflict).
  #[arg(long, default_value_t = 5555)]
  pub_reg_port: u16,

  /// Subscriber-registration port (incremented on conflict).
  #[arg(long, default_value_t = 5556)]
  sub_reg_port: u16,

  /// Dissemination mode.
  #[arg(long, value_enum, default_value = "centralized")]
  mode: CliMode,

  /// Coordination store connection string.
  #[arg(long, default_value = "127.0.0.1:2181")]
  zk_hosts: String,

  /// Election znode path.
  #[arg(long, default_value = "/election")]
  election_path: String,

  /// Presence znode path clients watch to find the active broker.
  #[arg(long, default_value = "/broker")]
  presence_path: String,

  /// Coordination session timeout, in seconds.
  #[arg(long, default_value_t = 15)]
  session_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliMode {
  Centralized,
  Decentralized,
}

impl From<CliMode> for Mode {
  fn from(mode: CliMode) -> Self {
    match mode {
      CliMode::Centralized => Mode::Centralized,
      CliMode::Decentralized => Mode::Decentralized,
    }
  }
}

fn main() -> ExitCode {
  env_logger::init();
  let args = CommandLineArgs::parse();

  let config = BrokerConfigBuilder::new()
    .own_host(args.host)
    .pub_reg_port(args.pub_reg_port)
    .sub_reg_port(args.sub_reg_port)
    .mode(args.mode.into())
    .zk_hosts(args.zk_hosts)
    .election_path(args.election_path)
    .presence_path(args.presence_path)
    .session_timeout(Duration::from_secs(args.session_timeout_secs))
    .build();

  let broker = pubsub_broker::Broker::new(config);
  let outcome = broker
    .run()
    .map_err(anyhow::Error::from)
    .context("broker exited with a fatal error");

  match outcome {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{e:?}");
      ExitCode::FAILURE
    }
  }
}
