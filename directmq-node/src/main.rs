use std::ffi::OsString;
use std::{net, process};

use anyhow::Context as _;

use directmq::logger;
use directmq::message::NodeId;
use directmq_node::config::Config;
use directmq_node::runtime::Runtime;

pub const NAME: &str = "directmq-node";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const HELP_MSG: &str = r#"
Usage

   directmq-node [<option>...]

   Runs a DirectMQ node over TCP until the process is terminated.

Options

    --id               <node-id>    Node id, unique on the network
    --listen           <address>    Address to listen on (may be specified multiple times)
    --connect          <address>    Peer to connect to on startup (may be specified multiple times)
    --ttl              <hops>       Hop budget of messages published here
    --max-message-size <bytes>      Largest payload accepted from peers (0 means no limit)
    --config           <path>       Read the configuration from a JSON file
    --log              <level>      Set log level (default: info)
    --version                       Print program version
    --help                          Print help
"#;

#[derive(Debug)]
struct Options {
    id: Option<NodeId>,
    listen: Vec<net::SocketAddr>,
    connect: Vec<net::SocketAddr>,
    ttl: Option<i32>,
    max_message_size: Option<u64>,
    config: Option<OsString>,
    log: log::Level,
}

impl Options {
    fn from_env() -> Result<Self, anyhow::Error> {
        use lexopt::prelude::*;

        let mut parser = lexopt::Parser::from_env();
        let mut id = None;
        let mut listen = Vec::new();
        let mut connect = Vec::new();
        let mut ttl = None;
        let mut max_message_size = None;
        let mut config = None;
        let mut level = logger::env_level().unwrap_or(log::Level::Info);

        while let Some(arg) = parser.next()? {
            match arg {
                Long("id") => {
                    id = Some(NodeId::from(parser.value()?.string()?));
                }
                Long("listen") => listen.push(parser.value()?.parse()?),
                Long("connect") => connect.push(parser.value()?.parse()?),
                Long("ttl") => ttl = Some(parser.value()?.parse()?),
                Long("max-message-size") => max_message_size = Some(parser.value()?.parse()?),
                Long("config") => config = Some(parser.value()?),
                Long("log") => level = parser.value()?.parse()?,
                Long("help") | Short('h') => {
                    println!("{HELP_MSG}");
                    process::exit(0);
                }
                Long("version") => {
                    println!("{NAME} {VERSION}");
                    process::exit(0);
                }
                _ => return Err(arg.unexpected().into()),
            }
        }
        Ok(Self {
            id,
            listen,
            connect,
            ttl,
            max_message_size,
            config,
            log: level,
        })
    }

    /// Build the node configuration. Options given on the command line
    /// override those in the configuration file.
    fn config(self) -> Result<Config, anyhow::Error> {
        let mut config = match (self.config, self.id) {
            (Some(path), id) => {
                let mut config = Config::from_file(&path)
                    .with_context(|| format!("failed to load {}", path.to_string_lossy()))?;
                if let Some(id) = id {
                    config.host_id = id;
                }
                config
            }
            (None, Some(id)) => Config::new(id),
            (None, None) => anyhow::bail!("a node id is required, use `--id` or `--config`"),
        };
        if let Some(ttl) = self.ttl {
            anyhow::ensure!(ttl > 0, "the ttl must be positive, got {ttl}");
            config.ttl = ttl;
        }
        if let Some(size) = self.max_message_size {
            config.max_incoming_message_size = size;
        }
        config.listen.extend(self.listen);
        config.connect.extend(self.connect);

        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let options = Options::from_env()?;

    logger::init(options.log)?;

    let config = options.config()?;
    let runtime = Runtime::init(config)?;

    for addr in runtime.local_addrs()? {
        log::info!(target: "runtime", "Bound to {addr}");
    }
    runtime.run()?;

    Ok(())
}
