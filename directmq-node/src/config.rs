use std::path::Path;
use std::{fs, io, net};

use directmq::message::{NodeId, Ttl, DEFAULT_TTL, NO_MAX_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: host ttl must be positive, got {0}")]
    Ttl(Ttl),
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Our node id. Must be unique on the network.
    pub host_id: NodeId,
    /// Hop budget of messages originating here.
    #[serde(default = "defaults::ttl")]
    pub ttl: Ttl,
    /// Largest publication payload we accept from peers. Zero means no limit.
    #[serde(default)]
    pub max_incoming_message_size: u64,
    /// Addresses to listen on.
    #[serde(default)]
    pub listen: Vec<net::SocketAddr>,
    /// Peers to connect to on startup.
    #[serde(default)]
    pub connect: Vec<net::SocketAddr>,
}

impl Config {
    pub fn new(host_id: impl Into<NodeId>) -> Self {
        Self {
            host_id: host_id.into(),
            ttl: DEFAULT_TTL,
            max_incoming_message_size: NO_MAX_SIZE,
            listen: vec![],
            connect: vec![],
        }
    }

    pub fn test(host_id: impl Into<NodeId>) -> Self {
        Self::new(host_id)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;

        if config.ttl <= 0 {
            return Err(Error::Ttl(config.ttl));
        }
        Ok(config)
    }
}

/// Defaults as functions, for serde.
mod defaults {
    use super::*;

    pub fn ttl() -> Ttl {
        DEFAULT_TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use directmq::assert_matches;

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str(r#"{ "hostId": "alice" }"#).unwrap();

        assert_eq!(config, Config::new("alice"));
        assert_eq!(config.ttl, 32);
        assert_eq!(config.max_incoming_message_size, 0);
    }

    #[test]
    fn test_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        fs::write(
            &path,
            r#"{
                "hostId": "bob",
                "ttl": 4,
                "maxIncomingMessageSize": 1024,
                "listen": ["127.0.0.1:8776"]
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.host_id, NodeId::from("bob"));
        assert_eq!(config.ttl, 4);
        assert_eq!(config.max_incoming_message_size, 1024);
        assert_eq!(config.listen, vec![([127, 0, 0, 1], 8776).into()]);
        assert!(config.connect.is_empty());
    }

    #[test]
    fn test_invalid_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        fs::write(&path, r#"{ "hostId": "bob", "ttl": 0 }"#).unwrap();

        assert_matches!(Config::from_file(&path), Err(Error::Ttl(0)));
    }

    #[test]
    fn test_missing_host_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        fs::write(&path, r#"{ "ttl": 3 }"#).unwrap();

        assert_matches!(Config::from_file(&path), Err(Error::Json(_)));
    }
}
