//! Daemon configuration.
//!
//! Every setting is a flag with an environment fallback.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use agent_csi_core::{Flavor, PathResolver};
use agent_csi_provisioner::ProvisionerConfig;
use clap::Parser;

use crate::error::DriverError;

/// Name the plugin registers with kubelet.
pub const DRIVER_NAME: &str = "csi.oneagent.dynatrace.com";

/// Version reported by `GetPluginInfo`.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where the gRPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A UNIX domain socket.
    Unix(PathBuf),
    /// A TCP address.
    Tcp(SocketAddr),
}

impl FromStr for Endpoint {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(DriverError::Config(format!("endpoint '{s}' has no socket path")));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            return addr
                .parse()
                .map(Self::Tcp)
                .map_err(|e| DriverError::Config(format!("endpoint '{s}': {e}")));
        }
        Err(DriverError::Config(format!(
            "endpoint '{s}' must start with unix:// or tcp://"
        )))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Command-line arguments of the daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-csi-driver", version, about = "CSI plugin bind mounting agents into pods")]
pub struct Args {
    /// CSI endpoint, `unix://<path>` or `tcp://<host:port>`
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///tmp/csi.sock")]
    pub endpoint: Endpoint,

    /// Name of this node, reported by `NodeGetInfo`
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Address of the `/healthz` endpoint
    #[arg(long, env = "HEALTH_PROBE_ADDRESS", default_value = "0.0.0.0:10080")]
    pub health_probe_bind_address: SocketAddr,

    /// Directory holding agents, volumes and the metadata database
    #[arg(long, env = "CSI_DATA_DIR", default_value = "/data")]
    pub root_dir: PathBuf,

    /// Concurrent gRPC requests allowed per connection
    #[arg(long, env = "GRPC_MAX_REQUESTS_LIMIT", default_value_t = 20)]
    pub max_grpc_requests: usize,

    /// Namespaces allowed to request support volumes, comma separated
    #[arg(long, env = "SUPPORT_NAMESPACES", value_delimiter = ',')]
    pub support_namespaces: Vec<String>,

    /// Agent flavors to install, comma separated
    #[arg(long, env = "AGENT_FLAVORS", value_delimiter = ',', default_value = "default")]
    pub flavors: Vec<Flavor>,

    /// Namespace the daemon runs in; DynaKubes and jobs live here
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: String,
}

impl Args {
    /// The path layout under `root_dir`.
    #[must_use]
    pub fn paths(&self) -> PathResolver {
        PathResolver::new(&self.root_dir)
    }

    /// Namespaces allowed to request support volumes.
    ///
    /// Defaults to the daemon's own namespace.
    #[must_use]
    pub fn support_namespaces(&self) -> BTreeSet<String> {
        let namespaces: BTreeSet<String> = self
            .support_namespaces
            .iter()
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .collect();
        if namespaces.is_empty() {
            BTreeSet::from([self.pod_namespace.clone()])
        } else {
            namespaces
        }
    }

    /// Provisioner settings derived from the arguments.
    #[must_use]
    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig::new(&self.pod_namespace, &self.node_id)
            .with_flavors(self.flavors.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "agent-csi-driver",
            "--node-id",
            "node-1",
            "--pod-namespace",
            "dynatrace",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            "unix:///var/lib/kubelet/plugins/csi.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/var/lib/kubelet/plugins/csi.sock"))
        );
        assert_eq!(
            "tcp://127.0.0.1:10000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:10000".parse().unwrap())
        );
        assert!("unix://".parse::<Endpoint>().is_err());
        assert!("tcp://nope".parse::<Endpoint>().is_err());
        assert!("http://localhost".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_display_round_trips() {
        let endpoint = Endpoint::Unix(PathBuf::from("/tmp/csi.sock"));
        assert_eq!(endpoint.to_string(), "unix:///tmp/csi.sock");
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.endpoint, Endpoint::Unix(PathBuf::from("/tmp/csi.sock")));
        assert_eq!(args.health_probe_bind_address.port(), 10080);
        assert_eq!(args.root_dir, PathBuf::from("/data"));
        assert_eq!(args.max_grpc_requests, 20);
        assert_eq!(args.flavors, vec![Flavor::Default]);
        assert_eq!(args.support_namespaces(), BTreeSet::from(["dynatrace".to_string()]));
    }

    #[test]
    fn lists_are_comma_separated() {
        let args = parse(&["--support-namespaces", "ops, debug", "--flavors", "default,musl"]);
        assert_eq!(
            args.support_namespaces(),
            BTreeSet::from(["debug".to_string(), "ops".to_string()])
        );
        assert_eq!(args.flavors, vec![Flavor::Default, Flavor::Musl]);
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        let argv = [
            "agent-csi-driver",
            "--node-id",
            "node-1",
            "--pod-namespace",
            "dynatrace",
            "--flavors",
            "alpine",
        ];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn provisioner_config_uses_namespace_and_node() {
        let config = parse(&["--flavors", "musl"]).provisioner_config();
        assert_eq!(config.namespace, "dynatrace");
        assert_eq!(config.node_name, "node-1");
        assert!(config.flavors.contains(&Flavor::Musl));
    }
}
