//! Endpoint bookkeeping: address parsing, keyspace and topology
//! discovery, and the per-kind shape of the keyspace scan.

use respdiff_core::{ClientError, ConfigError, EndpointKind, FxHashMap};

use crate::client::StoreClient;
use crate::resp::Command;

/// Separator between addresses of one endpoint.
pub const ADDRESS_SPLITTER: char = ';';
/// Separator between a role prefix and the address list.
const ROLE_SPLITTER: char = '@';

const ROLE_MASTER: &str = "master";
const ROLE_SLAVE: &str = "slave";

/// Split an endpoint argument into its addresses, validating and
/// stripping an optional `master@` / `slave@` role prefix.
pub fn parse_address_list(input: &str) -> Result<Vec<String>, ConfigError> {
    let body = match input.split_once(ROLE_SPLITTER) {
        Some((role, rest)) => {
            if !role.is_empty() && role != ROLE_MASTER && role != ROLE_SLAVE {
                return Err(ConfigError::Address {
                    address: input.to_string(),
                    reason: format!("unknown role `{role}`, expected master or slave"),
                });
            }
            rest
        }
        None => input,
    };

    let addrs: Vec<String> = body
        .split(ADDRESS_SPLITTER)
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string())
        .collect();
    if addrs.is_empty() {
        return Err(ConfigError::Address {
            address: input.to_string(),
            reason: "no address given".to_string(),
        });
    }
    Ok(addrs)
}

/// One line of `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct ClusterNodeInfo {
    pub id: String,
    pub addr: String,
    pub role: String,
    pub slot_ranges: Vec<(u16, u16)>,
}

/// Parse the bulk payload of `CLUSTER NODES`.
///
/// Line shape: `<id> <ip:port@cport> <flags> <master> <ping> <pong>
/// <epoch> <state> [slot ranges...]`.
pub fn parse_cluster_nodes(content: &[u8]) -> Vec<ClusterNodeInfo> {
    let text = String::from_utf8_lossy(content);
    let mut nodes = Vec::new();
    for line in text.lines() {
        let items: Vec<&str> = line.split_whitespace().collect();
        if items.len() < 8 {
            continue;
        }

        let addr = items[1].split(ROLE_SPLITTER).next().unwrap_or("").to_string();
        let flags: Vec<&str> = items[2].split(',').collect();
        let role = if flags.len() > 1 { flags[1] } else { flags[0] };

        let mut slot_ranges = Vec::new();
        for slot in items.iter().skip(8) {
            // migrating/importing markers look like [slot->-id]; skip them
            if slot.starts_with('[') {
                continue;
            }
            let range = match slot.split_once('-') {
                Some((start, end)) => start.parse().ok().zip(end.parse().ok()),
                None => slot.parse().ok().map(|s| (s, s)),
            };
            if let Some((start, end)) = range {
                slot_ranges.push((start, end));
            }
        }

        nodes.push(ClusterNodeInfo {
            id: items[0].to_string(),
            addr,
            role: role.to_string(),
            slot_ranges,
        });
    }
    nodes
}

/// The master subset of a node listing.
pub fn master_nodes(nodes: &[ClusterNodeInfo]) -> Vec<ClusterNodeInfo> {
    nodes
        .iter()
        .filter(|n| n.role == ROLE_MASTER)
        .cloned()
        .collect()
}

/// Parse `INFO Keyspace` into `{db → keys}`.
///
/// Payload lines look like `db0:keys=18,expires=0,avg_ttl=0`.
pub fn parse_keyspace(content: &[u8]) -> Result<FxHashMap<i32, i64>, ClientError> {
    let text = String::from_utf8_lossy(content);
    if !text.starts_with("# Keyspace") {
        return Err(ClientError::UnexpectedReply {
            command: "INFO Keyspace".to_string(),
            message: "missing # Keyspace header".to_string(),
        });
    }

    let mut dbs = FxHashMap::default();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("db") else {
            continue;
        };
        let Some((db, counters)) = rest.split_once(':') else {
            continue;
        };
        let db: i32 = db.parse().map_err(|_| ClientError::UnexpectedReply {
            command: "INFO Keyspace".to_string(),
            message: format!("bad db number in `{line}`"),
        })?;
        let keys = counters
            .split(',')
            .find_map(|c| c.strip_prefix("keys="))
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ClientError::UnexpectedReply {
                command: "INFO Keyspace".to_string(),
                message: format!("missing keys= in `{line}`"),
            })?;
        dbs.insert(db, keys);
    }
    Ok(dbs)
}

/// Parse any `INFO` section payload into a key → value map.
pub fn parse_info(content: &[u8]) -> FxHashMap<String, String> {
    let text = String::from_utf8_lossy(content);
    let mut map = FxHashMap::default();
    for line in text.lines() {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.to_string(), v.trim().to_string());
        }
    }
    map
}

/// What the orchestrator needs to know about an endpoint before round 1:
/// which logical databases to compare, and the physical shards a scan of
/// each database fans out over.
#[derive(Debug, Clone)]
pub struct BaseInfo {
    /// Logical db → reported key count (0 where the endpoint cannot say).
    pub logical_dbs: FxHashMap<i32, i64>,
    /// Per-kind shard handles: addresses (single/cluster), shard indices
    /// (iscan proxy), or node ids (node proxy).
    pub shards: Vec<String>,
}

impl StoreClient {
    /// Discover logical databases and physical shards, applying the
    /// configured db whitelist.
    pub fn fetch_base_info(&mut self) -> Result<BaseInfo, ClientError> {
        let endpoint = self.endpoint().clone();

        let mut logical_dbs = if endpoint.is_cluster() {
            // cluster endpoints have a single, unnumbered keyspace
            let mut dbs = FxHashMap::default();
            dbs.insert(0, 0);
            dbs
        } else {
            let content = self
                .do_command(&Command::new("INFO").arg("Keyspace"))?
                .into_bytes("INFO Keyspace")?;
            let mut dbs = parse_keyspace(&content)?;
            // an idle node-proxy reports no keyspace at all
            if dbs.is_empty() && endpoint.kind == EndpointKind::NodeProxy {
                dbs.insert(0, 0);
            }
            dbs
        };

        if let Some(whitelist) = &endpoint.db_whitelist {
            logical_dbs.retain(|db, _| whitelist.contains(db));
        }

        let shards = match endpoint.kind {
            EndpointKind::Single => vec![endpoint.addrs[0].clone()],
            EndpointKind::Cluster => endpoint.addrs.clone(),
            EndpointKind::IscanProxy => {
                let content = self
                    .do_command(&Command::new("INFO").arg("Cluster"))?
                    .into_bytes("INFO Cluster")?;
                let info = parse_info(&content);
                let count: usize = info
                    .get("nodecount")
                    .and_then(|n| n.parse().ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| ClientError::UnexpectedReply {
                        command: "INFO Cluster".to_string(),
                        message: "missing or non-positive nodecount".to_string(),
                    })?;
                (0..count).map(|i| i.to_string()).collect()
            }
            EndpointKind::NodeProxy => {
                let content = self
                    .do_command(&Command::new("CLUSTER").arg("NODES"))?
                    .into_bytes("CLUSTER NODES")?;
                master_nodes(&parse_cluster_nodes(&content))
                    .into_iter()
                    .map(|n| n.id)
                    .collect()
            }
        };

        Ok(BaseInfo {
            logical_dbs,
            shards,
        })
    }
}

/// The keyspace scan command for one shard of an endpoint.
pub fn scan_command(
    kind: EndpointKind,
    shard: &str,
    shard_index: usize,
    cursor: u64,
    count: usize,
) -> Command {
    match kind {
        EndpointKind::Single | EndpointKind::Cluster => Command::new("SCAN")
            .arg_int(cursor as i64)
            .arg("COUNT")
            .arg_int(count as i64),
        EndpointKind::IscanProxy => Command::new("ISCAN")
            .arg_int(shard_index as i64)
            .arg_int(cursor as i64)
            .arg("COUNT")
            .arg_int(count as i64),
        EndpointKind::NodeProxy => Command::new("SCAN")
            .arg_int(cursor as i64)
            .arg("COUNT")
            .arg_int(count as i64)
            .arg(shard.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_roles() {
        assert_eq!(parse_address_list("127.0.0.1:6379").unwrap(), vec!["127.0.0.1:6379"]);
        assert_eq!(
            parse_address_list("master@10.0.0.1:7000;10.0.0.2:7000").unwrap(),
            vec!["10.0.0.1:7000", "10.0.0.2:7000"]
        );
        assert!(parse_address_list("admin@10.0.0.1:7000").is_err());
        assert!(parse_address_list("").is_err());
    }

    #[test]
    fn test_parse_keyspace() {
        let content = b"# Keyspace\r\ndb0:keys=18,expires=0,avg_ttl=0\r\ndb3:keys=2,expires=1,avg_ttl=0\r\n";
        let dbs = parse_keyspace(content).unwrap();
        assert_eq!(dbs.len(), 2);
        assert_eq!(dbs[&0], 18);
        assert_eq!(dbs[&3], 2);

        assert!(parse_keyspace(b"# Clients\r\n").is_err());
    }

    #[test]
    fn test_parse_info() {
        let info = parse_info(b"nodecount:4\r\ncluster_enabled:1\r\n");
        assert_eq!(info["nodecount"], "4");
        assert_eq!(info["cluster_enabled"], "1");
    }

    #[test]
    fn test_parse_cluster_nodes() {
        let content = b"\
d49a4c7b516b8da222d46a0a589b77f381285977 10.1.1.1:21333@31333 master - 0 1557996786000 3 connected 10923-16383\n\
f23ba7be501b2dcd4d6eeabd2d25551513e5c186 10.1.1.1:21336@31336 slave d49a4c7b516b8da222d46a0a589b77f381285977 0 1557996785000 6 connected\n\
75fffcd521738606a919607a7ddd52bcd6d65aa8 10.1.1.1:21331@31331 myself,master - 0 1557996784000 1 connected 0-5460 5461\n";
        let nodes = parse_cluster_nodes(content);
        assert_eq!(nodes.len(), 3);

        let masters = master_nodes(&nodes);
        assert_eq!(masters.len(), 2);
        assert_eq!(masters[0].addr, "10.1.1.1:21333");
        assert_eq!(masters[0].slot_ranges, vec![(10923, 16383)]);
        assert_eq!(masters[1].slot_ranges, vec![(0, 5460), (5461, 5461)]);
    }

    #[test]
    fn test_scan_command_shapes() {
        let cmd = scan_command(EndpointKind::Single, "ignored", 0, 42, 100);
        assert_eq!(cmd.name, "SCAN");
        assert_eq!(cmd.args[0], b"42");

        let cmd = scan_command(EndpointKind::IscanProxy, "2", 2, 0, 100);
        assert_eq!(cmd.name, "ISCAN");
        assert_eq!(cmd.args[0], b"2");

        let cmd = scan_command(EndpointKind::NodeProxy, "node-id-1", 0, 0, 100);
        assert_eq!(cmd.args.last().unwrap(), b"node-id-1");
    }
}
