use cwnd_lab_abstract::{Connection, ConnectionQuery, Destination, SampleSource, SourceError};
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Reads per-connection TCP state through iproute2's `ss -tin`.
#[derive(Debug, Clone)]
pub struct SsSource {
    binary: PathBuf,
}

impl Default for SsSource {
    fn default() -> Self {
        Self::new("ss")
    }
}

impl SsSource {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for one query, e.g.
    /// `-t -i -n state established dst 10.0.0.3 dport = :5201 sport != :45678`.
    pub fn query_args(query: &ConnectionQuery) -> Vec<String> {
        let mut args: Vec<String> = ["-t", "-i", "-n", "state", "established", "dst"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(filter_addr(&query.destination));
        if let Some(port) = query.destination.port {
            args.extend(["dport".into(), "=".into(), format!(":{port}")]);
        }
        if let Some(port) = query.exclude_local_port {
            args.extend(["sport".into(), "!=".into(), format!(":{port}")]);
        }
        args
    }
}

fn filter_addr(destination: &Destination) -> String {
    match destination.addr {
        IpAddr::V4(addr) => addr.to_string(),
        IpAddr::V6(addr) => format!("[{addr}]"),
    }
}

impl SampleSource for SsSource {
    async fn established(
        &mut self,
        query: &ConnectionQuery,
    ) -> Result<Vec<Connection>, SourceError> {
        let args = Self::query_args(query);
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let connections = parse_ss_output(&String::from_utf8_lossy(&output.stdout));
        debug!("{command} -> {} connection(s)", connections.len());
        Ok(connections)
    }
}

/// Parse `ss -tin` output into connections, preserving listing order.
///
/// Socket lines start in column 0 and carry the local address as the first
/// `addr:port` token. The indented line that follows carries the TCP info,
/// including `cwnd:<segments>`.
pub fn parse_ss_output(output: &str) -> Vec<Connection> {
    let mut connections: Vec<Connection> = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let Some(last) = connections.last_mut()
                && last.cwnd.is_none()
            {
                last.cwnd = line
                    .split_whitespace()
                    .find_map(|token| token.strip_prefix("cwnd:"))
                    .and_then(|v| v.parse().ok());
            }
            continue;
        }

        if let Some(local_port) = line.split_whitespace().find_map(socket_port) {
            connections.push(Connection {
                local_port,
                cwnd: None,
            });
        }
    }
    connections
}

fn socket_port(token: &str) -> Option<u16> {
    let (addr, port) = token.rsplit_once(':')?;
    if addr.is_empty() {
        return None;
    }
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_DATA_FLOWS: &str = "\
Recv-Q Send-Q Local Address:Port  Peer Address:Port Process
0      0          10.0.0.1:45670     10.0.0.3:5201
\t cubic wscale:9,9 rto:204 rtt:0.12/0.06 mss:1448 cwnd:10 bytes_sent:145
0      412632     10.0.0.1:45672     10.0.0.3:5201
\t cubic wscale:9,9 rto:308 rtt:104.2/0.9 mss:1448 cwnd:87 ssthresh:62 bytes_sent:912345
0      380000     10.0.0.1:45674     10.0.0.3:5201
\t cubic wscale:9,9 rto:308 rtt:103.9/1.1 mss:1448 cwnd:64 ssthresh:60
";

    #[test]
    fn parses_connections_in_listing_order() {
        let conns = parse_ss_output(TWO_DATA_FLOWS);
        assert_eq!(
            conns,
            vec![
                Connection {
                    local_port: 45670,
                    cwnd: Some(10)
                },
                Connection {
                    local_port: 45672,
                    cwnd: Some(87)
                },
                Connection {
                    local_port: 45674,
                    cwnd: Some(64)
                },
            ]
        );
    }

    #[test]
    fn socket_without_info_has_no_cwnd() {
        let out = "Recv-Q Send-Q Local Address:Port Peer Address:Port\n\
                   0 0 [::ffff:10.0.0.1]:40000 [::ffff:10.0.0.3]:5201\n";
        let conns = parse_ss_output(out);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].local_port, 40000);
        assert_eq!(conns[0].cwnd, None);
    }

    #[test]
    fn empty_listing() {
        assert!(parse_ss_output("Recv-Q Send-Q Local Address:Port Peer Address:Port\n").is_empty());
        assert!(parse_ss_output("").is_empty());
    }

    #[test]
    fn query_args_carry_filters() {
        let dest: Destination = "10.0.0.3:5201".parse().unwrap();
        let args = SsSource::query_args(&ConnectionQuery::excluding(dest, 45670));
        assert_eq!(
            args.join(" "),
            "-t -i -n state established dst 10.0.0.3 dport = :5201 sport != :45670"
        );

        let dest: Destination = "10.0.0.3".parse().unwrap();
        let args = SsSource::query_args(&ConnectionQuery::all(dest));
        assert_eq!(args.join(" "), "-t -i -n state established dst 10.0.0.3");
    }
}
