//! Parsers for the text formats the platform discovery backends read.

// Each platform backend uses a subset of these.
#![allow(dead_code)]

const TCP_LISTEN: &str = "0A";

/// Socket inodes of sockets in LISTEN state bound to `port`, from the
/// contents of `/proc/net/tcp` or `/proc/net/tcp6`.
pub(crate) fn listening_inodes(proc_net_tcp: &str, port: u16) -> Vec<u64> {
    let port_hex = format!("{:04X}", port);
    proc_net_tcp
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let local_port = fields[1].rsplit(':').next()?;
            if !local_port.eq_ignore_ascii_case(&port_hex) {
                return None;
            }
            fields[9].parse::<u64>().ok().filter(|inode| *inode != 0)
        })
        .collect()
}

/// Inode referenced by an fd symlink target such as `socket:[12345]`.
pub(crate) fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Pids from `lsof -t` output, one per line.
pub(crate) fn lsof_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Pids listening on `port` according to `netstat -ano` output.
pub(crate) fn netstat_pids(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 || !fields[0].eq_ignore_ascii_case("TCP") {
                return None;
            }
            if !fields[3].eq_ignore_ascii_case("LISTENING") || !fields[1].ends_with(&suffix) {
                return None;
            }
            fields[4].parse::<u32>().ok().filter(|pid| *pid != 0)
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
