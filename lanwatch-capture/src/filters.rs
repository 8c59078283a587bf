//! BPF (Berkeley Packet Filter) filter builders

/// All ARP packets
pub fn arp_filter() -> String {
    "arp".to_string()
}

/// DNS over UDP, either direction
pub fn dns_filter() -> String {
    "udp port 53".to_string()
}

/// TCP segments with SYN set and ACK clear, to any of `ports`
pub fn tcp_syn_filter(ports: &[u16]) -> String {
    let syn_only = "tcp[tcpflags] & (tcp-syn|tcp-ack) == tcp-syn";
    if ports.is_empty() {
        return syn_only.to_string();
    }

    let ports = ports
        .iter()
        .map(|p| format!("dst port {}", p))
        .collect::<Vec<_>>()
        .join(" or ");
    format!("{} and ({})", syn_only, ports)
}

/// Everything the monitor pipeline decodes
pub fn monitor_filter(watched_ports: &[u16]) -> String {
    combine_filters_or(&[&arp_filter(), &dns_filter(), &tcp_syn_filter(watched_ports)])
}

/// [`monitor_filter`] minus frames sent from `own_mac`
pub fn monitor_filter_excluding(watched_ports: &[u16], own_mac: &str) -> String {
    combine_filters(&[
        &monitor_filter(watched_ports),
        &not_filter(&src_mac_filter(own_mac)),
    ])
}

/// Filter for specific source MAC address
pub fn src_mac_filter(mac: &str) -> String {
    format!("ether src {}", mac)
}

/// Combine multiple filters with AND logic
pub fn combine_filters(filters: &[&str]) -> String {
    join(filters, " and ")
}

/// Combine multiple filters with OR logic
pub fn combine_filters_or(filters: &[&str]) -> String {
    join(filters, " or ")
}

fn join(filters: &[&str], op: &str) -> String {
    filters
        .iter()
        .map(|f| format!("({})", f))
        .collect::<Vec<_>>()
        .join(op)
}

/// Negate a filter
pub fn not_filter(filter: &str) -> String {
    format!("not ({})", filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_filters() {
        assert_eq!(arp_filter(), "arp");
        assert_eq!(dns_filter(), "udp port 53");
        assert_eq!(src_mac_filter("aa:bb:cc:dd:ee:ff"), "ether src aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_tcp_syn_filter() {
        assert_eq!(
            tcp_syn_filter(&[80, 443]),
            "tcp[tcpflags] & (tcp-syn|tcp-ack) == tcp-syn and (dst port 80 or dst port 443)"
        );
        assert_eq!(
            tcp_syn_filter(&[]),
            "tcp[tcpflags] & (tcp-syn|tcp-ack) == tcp-syn"
        );
    }

    #[test]
    fn test_monitor_filter() {
        let filter = monitor_filter(&[80, 443]);
        assert!(filter.starts_with("(arp) or (udp port 53) or ("));
        assert!(filter.contains("dst port 443"));

        let filter = monitor_filter_excluding(&[80], "02:00:00:00:00:01");
        assert!(filter.ends_with(") and (not (ether src 02:00:00:00:00:01))"));
    }

    #[test]
    fn test_combine_filters() {
        assert_eq!(combine_filters(&["tcp", "port 80"]), "(tcp) and (port 80)");
        assert_eq!(combine_filters(&[]), "");
        assert_eq!(not_filter("port 22"), "not (port 22)");
    }
}
