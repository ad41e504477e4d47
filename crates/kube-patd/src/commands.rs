//! Rule and shell command builders for the packet filter

use kube_pat_common::shell;
use kube_pat_common::ForwardingEntry;

/// Build the masquerade rule for egress traffic
///
/// `-o <interface> -j MASQUERADE`
pub fn build_masquerade_rule(interface: &str) -> Vec<String> {
    vec![
        "-o".to_string(),
        interface.to_string(),
        "-j".to_string(),
        "MASQUERADE".to_string(),
    ]
}

/// Build the DNAT rule redirecting an external port to a service
///
/// `-p <proto> -i <interface> --dport <port> -j DNAT --to-destination <addr>:<port>`
pub fn build_dnat_rule(entry: &ForwardingEntry, interface: &str) -> Vec<String> {
    vec![
        "-p".to_string(),
        entry.protocol.iptables_name().to_string(),
        "-i".to_string(),
        interface.to_string(),
        "--dport".to_string(),
        entry.src_port.to_string(),
        "-j".to_string(),
        "DNAT".to_string(),
        "--to-destination".to_string(),
        entry.destination(),
    ]
}

/// Build an iptables invocation: `<bin> -t <table> <action> <chain> <args...>`
///
/// Every argument is shell-quoted.
pub fn build_iptables_cmd(
    binary: &str,
    table: &str,
    action: &str,
    chain: &str,
    rule: &[String],
) -> String {
    let mut cmd = format!(
        "{} -w -t {} {} {}",
        binary,
        shell::shellquote(table),
        action,
        shell::shellquote(chain)
    );
    for arg in rule {
        cmd.push(' ');
        cmd.push_str(&shell::shellquote(arg));
    }
    cmd
}

/// Build the command appending a rule to a chain
pub fn build_append_cmd(binary: &str, table: &str, chain: &str, rule: &[String]) -> String {
    build_iptables_cmd(binary, table, "-A", chain, rule)
}

/// Build the command checking whether a rule exists in a chain
pub fn build_check_cmd(binary: &str, table: &str, chain: &str, rule: &[String]) -> String {
    build_iptables_cmd(binary, table, "-C", chain, rule)
}

/// Build the command flushing a chain
pub fn build_flush_cmd(binary: &str, table: &str, chain: &str) -> String {
    build_iptables_cmd(binary, table, "-F", chain, &[])
}

/// Build the command listing a chain in rule-spec format
pub fn build_list_cmd(binary: &str, table: &str, chain: &str) -> String {
    build_iptables_cmd(binary, table, "-S", chain, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_pat_common::{ObjectKey, Protocol};

    fn entry() -> ForwardingEntry {
        ForwardingEntry {
            protocol: Protocol::Udp,
            src_port: 53,
            dest_ip: "10.96.0.10".parse().unwrap(),
            dest_port: 5353,
            spec: ObjectKey::new("default", "dns"),
            service: ObjectKey::new("default", "coredns"),
        }
    }

    #[test]
    fn test_build_masquerade_rule() {
        assert_eq!(
            build_masquerade_rule("eth0").join(" "),
            "-o eth0 -j MASQUERADE"
        );
    }

    #[test]
    fn test_build_dnat_rule() {
        assert_eq!(
            build_dnat_rule(&entry(), "eth0").join(" "),
            "-p udp -i eth0 --dport 53 -j DNAT --to-destination 10.96.0.10:5353"
        );
    }

    #[test]
    fn test_build_append_cmd() {
        let cmd = build_append_cmd(
            "/sbin/iptables",
            "nat",
            "PREROUTING",
            &build_dnat_rule(&entry(), "eth0"),
        );
        assert!(cmd.starts_with("/sbin/iptables -w -t \"nat\" -A \"PREROUTING\""));
        assert!(cmd.contains("\"--dport\" \"53\""));
        assert!(cmd.ends_with("\"10.96.0.10:5353\""));
    }

    #[test]
    fn test_build_check_flush_list_cmd() {
        let rule = build_masquerade_rule("eth0");
        assert!(build_check_cmd("iptables", "nat", "POSTROUTING", &rule)
            .contains("-C \"POSTROUTING\" \"-o\" \"eth0\""));
        assert_eq!(
            build_flush_cmd("iptables", "nat", "PREROUTING"),
            "iptables -w -t \"nat\" -F \"PREROUTING\""
        );
        assert_eq!(
            build_list_cmd("iptables", "nat", "PREROUTING"),
            "iptables -w -t \"nat\" -S \"PREROUTING\""
        );
    }

    #[test]
    fn test_shellquote_safety() {
        let cmd = build_append_cmd(
            "iptables",
            "nat",
            "PREROUTING",
            &build_masquerade_rule("eth0; rm -rf /"),
        );
        assert!(cmd.contains("\"eth0; rm -rf /\""));
    }
}
