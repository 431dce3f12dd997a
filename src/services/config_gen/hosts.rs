//! lmhosts generation

use chrono::{DateTime, Utc};

use crate::domain::share::{HostAlias, Settings};

use super::header;

/// Render lmhosts: the server itself first, then one `IP name` line per alias.
pub fn generate(settings: &Settings, hosts: &[HostAlias], now: DateTime<Utc>) -> String {
    let mut out = header("Host aliases", now);
    out.push_str(&format!("{} {}\n", settings.server_address, settings.server_name));
    for host in hosts {
        out.push_str(&format!("{} {}\n", host.address, host.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_server_line_first() {
        let hosts = vec![
            HostAlias {
                name: "printer".to_string(),
                address: Ipv4Addr::new(192, 168, 1, 20),
            },
            HostAlias {
                name: "router".to_string(),
                address: Ipv4Addr::new(192, 168, 1, 1),
            },
        ];
        let text = generate(&Settings::default(), &hosts, Utc::now());
        let body: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();

        assert_eq!(
            body,
            vec!["192.168.1.10 hda", "192.168.1.20 printer", "192.168.1.1 router"]
        );
    }
}
