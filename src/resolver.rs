//! SRV hostname rewriting.
//!
//! Minecraft servers advertise their real host behind a
//! `_minecraft._tcp.<domain>` SRV record. Literal IP addresses bypass the
//! lookup, and a failed lookup falls back to the name that was given.

use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use log::debug;

const SRV_SERVICE: &str = "_minecraft._tcp";

/// Rewrite `host` to its SRV target, when one exists.
pub async fn resolve_srv(host: &str) -> String {
    if host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    match resolver.srv_lookup(format!("{SRV_SERVICE}.{host}.")).await {
        Ok(lookup) => match lookup.iter().next() {
            Some(record) => {
                let target = record.target().to_utf8();
                let target = target.trim_end_matches('.').to_string();
                debug!("resolved {host} to srv target {target}");
                target
            }
            None => host.to_string(),
        },
        Err(err) => {
            debug!("srv lookup for {host} failed: {err}");
            host.to_string()
        }
    }
}
