use crate::error::ConfigError;

/// Finds the address the process should advertise as its own, the way the
/// original router does at startup: the first non-loopback IPv4 address
/// among the host's network interfaces. There is no fallback — a host with
/// no such interface cannot usefully register itself with the store, so
/// this is surfaced as a fatal configuration error rather than silently
/// defaulting to a loopback address.
pub fn probe_local_ip() -> Result<String, ConfigError> {
    let interfaces = if_addrs::get_if_addrs().map_err(ConfigError::LocalIpProbe)?;
    interfaces
        .into_iter()
        .find(|iface| !iface.is_loopback() && iface.ip().is_ipv4())
        .map(|iface| iface.ip().to_string())
        .ok_or(ConfigError::NoLocalIp)
}
