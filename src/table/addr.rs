//! Address arithmetic shared by the prefix and range tables.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};

use crate::error::{PoolError, Result};

/// Bit width of the address family.
pub fn width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Numeric value of an address.
pub fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Address of the given family with numeric value `value`.
///
/// IPv4 values are truncated to 32 bits.
pub fn from_u128(value: u128, v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

/// Full-length host prefix of `addr` (`/32` or `/128`).
pub fn host_prefix(addr: IpAddr) -> IpNet {
    IpNet::from(addr)
}

/// First and last address of `net` as numbers.
pub fn span(net: &IpNet) -> (u128, u128) {
    (to_u128(net.network()), to_u128(net.broadcast()))
}

/// True when `net` is a full-length host prefix.
pub fn is_host(net: &IpNet) -> bool {
    net.prefix_len() == net.max_prefix_len()
}

/// Parses an address range `start-end` (same family, `start <= end`).
pub fn parse_ip_range(raw: &str) -> Result<(IpAddr, IpAddr)> {
    let bad = || PoolError::invalid("range", format!("{raw:?} is not a start-end address range"));
    let (start, end) = raw.trim().split_once('-').ok_or_else(bad)?;
    let start: IpAddr = start.trim().parse().map_err(|_| bad())?;
    let end: IpAddr = end.trim().parse().map_err(|_| bad())?;
    if start.is_ipv4() != end.is_ipv4() {
        return Err(PoolError::invalid(
            "range",
            format!("{raw:?} mixes address families"),
        ));
    }
    if to_u128(start) > to_u128(end) {
        return Err(PoolError::invalid(
            "range",
            format!("{raw:?} starts after it ends"),
        ));
    }
    Ok((start, end))
}

/// Canonical `start-end` rendering of a range.
pub fn format_range(start: IpAddr, end: IpAddr) -> String {
    format!("{start}-{end}")
}

/// Minimal set of prefixes covering `[start, end]`, in ascending order.
pub fn range_to_cidrs(start: IpAddr, end: IpAddr) -> Vec<IpNet> {
    match (start, end) {
        (IpAddr::V4(start), IpAddr::V4(end)) => {
            Ipv4Subnets::new(start, end, 0).map(IpNet::V4).collect()
        }
        (IpAddr::V6(start), IpAddr::V6(end)) => {
            Ipv6Subnets::new(start, end, 0).map(IpNet::V6).collect()
        }
        _ => Vec::new(),
    }
}

/// Lowest `size`-aligned block of `size` values inside `[lo, hi]` that does not
/// intersect any of the `taken` spans.
///
/// `taken` must be sorted by start; spans may nest. `size` must be a power of two.
pub fn first_fit<I>(lo: u128, hi: u128, size: u128, taken: I) -> Option<u128>
where
    I: IntoIterator<Item = (u128, u128)>,
{
    if size == 0 || lo > hi {
        return None;
    }
    let mut candidate = align_up(lo, size)?;
    for (start, end) in taken {
        if end < candidate {
            continue;
        }
        let last = candidate.checked_add(size - 1)?;
        if last < start {
            break;
        }
        candidate = align_up(end.checked_add(1)?, size)?;
    }
    let last = candidate.checked_add(size - 1)?;
    (last <= hi).then_some(candidate)
}

fn align_up(value: u128, size: u128) -> Option<u128> {
    let mask = size - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
