//! Pod CIDR splitting

use ipnet::IpNet;

use crate::error::{Error, Result};

/// A pod CIDR list split by address family
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitCidrs {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

impl SplitCidrs {
    pub fn is_dual_stack(&self) -> bool {
        self.ipv4.is_some() && self.ipv6.is_some()
    }

    pub fn is_ipv6_only(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_some()
    }
}

/// Classify a comma-joined list of one or two CIDRs as IPv4 and/or IPv6.
///
/// At most one CIDR per family is accepted.
pub fn split_cidrs(cidrs: &str) -> Result<SplitCidrs> {
    let entries: Vec<&str> = cidrs
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();

    if entries.is_empty() || entries.len() > 2 {
        return Err(Error::InvalidCidr(cidrs.to_string()));
    }

    let mut split = SplitCidrs::default();
    for entry in entries {
        let net: IpNet = entry
            .parse()
            .map_err(|_| Error::InvalidCidr(entry.to_string()))?;
        let slot = match net {
            IpNet::V4(_) => &mut split.ipv4,
            IpNet::V6(_) => &mut split.ipv6,
        };
        if slot.is_some() {
            return Err(Error::InvalidCidr(cidrs.to_string()));
        }
        *slot = Some(entry.to_string());
    }

    Ok(split)
}
