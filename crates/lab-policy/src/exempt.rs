//! 限流豁免的 CIDR 匹配。
//!
//! 豁免名单接受 CIDR 块（`10.0.0.0/8`）或裸地址（按 /32、IPv6 按 /128
//! 处理）。匹配是纯位运算，不分配。

use std::net::IpAddr;

use crate::error::PolicyError;

#[derive(Clone, Copy, Debug)]
struct CidrBlock {
    network: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(network), IpAddr::V4(candidate)) => {
                let bits = u32::from(network);
                let other = u32::from(candidate);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                bits & mask == other & mask
            }
            (IpAddr::V6(network), IpAddr::V6(candidate)) => {
                let bits = u128::from(network);
                let other = u128::from(candidate);
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                bits & mask == other & mask
            }
            _ => false,
        }
    }
}

/// 预解析的豁免名单。
#[derive(Debug, Default)]
pub struct CidrMatcher {
    blocks: Vec<CidrBlock>,
}

impl CidrMatcher {
    /// 解析豁免条目；非法条目在启动阶段报错。
    pub fn new(entries: &[String]) -> Result<Self, PolicyError> {
        let mut blocks = Vec::with_capacity(entries.len());
        for entry in entries {
            blocks.push(parse_entry(entry)?);
        }
        Ok(Self { blocks })
    }

    /// 地址是否命中任一豁免块。
    pub fn matches(&self, ip: IpAddr) -> bool {
        self.blocks.iter().any(|block| block.contains(ip))
    }
}

fn parse_entry(entry: &str) -> Result<CidrBlock, PolicyError> {
    let invalid = || PolicyError::InvalidCidr {
        entry: entry.to_owned(),
    };

    match entry.split_once('/') {
        Some((address, prefix)) => {
            let network: IpAddr = address.parse().map_err(|_| invalid())?;
            let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
            let max_prefix = match network {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max_prefix {
                return Err(invalid());
            }
            Ok(CidrBlock { network, prefix })
        }
        None => {
            // 裸地址按单主机块处理。
            let network: IpAddr = entry.parse().map_err(|_| invalid())?;
            let prefix = match network {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Ok(CidrBlock { network, prefix })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().expect("ip literal")
    }

    #[test]
    fn cidr_block_matches_member_addresses() {
        let matcher = CidrMatcher::new(&["10.0.0.0/8".to_owned()]).expect("parse");
        assert!(matcher.matches(ip("10.1.2.3")));
        assert!(matcher.matches(ip("10.255.255.255")));
        assert!(!matcher.matches(ip("11.0.0.1")));
    }

    #[test]
    fn bare_address_matches_only_itself() {
        let matcher = CidrMatcher::new(&["192.168.1.1".to_owned()]).expect("parse");
        assert!(matcher.matches(ip("192.168.1.1")));
        assert!(!matcher.matches(ip("192.168.1.2")));
    }

    #[test]
    fn bare_ipv6_address_behaves_as_slash_128() {
        let matcher = CidrMatcher::new(&["::1".to_owned()]).expect("parse");
        assert!(matcher.matches(ip("::1")));
        assert!(!matcher.matches(ip("::2")));
    }

    #[test]
    fn families_never_cross_match() {
        let matcher = CidrMatcher::new(&["0.0.0.0/0".to_owned()]).expect("parse");
        assert!(matcher.matches(ip("8.8.8.8")));
        assert!(!matcher.matches(ip("::1")));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(CidrMatcher::new(&["not-an-ip".to_owned()]).is_err());
        assert!(CidrMatcher::new(&["10.0.0.0/33".to_owned()]).is_err());
        assert!(CidrMatcher::new(&["10.0.0.0/x".to_owned()]).is_err());
    }
}
