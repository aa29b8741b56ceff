//! SOCKS address codec.
//!
//! Decoding reads an address-type byte, the address body and a big-endian
//! port. Encoding is the inverse and always chooses the narrowest type
//! that fits: IPv4 if the address fits four bytes, then IPv6, then FQDN.

use crate::error::{ProxyError, SocksError};
use crate::net::addr::{HostAddr, TargetAddr};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// SOCKS5 protocol version byte
pub const SOCKS5_VERSION: u8 = 0x05;

/// Address type: IPv4, four raw bytes
pub const ATYP_IPV4: u8 = 0x01;
/// Address type: domain name, one length byte then that many bytes
pub const ATYP_DOMAIN: u8 = 0x03;
/// Address type: IPv6, sixteen raw bytes
pub const ATYP_IPV6: u8 = 0x04;

/// Maximum size of a SOCKS address on the wire:
/// 1 type + 1 length + 255 data + 2 port
pub const MAX_ADDR_LEN: usize = 1 + 1 + 255 + 2;

/// Decode an address field: type byte, body, then 2-byte port.
///
/// An unknown address type fails with
/// [`SocksError::AddressTypeNotSupported`], which the caller is expected
/// to answer with reply code 0x08 before closing.
pub async fn decode_address<R>(r: &mut R) -> Result<TargetAddr, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let atyp = r.read_u8().await?;

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            r.read_exact(&mut octets).await?;
            HostAddr::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            r.read_exact(&mut octets).await?;
            HostAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        ATYP_DOMAIN => {
            let len = r.read_u8().await? as usize;
            if len == 0 {
                return Err(SocksError::InvalidAddress("empty domain name".into()).into());
            }
            let mut name = vec![0u8; len];
            r.read_exact(&mut name).await?;
            let name = String::from_utf8(name)
                .map_err(|_| SocksError::InvalidAddress("domain is not valid UTF-8".into()))?;
            HostAddr::Domain(name)
        }
        other => return Err(SocksError::AddressTypeNotSupported(other).into()),
    };

    let port = r.read_u16().await?;

    Ok(TargetAddr {
        host,
        resolved: None,
        port,
    })
}

/// Encode an address as `ATYP | BODY | PORT`, choosing the narrowest
/// representation. Used for client-side CONNECT requests.
pub fn encode_target(addr: &TargetAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_ADDR_LEN);
    push_address(&mut out, Some(addr));
    out
}

/// Encode a full SOCKS5 reply: `VER | REP | RSV | ATYP | BND.ADDR | BND.PORT`.
///
/// A missing bind address encodes as IPv4 0.0.0.0:0.
pub fn encode_reply(code: u8, bind: Option<&TargetAddr>) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + MAX_ADDR_LEN);
    out.push(SOCKS5_VERSION);
    out.push(code);
    out.push(0x00);
    push_address(&mut out, bind);
    out
}

fn push_address(out: &mut Vec<u8>, addr: Option<&TargetAddr>) {
    match addr {
        None => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&[0, 0, 0, 0]);
            out.extend_from_slice(&0u16.to_be_bytes());
        }
        Some(addr) => {
            match addr.ip_addr() {
                // to_canonical folds IPv4-mapped IPv6 down to four bytes
                Some(ip) => match ip.to_canonical() {
                    IpAddr::V4(v4) => {
                        out.push(ATYP_IPV4);
                        out.extend_from_slice(&v4.octets());
                    }
                    IpAddr::V6(v6) => {
                        out.push(ATYP_IPV6);
                        out.extend_from_slice(&v6.octets());
                    }
                },
                None => match &addr.host {
                    HostAddr::Domain(d) => {
                        out.push(ATYP_DOMAIN);
                        out.push(d.len() as u8);
                        out.extend_from_slice(d.as_bytes());
                    }
                    HostAddr::Ip(_) => unreachable!(),
                },
            }
            out.extend_from_slice(&addr.port.to_be_bytes());
        }
    }
}
