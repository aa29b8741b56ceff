//! Network primitives shared by the inbound and outbound layers.

mod addr;
mod buffered;
mod codec;
mod relay;

pub use addr::{HostAddr, TargetAddr};
pub use buffered::BufferedStream;
pub use codec::{
    decode_address, encode_reply, encode_target, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, MAX_ADDR_LEN,
    SOCKS5_VERSION,
};
pub use relay::relay;

use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe alias for the stream types the proxy shuffles around.
///
/// Any async byte stream qualifies; handlers take `dyn StreamDyn` where
/// they must not be generic (authenticator registry, boxed upstreams).
pub trait StreamDyn: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> StreamDyn for T {}
