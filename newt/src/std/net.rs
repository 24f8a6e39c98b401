use std::io;
use std::net::UdpSocket;

use crate::net::{Addrd, Socket};

pub(crate) mod convert {
  //! no_std_net and std::net describe the same bytes with different
  //! types; these map between them.

  pub(crate) fn no_std_to_std(addr: no_std_net::SocketAddr) -> std::net::SocketAddr {
    use no_std_net::SocketAddr::*;

    match addr {
      | V4(v4) => {
        let [a, b, c, d] = v4.ip().octets();
        std::net::SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::new(a, b, c, d),
                                                             v4.port()))
      },
      | V6(v6) => {
        let [a, b, c, d, e, f, g, h] = v6.ip().segments();
        std::net::SocketAddr::V6(std::net::SocketAddrV6::new(std::net::Ipv6Addr::new(a, b, c, d,
                                                                                     e, f, g, h),
                                                             v6.port(),
                                                             v6.flowinfo(),
                                                             v6.scope_id()))
      },
    }
  }

  pub(crate) fn std_to_no_std(addr: std::net::SocketAddr) -> no_std_net::SocketAddr {
    use std::net::SocketAddr::*;

    match addr {
      | V4(v4) => {
        let [a, b, c, d] = v4.ip().octets();
        no_std_net::SocketAddr::V4(no_std_net::SocketAddrV4::new(no_std_net::Ipv4Addr::new(a, b,
                                                                                           c, d),
                                                                 v4.port()))
      },
      | V6(v6) => {
        let [a, b, c, d, e, f, g, h] = v6.ip().segments();
        no_std_net::SocketAddr::V6(no_std_net::SocketAddrV6::new(no_std_net::Ipv6Addr::new(a, b,
                                                                                           c, d,
                                                                                           e, f,
                                                                                           g, h),
                                                                 v6.port(),
                                                                 v6.flowinfo(),
                                                                 v6.scope_id()))
      },
    }
  }
}

fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn bind_raw<A: no_std_net::ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let addrs = addr.to_socket_addrs()
                    .map_err(|_| io::Error::from(io::ErrorKind::AddrNotAvailable))?
                    .map(convert::no_std_to_std)
                    .collect::<Vec<_>>();

    UdpSocket::bind(&addrs[..]).and_then(|sock| {
                                 sock.set_nonblocking(true)?;
                                 Ok(sock)
                               })
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(msg.data(), convert::no_std_to_std(msg.addr()))
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, convert::std_to_no_std(addr)))
        .map_err(io_to_nb)
  }

  fn join_multicast(&self, addr: no_std_net::IpAddr) -> Result<(), Self::Error> {
    match addr {
      | no_std_net::IpAddr::V4(v4) => {
        let [a, b, c, d] = v4.octets();
        self.join_multicast_v4(&std::net::Ipv4Addr::new(a, b, c, d),
                               &std::net::Ipv4Addr::UNSPECIFIED)
      },
      | no_std_net::IpAddr::V6(v6) => {
        let [a, b, c, d, e, f, g, h] = v6.segments();
        self.join_multicast_v6(&std::net::Ipv6Addr::new(a, b, c, d, e, f, g, h), 0)
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn addr_conversion_round_trips() {
    let v4: no_std_net::SocketAddr = "1.2.3.4:5683".parse().unwrap();
    assert_eq!(convert::std_to_no_std(convert::no_std_to_std(v4)), v4);

    let v6: no_std_net::SocketAddr = "[::1]:5684".parse().unwrap();
    assert_eq!(convert::std_to_no_std(convert::no_std_to_std(v6)), v6);
  }
}
