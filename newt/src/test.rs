#![allow(dead_code)]

use core::cell::Cell;
use std::sync::{Arc, Mutex};

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use newt_msg::{Message, TryFromBytes, TryIntoBytes};
use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::net::{Addrd, Socket};
use crate::platform::Alloc;

/// Build a message literal for tests:
/// `msg!(CON GET x.x.x.x:1111)`, `msg!(ACK {2 . 05} x.x.x.x:80)`, ..
#[macro_export]
macro_rules! msg {
  (CON GET x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 01} x.x.x.x:$port) };
  (CON PUT x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 03} x.x.x.x:$port) };
  (CON POST x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 02} x.x.x.x:$port) };
  (CON DELETE x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 04} x.x.x.x:$port) };
  (NON GET x.x.x.x:$port:literal) => { $crate::test::msg!(NON {0 . 01} x.x.x.x:$port) };

  (CON {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Con} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};
  (NON {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Non} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};
  (ACK {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Ack} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};
  (ACK EMPTY x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Ack} {newt_msg::Code::new(0, 0)} x.x.x.x:$port)
  }};

  ({$ty:expr} {$code:expr} x.x.x.x:$port:literal) => {{
    use no_std_net::*;
    use $crate::net::Addrd;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), $port));

    Addrd(newt_msg::Message::new($ty,
                                 $code,
                                 newt_msg::Id(0),
                                 newt_msg::Token::default()),
          addr)
  }};
}

pub(crate) use msg;

/// Platform implementor using mocks for clock and sock
pub(crate) type Platform = Alloc<ClockMock, SockMock>;
pub(crate) type Core = crate::core::Core<Platform>;

pub(crate) fn dummy_addr() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 8080))
}

pub(crate) fn dummy_addr_2() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 8080))
}

/// A clock that only moves when the test says so; one tick is one
/// millisecond.
#[derive(Debug, Default)]
pub(crate) struct ClockMock(pub Cell<u64>);

impl ClockMock {
  pub fn new() -> Self {
    Self(Cell::new(0))
  }

  pub fn set_millis(&self, to: u64) {
    self.0.set(to);
  }

  pub fn advance_millis(&self, by: u64) {
    self.0.set(self.0.get() + by);
  }

  pub fn instant(n: u64) -> Instant<Self> {
    Instant::new(n)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

/// A mocked socket
#[derive(Debug, Default)]
pub(crate) struct SockMock {
  /// Inbound bytes from remote sockets. Address represents the sender
  pub rx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
  /// Outbound bytes to remote sockets. Address represents the destination
  pub tx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
}

impl SockMock {
  pub fn new() -> Self {
    Self { rx: Default::default(),
           tx: Default::default() }
  }

  /// Make `msg` arrive at the endpoint under test, as if `addr` had
  /// sent it
  pub fn inject(rx: &Arc<Mutex<Vec<Addrd<Vec<u8>>>>>, msg: Addrd<Message>) {
    rx.lock()
      .unwrap()
      .push(msg.map(|msg| msg.try_into_bytes().unwrap()));
  }

  /// All frames the endpoint under test has sent so far, oldest
  /// first, decoded
  pub fn sent(tx: &Arc<Mutex<Vec<Addrd<Vec<u8>>>>>) -> Vec<Addrd<Message>> {
    tx.lock()
      .unwrap()
      .iter()
      .map(|Addrd(bytes, addr)| Addrd(Message::try_from_bytes(bytes).unwrap(), *addr))
      .collect()
  }

  /// All raw frames the endpoint under test has sent so far
  pub fn sent_bytes(tx: &Arc<Mutex<Vec<Addrd<Vec<u8>>>>>) -> Vec<Addrd<Vec<u8>>> {
    tx.lock().unwrap().clone()
  }
}

impl Socket for SockMock {
  type Error = Option<()>;

  fn bind_raw<A: no_std_net::ToSocketAddrs>(_: A) -> Result<Self, Self::Error> {
    Ok(Self::new())
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut rx = self.rx.lock().unwrap();

    if rx.is_empty() {
      return Err(nb::Error::WouldBlock);
    }

    let dgram = rx.remove(0);

    dgram.data()
         .iter()
         .enumerate()
         .for_each(|(ix, byte)| buf[ix] = *byte);

    Ok(dgram.map(|bytes| bytes.len()))
  }

  fn send(&self, buf: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    let mut tx = self.tx.lock().unwrap();
    tx.push(buf.map(Vec::from));
    Ok(())
  }

  fn join_multicast(&self, _: no_std_net::IpAddr) -> Result<(), Self::Error> {
    Ok(())
  }
}
