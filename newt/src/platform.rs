use core::fmt::Debug;
use core::marker::PhantomData;

use crate::net::Socket;
use crate::time::Clock;

/// The two capabilities the runtime borrows from its environment:
/// a clock and a datagram socket.
///
/// Everything else (collections, codec buffers) is concrete; this
/// trait exists so that tests can substitute a mock clock and socket
/// and so embedders can bring their own network stack.
pub trait Platform: Sized + 'static {
  /// What should we use to keep track of time?
  type Clock: Clock;

  /// What should we use for networking?
  type Socket: Socket;
}

/// [`Platform`] implementor parameterized by clock and socket types.
///
/// ```
/// use newt::platform::Std;
/// use newt::req::Req;
///
/// Req::get("192.168.0.1:5683".parse().unwrap(), "hello");
/// # let _ = core::marker::PhantomData::<Std>;
/// ```
#[derive(Copy)]
pub struct Alloc<Clk, Sock>(PhantomData<(Clk, Sock)>)
  where Clk: Clock + 'static,
        Sock: Socket + 'static;

impl<Clk: Clock + 'static, Sock: Socket + 'static> Debug for Alloc<Clk, Sock> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "Alloc::<_, _>(_)")
  }
}

impl<Clk: Clock + 'static, Sock: Socket + 'static> Clone for Alloc<Clk, Sock> {
  fn clone(&self) -> Self {
    Self(PhantomData)
  }
}

impl<Clk: Clock + 'static, Sock: Socket + 'static> Platform for Alloc<Clk, Sock> {
  type Clock = Clk;
  type Socket = Sock;
}

/// [`Platform`] backed by [`std::net::UdpSocket`] and the system clock
pub type Std = Alloc<crate::std::Clock, std::net::UdpSocket>;
