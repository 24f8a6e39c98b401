use newt_msg::known::observe::Action;

use crate::config::Config;
use crate::core::{Core, Error, TokenHandle, What};
use crate::net::Addrd;
use crate::platform::{Platform, Std};
use crate::req::Req;
use crate::resp::Resp;

/// A blocking CoAP request client.
///
/// Thin veneer over [`Core`]: `send_request` hands out a
/// [`TokenHandle`], `wait` spins the poll loop until the exchange
/// settles. Dropping a handle without waiting cancels its exchange.
#[allow(missing_debug_implementations)]
pub struct Client<P: Platform> {
  core: Core<P>,
}

/// An observe relation from the client's point of view: a lazy
/// sequence of update notifications.
///
/// Consume it with [`Client::await_notification`]; end it with
/// [`Client::stop_observing`] (which deregisters at the server) or by
/// dropping it (which forgets the relation locally and lets the
/// server find out from the RST its next notification gets).
#[allow(missing_debug_implementations)]
pub struct Observation {
  handle: TokenHandle,
  req: Addrd<Req>,
}

impl Observation {
  /// The handle of the underlying exchange
  pub fn handle(&self) -> &TokenHandle {
    &self.handle
  }
}

impl Client<Std> {
  /// Create a new client bound to `0.0.0.0:{port}`
  pub fn new_std(port: u16) -> std::io::Result<Self> {
    Self::new_std_config(port, Config::default())
  }

  /// Create a new std client with a specific runtime config
  pub fn new_std_config(port: u16, config: Config) -> std::io::Result<Self> {
    let clock = crate::std::Clock::new();
    let sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    sock.set_nonblocking(true)?;
    Ok(Self::new_config(config, clock, sock))
  }
}

impl<P: Platform> Client<P> {
  /// Create a new request client
  pub fn new(clock: P::Clock, sock: P::Socket) -> Self {
    Self { core: Core::new(clock, sock) }
  }

  /// Create a new request client with a specific runtime config
  pub fn new_config(config: Config, clock: P::Clock, sock: P::Socket) -> Self {
    Self { core: Core::new_config(config, clock, sock) }
  }

  /// Send a request, getting back a handle to wait on.
  ///
  /// The returned future-shaped thing completes through
  /// [`Client::wait`]; dropping it instead cancels the exchange.
  pub fn send_request(&mut self, req: Req) -> Result<TokenHandle, Error<P>> {
    self.core.send_req(req)
  }

  /// Send a request to an explicit destination address (for requests
  /// built with [`Req::from_uri`], which elides the Uri-Host option)
  pub fn send_addrd_request(&mut self, req: Addrd<Req>) -> Result<TokenHandle, Error<P>> {
    self.core.send_addrd_req(req)
  }

  /// Block until the exchange behind `handle` produces a response or
  /// fails
  pub fn wait(&mut self, handle: &TokenHandle) -> Result<Resp, Error<P>> {
    nb::block!(self.core.poll_resp(handle.token(), handle.addr()))
  }

  /// Send a request and block until its response arrives
  pub fn send(&mut self, req: Req) -> Result<Resp, Error<P>> {
    let handle = self.send_request(req)?;
    self.wait(&handle)
  }

  /// Register as an observer of the resource `req` targets.
  ///
  /// The first notification delivered is the registration response
  /// itself.
  pub fn observe(&mut self, mut req: Addrd<Req>) -> Result<Observation, Error<P>> {
    req.as_mut().set_observe(Action::Register);

    let handle = self.core.send_addrd_req(req.clone())?;
    Ok(Observation { handle, req })
  }

  /// Poll for the next update notification of an observation
  pub fn poll_notification(&mut self, obs: &Observation) -> nb::Result<Resp, Error<P>> {
    self.core
        .poll_resp(obs.handle.token(), obs.handle.addr())
  }

  /// Block until the next update notification of an observation
  /// arrives
  pub fn await_notification(&mut self, obs: &Observation) -> Result<Resp, Error<P>> {
    nb::block!(self.poll_notification(obs))
  }

  /// End an observation politely: a GET with Observe=1 and the
  /// relation's token tells the server to forget us, and its response
  /// is returned.
  pub fn stop_observing(&mut self, obs: Observation) -> Result<Resp, Error<P>> {
    let Observation { handle, mut req } = obs;

    req.as_mut().set_observe(Action::Deregister);
    req.as_mut().id = None;
    req.as_mut().token = Some(handle.token());

    // replaces the observation's exchange with a plain one awaiting
    // the deregistration response
    let dereg = self.core.send_addrd_req(req)?;
    let resp = self.wait(&dereg);

    // the observation exchange is gone; the old handle's cancellation
    // has nothing left to do
    drop(handle);

    resp
  }

  /// Check an endpoint for liveness, blocking until it pongs (or
  /// every retransmission of the ping goes unanswered).
  pub fn ping(&mut self, host: impl AsRef<str>, port: u16) -> Result<(), Error<P>> {
    let (id, addr) = self.core.ping(host, port)?;
    nb::block!(self.core.poll_ping(id, addr))
  }

  /// Consider a timed-out request Ok(None).
  ///
  /// Usually used for non-confirmable requests that the server may
  /// have received but chosen not to answer.
  pub fn timeout_ok(result: Result<Resp, Error<P>>) -> Result<Option<Resp>, Error<P>> {
    match result {
      | Ok(resp) => Ok(Some(resp)),
      | Err(Error { what: What::Timeout, .. }) => Ok(None),
      | Err(e) => Err(e),
    }
  }

  /// Borrow the underlying runtime
  pub fn core(&mut self) -> &mut Core<P> {
    &mut self.core
  }

  /// Stop being a client: cancel in-flight exchanges and drop the
  /// socket
  pub fn shutdown(self) -> Result<(), Error<P>> {
    self.core.shutdown()
  }
}
