use newt_msg::known::observe::Action;
use newt_msg::known::ContentFormat;
use newt_msg::Type;

use crate::config::Config;
use crate::core::{Core, Error};
use crate::net::Addrd;
use crate::platform::{Platform, Std};
use crate::req::Req;
use crate::resp::{code, Resp};

/// A resource a [`Server`] serves.
///
/// Services are *polled* for their response rather than called once:
/// returning `None` from [`Service::poll`] means "still working",
/// which is what lets the runtime send the empty ACK and turn the
/// eventual answer into a separate response when a service is slow.
/// A fast service just returns `Some` on the first poll and the
/// response rides piggy-backed on the ACK.
pub trait Service<P: Platform> {
  /// The Uri-Path this service answers for, without leading `/`
  /// (e.g. `"path/to/service"`)
  fn path(&self) -> &str;

  /// Whether clients may observe this resource (RFC 7641).
  ///
  /// Defaults to false, in which case Observe options on requests are
  /// ignored and no relations are created.
  fn observable(&self) -> bool {
    false
  }

  /// Produce the response to `req`, or `None` if it is not ready yet
  /// (the server will poll again on its next tick).
  fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp>;
}

/// A blocking CoAP server: a [`Core`] plus a routing table of
/// [`Service`]s.
#[allow(missing_debug_implementations)]
pub struct Server<P: Platform> {
  core: Core<P>,
  services: Vec<Box<dyn Service<P>>>,
  in_flight: Vec<(Addrd<Req>, usize)>,
}

impl Server<Std> {
  /// Create a new server bound to `{ip}:{port}`
  pub fn try_new(ip: [u8; 4], port: u16) -> std::io::Result<Self> {
    Self::try_new_config(ip, port, Config::default())
  }

  /// Create a new std server with a specific runtime config
  pub fn try_new_config(ip: [u8; 4], port: u16, config: Config) -> std::io::Result<Self> {
    let [a, b, c, d] = ip;
    let sock = std::net::UdpSocket::bind((std::net::Ipv4Addr::new(a, b, c, d), port))?;
    sock.set_nonblocking(true)?;
    Ok(Self::new_config(config, crate::std::Clock::new(), sock))
  }
}

impl<P: Platform + std::fmt::Debug> Server<P> {
  /// Construct a new Server over a socket and clock
  pub fn new(clock: P::Clock, sock: P::Socket) -> Self {
    Self::new_config(Config::default(), clock, sock)
  }

  /// Construct a new Server with a specific runtime config
  pub fn new_config(config: Config, clock: P::Clock, sock: P::Socket) -> Self {
    Self { core: Core::new_config(config, clock, sock),
           services: Vec::new(),
           in_flight: Vec::new() }
  }

  /// Add a service to the routing table.
  ///
  /// Requests whose Uri-Path equals the service's
  /// [`path`](Service::path) are handed to it; later registrations
  /// win ties.
  pub fn register_service(&mut self, service: Box<dyn Service<P>>) -> () {
    self.services.push(service);
  }

  /// Remove the service at `path`.
  ///
  /// Anyone observing the resource is sent a final 4.04 notification
  /// before its relations are dropped.
  pub fn unregister_service(&mut self, path: impl AsRef<str>) -> Result<(), Error<P>> {
    self.services.retain(|s| s.path() != path.as_ref());
    self.in_flight
        .retain(|(req, _)| req.data().path().as_deref() != Some(path.as_ref()));
    self.core.cancel_observers_of(path)
  }

  /// Push a new representation of the resource at `path` to all of
  /// its observers
  pub fn notify(&mut self,
                path: impl AsRef<str>,
                representation: impl Into<Vec<u8>>,
                format: Option<ContentFormat>)
                -> Result<(), Error<P>> {
    self.core.notify(path, representation, format)
  }

  /// Number of live observe relations across all resources
  pub fn observer_count(&self) -> usize {
    self.core.observer_count()
  }

  /// Borrow the underlying runtime
  pub fn core(&mut self) -> &mut Core<P> {
    &mut self.core
  }

  /// One turn of the server's crank: accept at most one new request,
  /// poll services that owe responses.
  ///
  /// Errors are logged, answered at the protocol level where the
  /// runtime can, and never allowed to stop the loop.
  pub fn tick(&mut self) -> () {
    match self.core.poll_req() {
      | Ok(req) => self.route(req),
      | Err(nb::Error::WouldBlock) => (),
      | Err(nb::Error::Other(e)) => log::warn!("error polling for requests: {:?}", e),
    }

    self.poll_in_flight();
  }

  /// Serve forever
  pub fn run(mut self) -> ! {
    loop {
      self.tick();
    }
  }

  /// Stop serving: observers get RST, the socket is dropped
  pub fn shutdown(self) -> Result<(), Error<P>> {
    self.core.shutdown()
  }

  fn route(&mut self, req: Addrd<Req>) -> () {
    let path = req.data().path().unwrap_or_default();

    let found = self.services
                    .iter()
                    .rposition(|s| s.path() == path);

    match found {
      | None => {
        let ty = match req.data().msg_type() {
          | Type::Con => Type::Ack,
          | _ => Type::Non,
        };

        match Resp::error(ty, code::NOT_FOUND, "no such resource") {
          | Ok(resp) => self.respond(&req, resp),
          | Err(_) => unreachable!(),
        }
      },
      | Some(ix) => {
        let (addr, token) = (req.addr(), req.data().msg_token());

        match req.data().observe_action() {
          | Some(Action::Register) if self.services[ix].observable() => {
            self.core
                .observe_register(path, addr, token)
                .map(|_| ())
                .unwrap_or_else(|e| log::warn!("could not register observer: {:?}", e));
          },
          | Some(Action::Deregister) => {
            self.core.observe_deregister(addr, token);
          },
          | _ => (),
        }

        self.in_flight.push((req, ix));
        self.poll_in_flight();
      },
    }
  }

  fn poll_in_flight(&mut self) -> () {
    let mut ix = 0;

    while ix < self.in_flight.len() {
      let service_ix = self.in_flight[ix].1;

      match self.services[service_ix].poll(&self.in_flight[ix].0) {
        | Some(resp) => {
          let (req, _) = self.in_flight.remove(ix);
          if let Err(e) = self.core.respond(&req, resp) {
            log::warn!("error responding to {}: {:?}", req.addr(), e);
          }
        },
        | None => ix += 1,
      }
    }
  }

  fn respond(&mut self, req: &Addrd<Req>, resp: Resp) -> () {
    if let Err(e) = self.core.respond(req, resp) {
      log::warn!("error responding to {}: {:?}", req.addr(), e);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::{Arc, Mutex};

  use newt_msg::{Code, Id, Message, Token};

  use super::*;
  use crate::test::{msg, ClockMock, Platform, SockMock};

  type TestServer = Server<Platform>;
  type Frames = Arc<Mutex<Vec<Addrd<Vec<u8>>>>>;

  struct Hello;

  impl Service<Platform> for Hello {
    fn path(&self) -> &str {
      "hello"
    }

    fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp> {
      let mut resp = Resp::for_request(req.data())?;
      resp.set_payload("hi there");
      Some(resp)
    }
  }

  struct SlowUntil(Arc<AtomicBool>);

  impl Service<Platform> for SlowUntil {
    fn path(&self) -> &str {
      "slow"
    }

    fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp> {
      if !self.0.load(Ordering::Relaxed) {
        return None;
      }

      let mut resp = Resp::for_request(req.data())?;
      resp.set_payload("worth the wait");
      Some(resp)
    }
  }

  struct Temperature;

  impl Service<Platform> for Temperature {
    fn path(&self) -> &str {
      "temp"
    }

    fn observable(&self) -> bool {
      true
    }

    fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp> {
      let mut resp = Resp::for_request(req.data())?;
      resp.set_payload("21c");
      Some(resp)
    }
  }

  fn setup() -> (TestServer, Frames, Frames) {
    let sock = SockMock::new();
    let (rx, tx) = (Arc::clone(&sock.rx), Arc::clone(&sock.tx));
    let server = TestServer::new(ClockMock::new(), sock);
    (server, rx, tx)
  }

  fn con_get(id: u16, token: u64, path: &str) -> Addrd<Message> {
    let mut msg = msg!(CON GET x.x.x.x:8080);
    msg.as_mut().id = Id(id);
    msg.as_mut().token = Token::counter(token);
    msg.as_mut().set_path(path).unwrap();
    msg
  }

  #[test]
  fn unknown_path_is_404() {
    let (mut server, rx, tx) = setup();
    server.register_service(Box::new(Hello));

    SockMock::inject(&rx, con_get(1, 1, "nope"));
    server.tick();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().code, Code::new(4, 4));
    assert_eq!(sent[0].data().id, Id(1));
  }

  #[test]
  fn fast_service_response_is_piggy_backed() {
    let (mut server, rx, tx) = setup();
    server.register_service(Box::new(Hello));

    SockMock::inject(&rx, con_get(2, 1, "hello"));
    server.tick();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().ty, newt_msg::Type::Ack);
    assert_eq!(sent[0].data().id, Id(2));
    assert_eq!(sent[0].data().payload.0, b"hi there".to_vec());
  }

  #[test]
  fn slow_service_response_is_separate() {
    let (mut server, rx, tx) = setup();
    let ready = Arc::new(AtomicBool::new(false));
    server.register_service(Box::new(SlowUntil(Arc::clone(&ready))));

    SockMock::inject(&rx, con_get(3, 1, "slow"));
    server.tick();
    assert_eq!(SockMock::sent(&tx).len(), 0);

    // past the threshold, the runtime promises a separate response
    server.core().clock.set_millis(2_000);
    server.tick();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().ty, newt_msg::Type::Ack);
    assert_eq!(sent[0].data().code, Code::EMPTY);

    ready.store(true, Ordering::Relaxed);
    server.tick();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].data().ty, newt_msg::Type::Con);
    assert_eq!(sent[1].data().token, Token::counter(1));
    assert_eq!(sent[1].data().payload.0, b"worth the wait".to_vec());
  }

  #[test]
  fn observe_lifecycle_over_the_wire() {
    let (mut server, rx, tx) = setup();
    server.register_service(Box::new(Temperature));

    // register
    let mut register = con_get(4, 9, "temp");
    register.as_mut().set_observe(0).unwrap();
    SockMock::inject(&rx, register);
    server.tick();

    assert_eq!(server.observer_count(), 1);
    let sent = SockMock::sent(&tx);
    assert!(sent[0].data().observe().is_some());

    // state changes fan out
    server.notify("temp", "22c", None).unwrap();
    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].data().token, Token::counter(9));
    assert_eq!(sent[1].data().payload.0, b"22c".to_vec());

    // deregister: relation removed, request still answered normally
    let mut deregister = con_get(5, 9, "temp");
    deregister.as_mut().set_observe(1).unwrap();
    SockMock::inject(&rx, deregister);
    server.tick();

    assert_eq!(server.observer_count(), 0);
    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].data().observe(), None);
  }

  #[test]
  fn unregistering_a_service_cancels_its_observers() {
    let (mut server, rx, tx) = setup();
    server.register_service(Box::new(Temperature));

    let mut register = con_get(6, 2, "temp");
    register.as_mut().set_observe(0).unwrap();
    SockMock::inject(&rx, register);
    server.tick();
    assert_eq!(server.observer_count(), 1);

    server.unregister_service("temp").unwrap();
    assert_eq!(server.observer_count(), 0);

    let sent = SockMock::sent(&tx);
    let bye = sent.last().unwrap().data();
    assert_eq!(bye.code, Code::new(4, 4));
    assert_eq!(bye.token, Token::counter(2));

    // the service is gone from routing too
    SockMock::inject(&rx, con_get(7, 3, "temp"));
    server.tick();
    assert_eq!(SockMock::sent(&tx).last().unwrap().data().code,
               Code::new(4, 4));
  }
}
