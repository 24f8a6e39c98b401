use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_time::{Clock as _, Instant};
use newt_msg::known::observe::{fresher, Action};
use newt_msg::known::ContentFormat;
use newt_msg::{CodeKind, Id, Message, MessageParseError, Token, Type};
use newt_msg::{TryFromBytes, TryIntoBytes};
use no_std_net::{IpAddr, SocketAddr};
use rand::{Rng, SeedableRng};

mod error;
#[doc(inline)]
pub use error::*;

/// Server-side observe relations
pub(crate) mod observe;

use crate::config::Config;
use crate::logging;
use crate::net::{Addrd, Dgram, Socket};
use crate::platform::Platform;
use crate::req::{check_request_invariants, Req};
use crate::resp::{check_response_invariants, code, Resp};
use crate::retry::{RetryTimer, YouShould};
use crate::time::{millis_between, Stamped};

/// Why an outbound CON is being tracked for retransmission; decides
/// what happens when it is acknowledged, rejected, or given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConPurpose {
  /// A request we sent; failure/rejection settles the exchange
  /// owning `token`
  Request {
    /// Token of the owning exchange
    token: Token,
  },
  /// A separate response we sent to someone's request; nobody above
  /// the reliability layer is waiting on its fate
  SeparateResponse,
  /// An update notification; repeated timeouts or an RST remove the
  /// observer registered with `token`
  Notification {
    /// Token of the observe relation
    token: Token,
  },
  /// A CoAP ping; settled by the pong (RST) or by exhaustion
  Ping,
}

/// Reliability record for one outbound CON: the exact bytes that went
/// out the first time (retransmissions MUST be byte-identical, so we
/// serialise once and keep the frame), and the retry timer.
struct OutboundCon<P: Platform> {
  addr: SocketAddr,
  id: Id,
  bytes: Vec<u8>,
  timer: RetryTimer<P::Clock>,
  purpose: ConPurpose,
}

/// Duplicate-detection record for one inbound CON, keyed
/// `(addr, id)` and retained for the exchange lifetime.
///
/// `reply` caches whatever protocol answer we produced (empty ACK,
/// piggy-backed response, or separate response); a duplicate is
/// answered by replaying those bytes verbatim. While `reply` is None
/// the application is still processing and duplicates are dropped.
struct DedupEntry<P: Platform> {
  addr: SocketAddr,
  id: Id,
  at: Instant<P::Clock>,
  reply: Option<Vec<u8>>,
  /// Duplicates that arrived before any reply existed; they are owed
  /// a copy of the reply the moment it is produced
  unanswered_dups: u16,
}

/// An inbound CON request the application has not answered yet.
///
/// When `separate_response_threshold` passes before the answer
/// arrives, an empty ACK goes out and `acked` flips; the eventual
/// answer is then sent as a separate CON instead of a piggy-backed
/// ACK. Exactly one of the two ever happens.
struct PendingReq<P: Platform> {
  addr: SocketAddr,
  id: Id,
  received: Instant<P::Clock>,
  acked: bool,
}

/// How an exchange came to an unhappy end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeFailure {
  Timeout,
  Rejected,
  Expired,
  ObservationCancelled(ObservationEnd),
}

/// One entry of the exchange table: a request of ours awaiting
/// response(s), keyed `(addr, token)`.
struct Exchange<P: Platform> {
  addr: SocketAddr,
  token: Token,
  created: Instant<P::Clock>,
  /// Observations outlive their first response and accumulate
  /// notifications until deregistered
  observing: bool,
  /// Sequence number and arrival time of the freshest notification
  /// seen, for the RFC 7641 section 3.4 check
  last_seq: Option<(u32, Instant<P::Clock>)>,
  results: VecDeque<Result<Resp, ExchangeFailure>>,
  done: bool,
  cancelled: Arc<AtomicBool>,
}

/// Proof of an in-flight exchange, returned by
/// [`Core::send_req`].
///
/// Poll [`Core::poll_resp`] with the handle's token and address to
/// drive the exchange to completion.
///
/// Dropping the handle cancels the exchange: pending retransmissions
/// stop, the exchange is removed, and any reply that arrives later is
/// answered with RST.
#[derive(Debug, Clone)]
pub struct TokenHandle {
  token: Token,
  addr: SocketAddr,
  cancelled: Arc<AtomicBool>,
}

impl TokenHandle {
  /// The exchange's token
  pub fn token(&self) -> Token {
    self.token
  }

  /// The remote endpoint of the exchange
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }
}

impl Drop for TokenHandle {
  fn drop(&mut self) {
    self.cancelled.store(true, Ordering::Relaxed);
  }
}

/// A CoAP request/response runtime that drives client- and
/// server-side behavior over one socket.
///
/// `Core` owns every protocol table - outbound CON retransmission
/// records, inbound duplicate detection, the exchange table and the
/// observe registry - and multiplexes them over a single non-blocking
/// poll loop, so transitions that touch several tables (a response
/// settling both a reliability record and an exchange) are atomic as
/// far as anything outside `Core` can tell.
#[allow(missing_debug_implementations)]
pub struct Core<P: Platform> {
  pub(crate) sock: P::Socket,
  pub(crate) clock: P::Clock,
  config: Config,
  rand: rand_chacha::ChaCha8Rng,

  retry_q: Vec<OutboundCon<P>>,
  exchanges: Vec<Exchange<P>>,
  /// Cancelled exchanges whose late replies still deserve an RST
  tombstones: Vec<Stamped<P::Clock, (SocketAddr, Token)>>,
  dedup: Vec<DedupEntry<P>>,
  pending: Vec<PendingReq<P>>,
  /// Requests decoded, de-duplicated, and waiting for the application
  req_q: VecDeque<Addrd<Req>>,
  observers: observe::Registry<P::Clock>,
  failed_pings: Vec<(SocketAddr, Id)>,

  largest_msg_id_seen: Option<u16>,
  token_counter: u64,
}

impl<P: Platform> Core<P> {
  /// Creates a new Core with the default runtime config
  pub fn new(clock: P::Clock, sock: P::Socket) -> Self {
    Self::new_config(Config::default(), clock, sock)
  }

  /// Create a new core with a custom runtime config
  pub fn new_config(config: Config, clock: P::Clock, sock: P::Socket) -> Self {
    Self { sock,
           clock,
           rand: rand_chacha::ChaCha8Rng::seed_from_u64(config.msg.token_seed as u64),
           token_counter: (config.msg.token_seed as u64) << 32,
           config,
           retry_q: Vec::new(),
           exchanges: Vec::new(),
           tombstones: Vec::new(),
           dedup: Vec::new(),
           pending: Vec::new(),
           req_q: VecDeque::new(),
           observers: observe::Registry::new(),
           failed_pings: Vec::new(),
           largest_msg_id_seen: None }
  }

  /// A copy of the runtime config
  pub fn config(&self) -> Config {
    self.config
  }

  fn now(&self) -> Result<Instant<P::Clock>, Error<P>> {
    self.clock
        .try_now()
        .map_err(|_| When::None.what(What::ClockError))
  }

  /// Generate a message id unused in recent memory: one past the
  /// largest we have seen or generated, starting from a random point.
  fn next_id(&mut self) -> Id {
    let new = match self.largest_msg_id_seen {
      | Some(id) => Id(id).next(),
      | None => Id(self.rand.gen_range(0..=255)),
    };

    self.largest_msg_id_seen = Some(new.0);
    new
  }

  /// Generate a token no active exchange is using: a monotonically
  /// increasing counter in minimal big-endian bytes, offset by the
  /// configured token seed.
  fn next_token(&mut self) -> Token {
    self.token_counter = self.token_counter.wrapping_add(1);
    Token::counter(self.token_counter)
  }

  fn seen_id(&mut self, id: Id) {
    self.largest_msg_id_seen = Some(match self.largest_msg_id_seen {
                                      | Some(largest) if largest >= id.0 => largest,
                                      | _ => id.0,
                                    });
  }

  fn serialize(msg: Message) -> Result<Vec<u8>, Error<P>> {
    msg.try_into_bytes()
       .map_err(|e| When::None.what(What::ToBytes(e)))
  }

  fn transmit(&mut self, addr: SocketAddr, bytes: &[u8]) -> Result<(), Error<P>> {
    nb::block!(self.sock.send(Addrd(bytes, addr))).map_err(|e| {
                                                    When::None.what(What::SockError(e))
                                                  })?;
    log::trace!("sent {}b -> {}", bytes.len(), addr);
    Ok(())
  }

  fn track_con(&mut self,
               addr: SocketAddr,
               id: Id,
               bytes: Vec<u8>,
               purpose: ConPurpose)
               -> Result<(), Error<P>> {
    let timer = RetryTimer::new(self.now()?,
                                self.config.msg.con.retry_strategy,
                                self.config.msg.con.max_attempts);

    self.retry_q.push(OutboundCon { addr,
                                    id,
                                    bytes,
                                    timer,
                                    purpose });
    Ok(())
  }

  /// Send a request to the host named by its Uri-Host/Uri-Port
  /// options (as set by [`Req::new`]).
  ///
  /// Returns a [`TokenHandle`] to poll (and to drop, to cancel).
  pub fn send_req(&mut self, req: Req) -> Result<TokenHandle, Error<P>> {
    let when = When::None;

    let host = req.uri_host()
                  .ok_or(When::None.what(What::HostInvalidIpAddress))?;
    let port = req.uri_port() as u16;

    host.parse::<IpAddr>()
        .map_err(|_| when.what(What::HostInvalidIpAddress))
        .map(|ip| SocketAddr::new(ip, port))
        .and_then(|addr| self.send_addrd_req(Addrd(req, addr)))
  }

  /// Send a request to an explicit address (the path used by
  /// [`Req::from_uri`], whose host elision means the options alone
  /// don't name the destination).
  pub fn send_addrd_req(&mut self, mut req: Addrd<Req>) -> Result<TokenHandle, Error<P>> {
    check_request_invariants(req.data().msg_type(), req.data().method().code())?;

    let addr = req.addr();

    if req.data().id.is_none() {
      let id = self.next_id();
      req.as_mut().set_msg_id(id);
    }

    if req.data().token.is_none() {
      let token = self.next_token();
      req.as_mut().set_msg_token(token);
    }

    let observing = req.data().observe_action() == Some(Action::Register);
    let msg = Message::from(req.unwrap());
    let (id, token, con) = (msg.id, msg.token, msg.ty.is_confirmable());

    // one exchange per (addr, token); a stale one with the same key
    // is superseded
    self.exchanges
        .retain(|x| !(x.addr == addr && x.token == token));

    let bytes = Self::serialize(msg)?;

    if con {
      self.track_con(addr, id, bytes.clone(), ConPurpose::Request { token })?;
    }

    let cancelled = Arc::new(AtomicBool::new(false));
    let created = self.now()?;
    self.exchanges.push(Exchange { addr,
                                   token,
                                   created,
                                   observing,
                                   last_seq: None,
                                   results: VecDeque::new(),
                                   done: false,
                                   cancelled: Arc::clone(&cancelled) });

    self.transmit(addr, &bytes)?;

    Ok(TokenHandle { token,
                     addr,
                     cancelled })
  }

  /// Poll for a response to a sent request.
  ///
  /// For observations this yields each accepted update notification
  /// in arrival order.
  pub fn poll_resp(&mut self, token: Token, addr: SocketAddr) -> nb::Result<Resp, Error<P>> {
    self.tick().map_err(nb::Error::Other)?;

    let ix = self.exchanges
                 .iter()
                 .position(|x| x.addr == addr && x.token == token)
                 .ok_or(nb::Error::Other(When::Polling.what(What::ExchangeExpired)))?;

    match self.exchanges[ix].results.pop_front() {
      | Some(Ok(resp)) => {
        if !self.exchanges[ix].observing {
          self.exchanges.remove(ix);
        }
        Ok(resp)
      },
      | Some(Err(failure)) => {
        self.exchanges.remove(ix);
        Err(nb::Error::Other(When::Polling.what(match failure {
                                                  | ExchangeFailure::Timeout => What::Timeout,
                                                  | ExchangeFailure::Rejected => What::Rejected,
                                                  | ExchangeFailure::Expired => {
                                                    What::ExchangeExpired
                                                  },
                                                  | ExchangeFailure::ObservationCancelled(e) => {
                                                    What::ObservationCancelled(e)
                                                  },
                                                })))
      },
      | None if self.exchanges[ix].done => {
        self.exchanges.remove(ix);
        Err(nb::Error::Other(When::Polling.what(What::ExchangeExpired)))
      },
      | None => Err(nb::Error::WouldBlock),
    }
  }

  /// Poll for an incoming request.
  ///
  /// Requests surface here exactly once each: retransmissions of a
  /// CON request the application is already chewing on are absorbed
  /// by the duplicate filter.
  pub fn poll_req(&mut self) -> nb::Result<Addrd<Req>, Error<P>> {
    self.tick().map_err(nb::Error::Other)?;
    self.req_q.pop_front().ok_or(nb::Error::WouldBlock)
  }

  /// Answer a request previously yielded by [`Core::poll_req`].
  ///
  /// The reliability layer decides the shape on the wire:
  ///  - a CON request answered before the separate-response threshold
  ///    becomes a piggy-backed ACK with the request's message id;
  ///  - a CON request answered after the empty ACK went out becomes a
  ///    fresh CON with a new id and the request's token, retransmitted
  ///    until acknowledged;
  ///  - a NON request is answered with a NON (or CON, if the
  ///    application asked for one).
  ///
  /// Either way the response is cached against the request's message
  /// id so duplicates of the request replay it.
  pub fn respond(&mut self, req: &Addrd<Req>, mut resp: Resp) -> Result<(), Error<P>> {
    check_response_invariants(resp.msg_type(), resp.code())?;

    let addr = req.addr();
    let (req_id, token) = (req.data().msg_id(), req.data().msg_token());

    // when this answers a successful observe registration, it must
    // carry the relation's initial sequence number
    if req.data().observe_action() == Some(Action::Register) {
      match self.observers.get_mut(addr, token) {
        | Some(o) if !resp.code().is_error() => {
          let seq = o.seq;
          resp.set_observe(seq);
        },
        | Some(_) => {
          self.observers.deregister(addr, token);
        },
        | None => (),
      }
    }

    let pending_ix = self.pending
                         .iter()
                         .position(|p| p.addr == addr && p.id == req_id);

    let mut msg = Message::from(resp);
    msg.token = token;

    match pending_ix {
      | Some(ix) if !self.pending[ix].acked => {
        // piggy-backed: the response rides in the ACK no matter what
        // type the application chose
        msg.ty = Type::Ack;
        msg.id = req_id;
        self.pending.remove(ix);

        let bytes = Self::serialize(msg)?;
        self.cache_reply(addr, req_id, bytes.clone())?;
        self.transmit(addr, &bytes)
      },
      | Some(ix) => {
        // the empty ACK went out already; this is the separate
        // response, a fresh CON correlated by token alone
        msg.ty = Type::Con;
        msg.id = self.next_id();
        self.pending.remove(ix);

        let bytes = Self::serialize(msg.clone())?;
        self.cache_reply(addr, req_id, bytes.clone())?;
        self.track_con(addr, msg.id, bytes.clone(), ConPurpose::SeparateResponse)?;
        self.transmit(addr, &bytes)
      },
      | None => {
        // NON request (or one whose state already expired)
        if msg.ty == Type::Ack {
          msg.ty = Type::Non;
        }
        msg.id = self.next_id();

        let bytes = Self::serialize(msg.clone())?;
        if msg.ty.is_confirmable() {
          self.track_con(addr, msg.id, bytes.clone(), ConPurpose::SeparateResponse)?;
        }
        self.transmit(addr, &bytes)
      },
    }
  }

  /// Add `(addr, token)` to the observers of `path`.
  ///
  /// Invoked by the server when a request with Observe=0 reaches an
  /// observable resource; the response sent through
  /// [`Core::respond`] picks up the relation's initial sequence
  /// number automatically.
  pub fn observe_register(&mut self,
                          path: impl Into<String>,
                          addr: SocketAddr,
                          token: Token)
                          -> Result<u32, Error<P>> {
    let now = self.now()?;
    Ok(self.observers.register(path, addr, token, now))
  }

  /// Remove the observe relation `(addr, token)`, returning whether
  /// one existed
  pub fn observe_deregister(&mut self, addr: SocketAddr, token: Token) -> bool {
    self.observers.deregister(addr, token)
  }

  /// Number of live observe relations
  pub fn observer_count(&self) -> usize {
    self.observers.len()
  }

  /// Push a new representation of `path` to every observer.
  ///
  /// One notification per observer, each strictly fresher than the
  /// observer's previous one, emitted in registration order. Every
  /// [`Config::con_notification_interval`]-th notification to an
  /// observer is CON; a CON notification that exhausts its
  /// retransmissions often enough removes the observer.
  pub fn notify(&mut self,
                path: impl AsRef<str>,
                representation: impl Into<Vec<u8>>,
                format: Option<ContentFormat>)
                -> Result<(), Error<P>> {
    let now = self.now()?;
    let window = self.config.notification_freshness_window;
    let interval = self.config.con_notification_interval.max(1) as u32;
    let representation = representation.into();

    let plans = self.observers
                    .observers_of_mut(path.as_ref())
                    .map(|o| {
                      let seq = o.next_seq(now, window);
                      let con = o.notification_count % interval == 0;
                      (o.addr, o.token, seq, con)
                    })
                    .collect::<Vec<_>>();

    for (addr, token, seq, con) in plans {
      let id = self.next_id();

      let mut msg = Message::new(if con { Type::Con } else { Type::Non },
                                 code::CONTENT,
                                 id,
                                 token);
      msg.set_observe(seq).ok();
      if let Some(format) = format {
        msg.set_content_format(format).ok();
      }
      msg.payload = newt_msg::Payload(representation.clone());

      if let Some(o) = self.observers.get_mut(addr, token) {
        o.last_notification_id = Some(id);
      }

      let bytes = Self::serialize(msg)?;
      if con {
        self.track_con(addr, id, bytes.clone(), ConPurpose::Notification { token })?;
      }
      self.transmit(addr, &bytes)?;
    }

    Ok(())
  }

  /// The resource at `path` is gone: every observer of it receives a
  /// final 4.04 notification, then the relations are dropped.
  pub fn cancel_observers_of(&mut self, path: impl AsRef<str>) -> Result<(), Error<P>> {
    let removed = self.observers.remove_path(path.as_ref());

    for o in removed {
      let id = self.next_id();
      let msg = Message::new(Type::Non, code::NOT_FOUND, id, o.token);
      let bytes = Self::serialize(msg)?;
      self.transmit(o.addr, &bytes)?;
    }

    Ok(())
  }

  /// Send a ping (an Empty CON message) to some remote coap endpoint
  /// to check liveness; the pong is their RST.
  ///
  /// Returns a message id to [`poll_ping`](Core::poll_ping) with.
  pub fn ping(&mut self,
              host: impl AsRef<str>,
              port: u16)
              -> Result<(Id, SocketAddr), Error<P>> {
    let when = When::None;

    host.as_ref()
        .parse::<IpAddr>()
        .map_err(|_| when.what(What::HostInvalidIpAddress))
        .map(|ip| SocketAddr::new(ip, port))
        .and_then(|addr| {
          let id = self.next_id();
          let bytes = Self::serialize(Message::ping(id))?;
          self.track_con(addr, id, bytes.clone(), ConPurpose::Ping)?;
          self.transmit(addr, &bytes)?;
          Ok((id, addr))
        })
  }

  /// Poll for the pong answering a [`ping`](Core::ping)
  pub fn poll_ping(&mut self, id: Id, addr: SocketAddr) -> nb::Result<(), Error<P>> {
    self.tick().map_err(nb::Error::Other)?;

    if let Some(ix) = self.failed_pings
                          .iter()
                          .position(|&(a, i)| a == addr && i == id)
    {
      self.failed_pings.remove(ix);
      return Err(nb::Error::Other(When::Polling.what(What::Timeout)));
    }

    let still_tracked = self.retry_q
                            .iter()
                            .any(|rec| rec.addr == addr && rec.id == id);

    if still_tracked {
      Err(nb::Error::WouldBlock)
    } else {
      Ok(())
    }
  }

  /// Stop being a CoAP endpoint: every observer is told to forget us
  /// with an RST, in-flight exchanges are abandoned, and the socket
  /// is dropped.
  pub fn shutdown(mut self) -> Result<(), Error<P>> {
    for o in self.observers.drain() {
      let id = o.last_notification_id
                .unwrap_or_else(|| self.next_id());
      let bytes = Self::serialize(Message::empty_reset(id))?;
      self.transmit(o.addr, &bytes)?;
    }

    self.retry_q.clear();
    self.exchanges.clear();

    Ok(())
  }

  /// One turn of the crank: pull a datagram from the socket and
  /// dispatch it, then fire whatever timers are due.
  fn tick(&mut self) -> Result<(), Error<P>> {
    let polled = self.sock
                     .poll()
                     .map_err(|e| When::Polling.what(What::SockError(e)))?;

    if let Some(dgram) = polled {
      self.dgram_recvd(dgram)?;
    }

    self.process_retries()?;
    self.process_pending_acks()?;
    self.process_cancellations()?;
    self.expire_state()?;

    Ok(())
  }

  fn dgram_recvd(&mut self, dgram: Addrd<Dgram>) -> Result<(), Error<P>> {
    log::trace!("recvd {}b <- {}", dgram.data().len(), dgram.addr());

    match Message::try_from_bytes(dgram.data()) {
      | Ok(msg) => self.msg_recvd(Addrd(msg, dgram.addr())),
      | Err(e) => self.decode_failed(dgram, e),
    }
  }

  /// A frame failed to decode. Answer at the protocol layer where
  /// possible - never let it surface out of the poll loop.
  fn decode_failed(&mut self,
                   dgram: Addrd<Dgram>,
                   e: MessageParseError)
                   -> Result<(), Error<P>> {
    log::debug!("undecodable {}b <- {}: {:?}", dgram.data().len(), dgram.addr(), e);

    // unknown version: RFC 7252 section 3 says silently ignore
    if let MessageParseError::InvalidVersion(_) = e {
      return Ok(());
    }

    match Message::try_parse_header(dgram.data().as_ref()) {
      | Some((ty, code, id, token))
        if matches!(e,
                    MessageParseError::OptParseError(
          newt_msg::OptParseError::UnknownCriticalOption(_)))
           && code.kind() == CodeKind::Request =>
      {
        // a request carrying a critical option we don't understand
        // deserves 4.02 Bad Option
        let mut reply = Message::new(if ty == Type::Con { Type::Ack } else { Type::Non },
                                     code::BAD_OPTION,
                                     if ty == Type::Con { id } else { self.next_id() },
                                     token);
        reply.set_content_format(ContentFormat::Text).ok();
        reply.payload = newt_msg::Payload(b"unrecognized critical option".to_vec());

        let bytes = Self::serialize(reply)?;
        self.transmit(dgram.addr(), &bytes)
      },
      | Some((Type::Con, _, id, _)) => {
        let bytes = Self::serialize(Message::empty_reset(id))?;
        self.transmit(dgram.addr(), &bytes)
      },
      | _ => Ok(()),
    }
  }

  fn msg_recvd(&mut self, msg: Addrd<Message>) -> Result<(), Error<P>> {
    log::trace!("recvd {} <- {}",
                logging::msg_summary(msg.data()),
                msg.addr());

    let addr = msg.addr();
    let Addrd(msg, _) = msg;
    self.seen_id(msg.id);

    match (msg.ty, msg.code.kind()) {
      // CoAP ping: reply RST
      | (Type::Con, CodeKind::Empty) => {
        let bytes = Self::serialize(Message::empty_reset(msg.id))?;
        self.transmit(addr, &bytes)
      },

      | (Type::Con, CodeKind::Request) => self.con_request_recvd(Addrd(msg, addr)),

      | (Type::Non, CodeKind::Request) => {
        self.req_q.push_back(Addrd(Req::from(msg), addr));
        Ok(())
      },

      | (Type::Con, CodeKind::Response) => {
        // the empty ACK for a CON response is part of the dedup
        // cache: a duplicate gets the same ACK again, but is not
        // forwarded to the exchange twice
        if let Some(cached) = self.dedup_reply(addr, msg.id) {
          return match cached {
                   | Some(reply) => self.transmit(addr, &reply),
                   | None => Ok(()),
                 };
        }

        let now = self.now()?;
        let ack = Self::serialize(Message::empty_ack(msg.id))?;
        self.dedup.push(DedupEntry { addr,
                                     id: msg.id,
                                     at: now,
                                     reply: Some(ack.clone()),
                                     unanswered_dups: 0 });
        self.transmit(addr, &ack)?;
        self.response_recvd(Addrd(msg, addr))
      },

      | (Type::Non, CodeKind::Response) => self.response_recvd(Addrd(msg, addr)),

      | (Type::Ack, CodeKind::Empty) => {
        self.con_settled(addr, msg.id, false)?;
        Ok(())
      },

      | (Type::Ack, CodeKind::Response) => {
        self.con_settled(addr, msg.id, false)?;
        self.response_recvd(Addrd(msg, addr))
      },

      | (Type::Reset, _) => self.con_settled(addr, msg.id, true),

      // an ACK carrying a request code, or other nonsense: drop
      | _ => {
        log::debug!("ignoring malformed combination from {}", addr);
        Ok(())
      },
    }
  }

  /// Look up the cached reply for an inbound CON `(addr, id)`,
  /// marking the entry as a duplicate hit.
  fn dedup_reply(&mut self, addr: SocketAddr, id: Id) -> Option<Option<Vec<u8>>> {
    self.dedup
        .iter()
        .find(|e| e.addr == addr && e.id == id)
        .map(|e| e.reply.clone())
        .map(|reply| {
          log::debug!("duplicate CON {:?} <- {}", id, addr);
          reply
        })
  }

  /// Remember the reply produced for inbound CON `(addr, id)`, and
  /// pay off any duplicates that arrived while there was nothing to
  /// answer them with.
  fn cache_reply(&mut self, addr: SocketAddr, id: Id, bytes: Vec<u8>) -> Result<(), Error<P>> {
    let owed = match self.dedup
                         .iter_mut()
                         .find(|e| e.addr == addr && e.id == id)
    {
      | Some(e) => {
        e.reply = Some(bytes.clone());
        core::mem::take(&mut e.unanswered_dups)
      },
      | None => 0,
    };

    for _ in 0..owed {
      self.transmit(addr, &bytes)?;
    }

    Ok(())
  }

  fn con_request_recvd(&mut self, msg: Addrd<Message>) -> Result<(), Error<P>> {
    let (addr, id) = (msg.addr(), msg.data().id);

    match self.dedup_reply(addr, id) {
      // duplicate of a request we answered: replay the exact reply
      | Some(Some(reply)) => self.transmit(addr, &reply),
      // duplicate of a request the application is still processing:
      // remember it; it gets a copy of the reply when one exists
      | Some(None) => {
        if let Some(e) = self.dedup
                             .iter_mut()
                             .find(|e| e.addr == addr && e.id == id)
        {
          e.unanswered_dups += 1;
        }
        Ok(())
      },
      | None => {
        let now = self.now()?;
        self.dedup.push(DedupEntry { addr,
                                     id,
                                     at: now,
                                     reply: None,
                                     unanswered_dups: 0 });
        self.pending.push(PendingReq { addr,
                                       id,
                                       received: now,
                                       acked: false });
        self.req_q.push_back(msg.map(Req::from));
        Ok(())
      },
    }
  }

  /// A response (piggy-backed, separate, or notification) arrived;
  /// correlate it with an exchange by `(addr, token)` - never by
  /// message id.
  fn response_recvd(&mut self, msg: Addrd<Message>) -> Result<(), Error<P>> {
    let (addr, id, token) = (msg.addr(), msg.data().id, msg.data().token);
    let ty = msg.data().ty;
    let now = self.now()?;

    let ix = match self.exchanges
                       .iter()
                       .position(|x| x.addr == addr && x.token == token)
    {
      | Some(ix) => ix,
      | None => {
        let was_ours = self.tombstones
                           .iter()
                           .any(|t| *t.data() == (addr, token));

        return if was_ours || ty == Type::Con {
                 // a reply to an exchange we gave up on (or to no
                 // exchange at all, confirmably): reject it
                 let bytes = Self::serialize(Message::empty_reset(id))?;
                 self.transmit(addr, &bytes)
               } else {
                 log::debug!("response with unknown token {:?} <- {}", token, addr);
                 Ok(())
               };
      },
    };

    let x = &mut self.exchanges[ix];

    if x.observing {
      match msg.data().observe() {
        | Some(seq) => {
          let fresh = match x.last_seq {
            | Some((last, at)) => {
              fresher(seq, last)
              || millis_between(at, now) > self.config.notification_freshness_window.0
            },
            | None => true,
          };

          if fresh {
            x.last_seq = Some((seq, now));
            x.results.push_back(Ok(Resp::from(msg.unwrap())));
          } else {
            log::debug!("discarding stale notification (seq {}) <- {}", seq, addr);
          }
        },
        | None => {
          // a response without Observe ends the observation; an
          // error code means the server cancelled it
          let resp = Resp::from(msg.unwrap());
          let cancelled = resp.code().is_error();
          x.results.push_back(Ok(resp));
          if cancelled {
            x.results
             .push_back(Err(ExchangeFailure::ObservationCancelled(ObservationEnd::Remote)));
          }
          x.done = true;
        },
      }
    } else {
      x.results.push_back(Ok(Resp::from(msg.unwrap())));
      x.done = true;
    }

    Ok(())
  }

  /// An ACK or RST arrived for `(addr, id)`: settle the reliability
  /// record and let its purpose decide what that means upstairs.
  fn con_settled(&mut self, addr: SocketAddr, id: Id, rst: bool) -> Result<(), Error<P>> {
    let ix = self.retry_q
                 .iter()
                 .position(|rec| rec.addr == addr && rec.id == id);

    match ix {
      | Some(ix) => {
        let rec = self.retry_q.remove(ix);
        log::trace!("{:?} {} by {}",
                    id,
                    if rst { "rejected" } else { "acked" },
                    addr);

        match rec.purpose {
          | ConPurpose::Request { token } if rst => {
            self.fail_exchange(addr, token, ExchangeFailure::Rejected)
          },
          // empty ACK: the CON made it across; its exchange keeps
          // waiting for the (possibly separate) response
          | ConPurpose::Request { .. } => (),
          | ConPurpose::Notification { token } if rst => {
            self.observers.deregister(addr, token);
          },
          | ConPurpose::Notification { token } => self.observers.con_acked(addr, token),
          | ConPurpose::SeparateResponse | ConPurpose::Ping => (),
        }
      },
      | None if rst => {
        // RSTs can also answer NON notifications, which have no
        // reliability record
        self.observers.remove_by_notification_id(addr, id);
      },
      | None => log::debug!("ACK for unknown {:?} <- {}", id, addr),
    }

    Ok(())
  }

  fn fail_exchange(&mut self, addr: SocketAddr, token: Token, failure: ExchangeFailure) {
    if let Some(x) = self.exchanges
                         .iter_mut()
                         .find(|x| x.addr == addr && x.token == token)
    {
      x.results.push_back(Err(failure));
      x.done = true;
    }
  }

  /// Retransmit every CON whose timer came due; give up on the ones
  /// out of attempts.
  fn process_retries(&mut self) -> Result<(), Error<P>> {
    let now = self.now()?;

    let mut resend = Vec::new();
    let mut dead = Vec::new();

    for (ix, rec) in self.retry_q.iter_mut().enumerate() {
      match rec.timer.what_should_i_do(now) {
        | Ok(YouShould::Retry) => resend.push(Addrd(rec.bytes.clone(), rec.addr)),
        | Ok(YouShould::Cry) => dead.push(ix),
        | Err(nb::Error::WouldBlock) => (),
        | Err(nb::Error::Other(_)) => unreachable!(),
      }
    }

    for Addrd(bytes, addr) in resend {
      log::debug!("retransmitting {}b -> {}", bytes.len(), addr);
      self.transmit(addr, &bytes)?;
    }

    for ix in dead.into_iter().rev() {
      let rec = self.retry_q.remove(ix);
      log::debug!("{:?} -> {} was never acked", rec.id, rec.addr);

      match rec.purpose {
        | ConPurpose::Request { token } => {
          self.fail_exchange(rec.addr, token, ExchangeFailure::Timeout)
        },
        | ConPurpose::Notification { token } => {
          let max = self.config.msg.con.max_attempts.0;
          self.observers.con_timed_out(rec.addr, token, max);
        },
        | ConPurpose::Ping => self.failed_pings.push((rec.addr, rec.id)),
        | ConPurpose::SeparateResponse => (),
      }
    }

    Ok(())
  }

  /// Emit the promised-a-separate-response empty ACK for requests the
  /// application has sat on longer than the threshold.
  fn process_pending_acks(&mut self) -> Result<(), Error<P>> {
    let now = self.now()?;
    let threshold = self.config.separate_response_threshold.0;

    let due = self.pending
                  .iter_mut()
                  .filter(|p| !p.acked && millis_between(p.received, now) >= threshold)
                  .map(|p| {
                    p.acked = true;
                    (p.addr, p.id)
                  })
                  .collect::<Vec<_>>();

    for (addr, id) in due {
      log::debug!("slow responder: empty ACK for {:?} -> {}", id, addr);
      let bytes = Self::serialize(Message::empty_ack(id))?;
      self.cache_reply(addr, id, bytes.clone())?;
      self.transmit(addr, &bytes)?;
    }

    Ok(())
  }

  /// Act on dropped [`TokenHandle`]s: stop retransmissions, forget
  /// the exchange, and leave a tombstone so stragglers get RST.
  fn process_cancellations(&mut self) -> Result<(), Error<P>> {
    let now = self.now()?;

    let cancelled = self.exchanges
                        .iter()
                        .filter(|x| x.cancelled.load(Ordering::Relaxed))
                        .map(|x| (x.addr, x.token))
                        .collect::<Vec<_>>();

    for (addr, token) in cancelled {
      log::debug!("exchange {:?} with {} cancelled", token, addr);

      self.exchanges
          .retain(|x| !(x.addr == addr && x.token == token));
      self.retry_q
          .retain(|rec| !(rec.addr == addr && rec.purpose == ConPurpose::Request { token }));
      self.tombstones.push(Stamped((addr, token), now));
    }

    Ok(())
  }

  /// Let time reclaim what it is owed.
  fn expire_state(&mut self) -> Result<(), Error<P>> {
    let now = self.now()?;
    let lifetime = self.config.exchange_lifetime.0;

    self.dedup
        .retain(|e| millis_between(e.at, now) <= lifetime);
    self.pending
        .retain(|p| millis_between(p.received, now) <= lifetime);
    self.tombstones
        .retain(|t| millis_between(t.time(), now) <= lifetime);

    for x in self.exchanges.iter_mut() {
      if !x.observing
         && !x.done
         && x.results.is_empty()
         && millis_between(x.created, now) > lifetime
      {
        x.results.push_back(Err(ExchangeFailure::Expired));
        x.done = true;
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use embedded_time::duration::Milliseconds;
  use newt_msg::{Code, Payload};

  use super::*;
  use crate::config;
  use crate::resp::Resp;
  use crate::retry::{Attempts, Strategy};
  use crate::test::{dummy_addr, msg, Core, SockMock};

  type Frames = Arc<Mutex<Vec<Addrd<Vec<u8>>>>>;

  /// A config whose timers have no jitter, so tests can reason about
  /// exact deadlines.
  fn config(init_timeout: u64, attempts: u16) -> Config {
    Config { msg: config::Msg { con: config::Con { retry_strategy:
                                                     Strategy::Exponential {
                                                       init_min: Milliseconds(init_timeout),
                                                       init_max: Milliseconds(init_timeout),
                                                     },
                                                   max_attempts: Attempts(attempts) },
                                ..Default::default() },
             ..Default::default() }
  }

  fn setup(cfg: Config) -> (Core, Frames, Frames) {
    let sock = SockMock::new();
    let (rx, tx) = (Arc::clone(&sock.rx), Arc::clone(&sock.tx));
    let core = Core::new_config(cfg, crate::test::ClockMock::new(), sock);
    (core, rx, tx)
  }

  fn con_get(id: u16, token: u64, path: &str) -> Addrd<Message> {
    let mut msg = msg!(CON GET x.x.x.x:8080);
    msg.as_mut().id = Id(id);
    msg.as_mut().token = Token::counter(token);
    msg.as_mut().set_path(path).unwrap();
    msg
  }

  #[test]
  fn piggy_backed_response_rides_the_ack() {
    let (mut core, rx, tx) = setup(Config::default());

    SockMock::inject(&rx, con_get(100, 2, "hello"));
    let req = core.poll_req().unwrap();

    let mut resp = Resp::for_request(req.data()).unwrap();
    resp.set_payload("hi");
    core.respond(&req, resp).unwrap();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().ty, Type::Ack);
    assert_eq!(sent[0].data().id, Id(100));
    assert_eq!(sent[0].data().token, Token::counter(2));
    assert_eq!(sent[0].data().code, Code::new(2, 5));
    assert_eq!(sent[0].data().payload.0, b"hi".to_vec());
  }

  #[test]
  fn slow_application_gets_a_separate_response() {
    let (mut core, rx, tx) = setup(Config::default());

    SockMock::inject(&rx, con_get(12345, 1, "path/to/service"));
    let req = core.poll_req().unwrap();

    // the application sleeps on it; at the threshold the runtime
    // promises a separate response
    core.clock.set_millis(1_900);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().ty, Type::Ack);
    assert_eq!(sent[0].data().code, Code::EMPTY);
    assert_eq!(sent[0].data().id, Id(12345));

    // ~3s in, the response materializes: a fresh CON, new id, the
    // request's token, payload untouched
    core.clock.set_millis(3_000);
    let mut resp = Resp::for_request(req.data()).unwrap();
    resp.set_payload("some arbitrary payload...");
    core.respond(&req, resp).unwrap();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 2);
    let separate = sent[1].data();
    assert_eq!(separate.ty, Type::Con);
    assert_eq!(separate.code, Code::new(2, 5));
    assert_eq!(separate.token, Token::counter(1));
    assert_ne!(separate.id, Id(12345));
    assert_eq!(separate.payload.0, b"some arbitrary payload...".to_vec());

    // the client confirms; no retransmission of the separate
    // response ever happens
    SockMock::inject(&rx, Addrd(Message::empty_ack(separate.id), dummy_addr()));
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    core.clock.set_millis(60_000);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    assert_eq!(SockMock::sent(&tx).len(), 2);
  }

  #[test]
  fn separate_response_is_retransmitted_until_acked() {
    let (mut core, rx, tx) = setup(config(1_000, 3));

    SockMock::inject(&rx, con_get(7, 1, "slow"));
    let req = core.poll_req().unwrap();

    core.clock.set_millis(2_000);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    assert_eq!(SockMock::sent(&tx).len(), 1); // empty ACK

    let mut resp = Resp::for_request(req.data()).unwrap();
    resp.set_payload("eventually");
    core.respond(&req, resp).unwrap();
    assert_eq!(SockMock::sent(&tx).len(), 2);

    // unacked separate CON goes out again
    core.clock.set_millis(3_000);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let raw = SockMock::sent_bytes(&tx);
    assert_eq!(raw.len(), 3);
    assert_eq!(raw[2], raw[1]);
  }

  #[test]
  fn duplicate_con_invokes_application_once_but_answers_both() {
    let (mut core, rx, tx) = setup(Config::default());

    SockMock::inject(&rx, con_get(200, 3, "dup"));
    let req = core.poll_req().unwrap();

    // retransmission of the same request while the handler runs
    SockMock::inject(&rx, con_get(200, 3, "dup"));
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    assert_eq!(SockMock::sent(&tx).len(), 0);

    let mut resp = Resp::for_request(req.data()).unwrap();
    resp.set_payload("once");
    core.respond(&req, resp).unwrap();

    // both receipts got the identical reply
    let raw = SockMock::sent_bytes(&tx);
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0], raw[1]);

    // a third receipt replays it again
    SockMock::inject(&rx, con_get(200, 3, "dup"));
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    let raw = SockMock::sent_bytes(&tx);
    assert_eq!(raw.len(), 3);
    assert_eq!(raw[2], raw[0]);
  }

  #[test]
  fn con_request_retransmits_byte_identical_then_times_out() {
    let (mut core, _rx, tx) = setup(config(2_000, 5));

    let req = Req::get(dummy_addr(), "unreachable");
    let handle = core.send_req(req).unwrap();

    let mut expected_transmissions = 1;
    for t in [2_000u64, 4_000, 8_000, 16_000] {
      core.clock.set_millis(t);
      assert!(matches!(core.poll_resp(handle.token(), handle.addr()),
                       Err(nb::Error::WouldBlock)));
      expected_transmissions += 1;

      let raw = SockMock::sent_bytes(&tx);
      assert_eq!(raw.len(), expected_transmissions);
      assert_eq!(raw[expected_transmissions - 1], raw[0]);
    }

    // 5 transmissions happened; after the final window the exchange
    // fails with Timeout
    core.clock.set_millis(32_000);
    match core.poll_resp(handle.token(), handle.addr()) {
      | Err(nb::Error::Other(Error { what: What::Timeout, .. })) => (),
      | other => panic!("expected Timeout, got {:?}", other.map(|_| ())),
    }
    assert_eq!(SockMock::sent_bytes(&tx).len(), 5);
  }

  #[test]
  fn client_flow() {
    let (mut core, rx, tx) = setup(Config::default());

    let handle = core.send_req(Req::get(dummy_addr(), "hello")).unwrap();
    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);

    let mut reply = Message::new(Type::Ack,
                                 Code::new(2, 5),
                                 sent[0].data().id,
                                 sent[0].data().token);
    reply.payload = Payload(b"hi".to_vec());
    SockMock::inject(&rx, Addrd(reply, dummy_addr()));

    let resp = nb::block!(core.poll_resp(handle.token(), handle.addr())).unwrap();
    assert_eq!(resp.payload(), b"hi");

    // the exchange is spent
    assert!(matches!(core.poll_resp(handle.token(), handle.addr()),
                     Err(nb::Error::Other(Error { what: What::ExchangeExpired,
                                                  .. }))));
  }

  #[test]
  fn con_response_gets_empty_acked() {
    let (mut core, rx, tx) = setup(Config::default());

    let handle = core.send_req(Req::get(dummy_addr(), "svc")).unwrap();
    let req_frame = SockMock::sent(&tx).remove(0);

    // server acks, then answers with a separate CON response
    SockMock::inject(&rx,
                     Addrd(Message::empty_ack(req_frame.data().id), dummy_addr()));
    assert!(matches!(core.poll_resp(handle.token(), handle.addr()),
                     Err(nb::Error::WouldBlock)));

    let mut separate = Message::new(Type::Con, Code::new(2, 5), Id(999), req_frame.data().token);
    separate.payload = Payload(b"late".to_vec());
    SockMock::inject(&rx, Addrd(separate, dummy_addr()));

    let resp = nb::block!(core.poll_resp(handle.token(), handle.addr())).unwrap();
    assert_eq!(resp.payload(), b"late");

    // the separate CON was confirmed with an empty ACK for its id
    let sent = SockMock::sent(&tx);
    let ack = sent.last().unwrap().data();
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.code, Code::EMPTY);
    assert_eq!(ack.id, Id(999));
  }

  #[test]
  fn rst_rejects_the_exchange() {
    let (mut core, rx, tx) = setup(Config::default());

    let handle = core.send_req(Req::get(dummy_addr(), "nope")).unwrap();
    let req_frame = SockMock::sent(&tx).remove(0);

    SockMock::inject(&rx,
                     Addrd(Message::empty_reset(req_frame.data().id), dummy_addr()));

    assert!(matches!(nb::block!(core.poll_resp(handle.token(), handle.addr())),
                     Err(Error { what: What::Rejected, .. })));
  }

  #[test]
  fn dropping_the_handle_cancels_the_exchange() {
    let (mut core, rx, tx) = setup(Config::default());

    let handle = core.send_req(Req::get(dummy_addr(), "whatever")).unwrap();
    let req_frame = SockMock::sent(&tx).remove(0);
    let (token, addr) = (handle.token(), handle.addr());

    drop(handle);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    // no retransmissions for the cancelled CON
    core.clock.set_millis(60_000);
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
    assert_eq!(SockMock::sent_bytes(&tx).len(), 1);

    // the exchange is gone...
    assert!(matches!(core.poll_resp(token, addr),
                     Err(nb::Error::Other(Error { what: What::ExchangeExpired,
                                                  .. }))));

    // ...and a late reply is rejected with RST
    let reply = Message::new(Type::Non,
                             Code::new(2, 5),
                             Id(4),
                             req_frame.data().token);
    SockMock::inject(&rx, Addrd(reply, dummy_addr()));
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let sent = SockMock::sent(&tx);
    let rst = sent.last().unwrap().data();
    assert_eq!(rst.ty, Type::Reset);
    assert_eq!(rst.id, Id(4));
  }

  #[test]
  fn exchange_expires_when_nothing_ever_answers() {
    let (mut core, _rx, _tx) = setup(Config::default());

    let mut req = Req::get(dummy_addr(), "void");
    req.non();
    let handle = core.send_req(req).unwrap();

    core.clock.set_millis(250_000);
    assert!(matches!(nb::block!(core.poll_resp(handle.token(), handle.addr())),
                     Err(Error { what: What::ExchangeExpired,
                                 .. })));
  }

  #[test]
  fn ping_pong() {
    let (mut core, rx, tx) = setup(Config::default());

    let (id, addr) = core.ping("192.168.0.1", 8080).unwrap();

    let sent = SockMock::sent(&tx);
    assert_eq!(sent[0].data().ty, Type::Con);
    assert_eq!(sent[0].data().code, Code::EMPTY);

    SockMock::inject(&rx, Addrd(Message::empty_reset(id), addr));
    nb::block!(core.poll_ping(id, addr)).unwrap();
  }

  #[test]
  fn ping_times_out_when_nobody_pongs() {
    let (mut core, _rx, _tx) = setup(config(1_000, 2));

    let (id, addr) = core.ping("192.168.0.1", 8080).unwrap();

    core.clock.set_millis(10_000);
    assert!(matches!(nb::block!(core.poll_ping(id, addr)),
                     Err(Error { what: What::Timeout, .. })));
  }

  #[test]
  fn inbound_ping_gets_rst() {
    let (mut core, rx, tx) = setup(Config::default());

    SockMock::inject(&rx, Addrd(Message::ping(Id(5)), dummy_addr()));
    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let sent = SockMock::sent(&tx);
    assert_eq!(sent[0].data().ty, Type::Reset);
    assert_eq!(sent[0].data().code, Code::EMPTY);
    assert_eq!(sent[0].data().id, Id(5));
  }

  #[test]
  fn unknown_critical_option_in_request_gets_bad_option() {
    let (mut core, rx, tx) = setup(Config::default());

    // CON GET id 9, token [1], then option 9 (critical, unknown),
    // zero-length
    let bytes = vec![0b0100_0001, 0x01, 0, 9, 1, 0b1001_0000];
    rx.lock().unwrap().push(Addrd(bytes, dummy_addr()));

    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let sent = SockMock::sent(&tx);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data().ty, Type::Ack);
    assert_eq!(sent[0].data().code, Code::new(4, 2));
    assert_eq!(sent[0].data().id, Id(9));
    assert_eq!(sent[0].data().token, Token(tinyvec::array_vec!([u8; 8] => 1)));
  }

  #[test]
  fn garbage_con_gets_rst() {
    let (mut core, rx, tx) = setup(Config::default());

    // CON frame with a reserved option length nibble
    let bytes = vec![0b0100_0000, 0x01, 0, 77, 0b0001_1111];
    rx.lock().unwrap().push(Addrd(bytes, dummy_addr()));

    assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));

    let sent = SockMock::sent(&tx);
    assert_eq!(sent[0].data().ty, Type::Reset);
    assert_eq!(sent[0].data().id, Id(77));
  }

  mod observe {
    use super::*;

    fn all_con_config() -> Config {
      Config { con_notification_interval: 1,
               ..Config::default() }
    }

    fn register(core: &mut Core, rx: &Frames, token: u64) -> Addrd<Req> {
      let mut msg = con_get(40, token, "temp");
      msg.as_mut().set_observe(0).unwrap();
      SockMock::inject(rx, msg);

      let req = core.poll_req().unwrap();
      core.observe_register("temp", req.addr(), req.data().msg_token())
          .unwrap();

      let mut resp = Resp::for_request(req.data()).unwrap();
      resp.set_payload("v0");
      core.respond(&req, resp).unwrap();
      req
    }

    #[test]
    fn registration_response_carries_initial_seq() {
      let (mut core, rx, tx) = setup(all_con_config());
      core.clock.set_millis(5);

      register(&mut core, &rx, 3);
      assert_eq!(core.observer_count(), 1);

      let sent = SockMock::sent(&tx);
      assert_eq!(sent[0].data().ty, Type::Ack);
      assert_eq!(sent[0].data().observe(), Some(5));
    }

    #[test]
    fn notifications_get_strictly_fresher() {
      let (mut core, rx, tx) = setup(all_con_config());
      register(&mut core, &rx, 3);

      for (i, state) in ["v1", "v2", "v3"].iter().enumerate() {
        core.clock.set_millis(1_000 * (i as u64 + 1));
        core.notify("temp", *state, None).unwrap();
      }

      let sent = SockMock::sent(&tx);
      // registration ACK + 3 notifications
      assert_eq!(sent.len(), 4);

      let mut prev = sent[1].data().observe().unwrap();
      for n in &sent[2..] {
        assert_eq!(n.data().ty, Type::Con);
        assert_eq!(n.data().token, Token::counter(3));
        let seq = n.data().observe().unwrap();
        assert!(fresher(seq, prev));
        prev = seq;
      }
    }

    #[test]
    fn deregistration_empties_the_registry() {
      let (mut core, rx, _tx) = setup(all_con_config());
      let req = register(&mut core, &rx, 3);

      assert_eq!(core.observer_count(), 1);
      assert!(core.observe_deregister(req.addr(), req.data().msg_token()));
      assert_eq!(core.observer_count(), 0);
    }

    #[test]
    fn rst_to_a_notification_removes_the_observer() {
      let (mut core, rx, tx) = setup(all_con_config());
      register(&mut core, &rx, 3);

      core.notify("temp", "v1", None).unwrap();
      let sent = SockMock::sent(&tx);
      let notification = sent.last().unwrap().data();
      assert_eq!(notification.ty, Type::Con);

      SockMock::inject(&rx,
                       Addrd(Message::empty_reset(notification.id), dummy_addr()));
      assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
      assert_eq!(core.observer_count(), 0);
    }

    #[test]
    fn repeatedly_unacked_con_notifications_remove_the_observer() {
      // 1 s timeout, 2 transmissions per CON; 2 consecutive
      // exhausted notifications mean the observer is gone
      let (mut core, rx, _tx) = setup(Config { con_notification_interval: 1,
                                               ..config(1_000, 2) });
      register(&mut core, &rx, 3);

      // notification 1: retransmitted at +1s, given up on at +2s
      core.notify("temp", "v1", None).unwrap();
      core.clock.set_millis(1_000);
      assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
      core.clock.set_millis(2_000);
      assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
      assert_eq!(core.observer_count(), 1);

      // notification 2: same story, and that's one failure too many
      core.notify("temp", "v2", None).unwrap();
      core.clock.set_millis(3_000);
      assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
      core.clock.set_millis(4_000);
      assert!(matches!(core.poll_req(), Err(nb::Error::WouldBlock)));
      assert_eq!(core.observer_count(), 0);
    }

    #[test]
    fn resource_removal_notifies_observers_with_not_found() {
      let (mut core, rx, tx) = setup(all_con_config());
      register(&mut core, &rx, 3);

      core.cancel_observers_of("temp").unwrap();
      assert_eq!(core.observer_count(), 0);

      let sent = SockMock::sent(&tx);
      let bye = sent.last().unwrap().data();
      assert_eq!(bye.code, Code::new(4, 4));
      assert_eq!(bye.token, Token::counter(3));
    }

    #[test]
    fn client_discards_stale_notifications() {
      let (mut core, rx, _tx) = setup(Config::default());

      let mut req = Req::get(dummy_addr(), "temp");
      req.set_observe(Action::Register);
      let handle = core.send_req(req).unwrap();

      let notification = |seq: u32, id: u16, payload: &[u8]| {
        let mut msg = Message::new(Type::Non,
                                   Code::new(2, 5),
                                   Id(id),
                                   handle.token());
        msg.set_observe(seq).unwrap();
        msg.payload = Payload(payload.to_vec());
        Addrd(msg, dummy_addr())
      };

      SockMock::inject(&rx, notification(10, 1, b"fresh"));
      let first = nb::block!(core.poll_resp(handle.token(), handle.addr())).unwrap();
      assert_eq!(first.payload(), b"fresh");

      // an older sequence number arriving late is dropped
      SockMock::inject(&rx, notification(9, 2, b"stale"));
      assert!(matches!(core.poll_resp(handle.token(), handle.addr()),
                       Err(nb::Error::WouldBlock)));

      // fresher one delivered
      SockMock::inject(&rx, notification(11, 3, b"fresher"));
      let third = nb::block!(core.poll_resp(handle.token(), handle.addr())).unwrap();
      assert_eq!(third.payload(), b"fresher");

      // ...and the observation keeps accepting more (not a one-shot
      // exchange)
      SockMock::inject(&rx, notification(12, 4, b"more"));
      assert!(nb::block!(core.poll_resp(handle.token(), handle.addr())).is_ok());
    }

    #[test]
    fn client_accepts_any_seq_after_long_silence() {
      let (mut core, rx, _tx) = setup(Config::default());

      let mut req = Req::get(dummy_addr(), "temp");
      req.set_observe(Action::Register);
      let handle = core.send_req(req).unwrap();

      let mut msg = Message::new(Type::Non, Code::new(2, 5), Id(1), handle.token());
      msg.set_observe(1_000).unwrap();
      SockMock::inject(&rx, Addrd(msg, dummy_addr()));
      nb::block!(core.poll_resp(handle.token(), handle.addr())).unwrap();

      // 129 s later even a smaller sequence number is "fresh"
      core.clock.set_millis(129_000);
      let mut msg = Message::new(Type::Non, Code::new(2, 5), Id(2), handle.token());
      msg.set_observe(3).unwrap();
      SockMock::inject(&rx, Addrd(msg, dummy_addr()));
      assert!(nb::block!(core.poll_resp(handle.token(), handle.addr())).is_ok());
    }
  }
}
