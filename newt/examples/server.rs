use newt::blocking::server::{Server, Service};
use newt::net::Addrd;
use newt::platform::Std;
use newt::req::Req;
use newt::resp::Resp;

/// Says hello, optionally by name (`/hello?name=you`).
struct Hello;

impl Service<Std> for Hello {
  fn path(&self) -> &str {
    "hello"
  }

  fn poll(&mut self, req: &Addrd<Req>) -> Option<Resp> {
    let name = req.data()
                  .uri_query_parameter("name")
                  .unwrap_or_else(|| "world".to_string());

    let mut resp = Resp::for_request(req.data())?;
    resp.set_payload(format!("hello, {}!", name));
    Some(resp)
  }
}

fn main() {
  let mut server = Server::try_new([0, 0, 0, 0], 5683).expect("couldn't bind a socket");
  server.register_service(Box::new(Hello));

  println!("serving coap://0.0.0.0:5683/hello");
  server.run();
}
