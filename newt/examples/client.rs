use newt::blocking::Client;
use newt::req::{Method, Req};

fn main() {
  let mut client = Client::new_std(1111).expect("couldn't bind a socket");

  let req = Req::from_uri(Method::GET, "coap://127.0.0.1:5683/hello?name=newt", false)
              .expect("bad uri");

  match client.send_addrd_request(req)
              .and_then(|handle| client.wait(&handle))
  {
    | Ok(rep) => println!("{}.{:02}: {}",
                          rep.code().class,
                          rep.code().detail,
                          rep.payload_str().unwrap_or("<not utf8>")),
    | Err(e) => eprintln!("request failed: {:?}", e),
  }
}
