/// Well-known Content-Format values
/// (RFC 7252 section 12.3, CoAP Content-Formats registry)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8` (0)
  Text,
  /// `application/link-format` (40)
  LinkFormat,
  /// `application/xml` (41)
  Xml,
  /// `application/octet-stream` (42)
  OctetStream,
  /// `application/exi` (47)
  Exi,
  /// `application/json` (50)
  Json,
  /// A content format not listed in RFC 7252
  Other(u16),
}

impl ContentFormat {
  /// The numeric value used on the wire
  pub fn value(&self) -> u16 {
    use ContentFormat::*;
    match *self {
      | Text => 0,
      | LinkFormat => 40,
      | Xml => 41,
      | OctetStream => 42,
      | Exi => 47,
      | Json => 50,
      | Other(n) => n,
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    use ContentFormat::*;
    match n {
      | 0 => Text,
      | 40 => LinkFormat,
      | 41 => Xml,
      | 42 => OctetStream,
      | 47 => Exi,
      | 50 => Json,
      | n => Other(n),
    }
  }
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    f.value()
  }
}
