use newt_msg::Code;

macro_rules! code {
  (#[doc = $doc:expr] $name:ident = $c:literal . $d:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: Code = Code::new($c, $d);
  };
}

code!(#[doc = "2.01 Created"]  CREATED = 2 . 01);
code!(#[doc = "2.02 Deleted"]  DELETED = 2 . 02);
code!(#[doc = "2.03 Valid"]    VALID = 2 . 03);
code!(#[doc = "2.04 Changed"]  CHANGED = 2 . 04);
code!(#[doc = "2.05 Content"]  CONTENT = 2 . 05);

code!(#[doc = "4.00 Bad Request"]                BAD_REQUEST = 4 . 00);
code!(#[doc = "4.01 Unauthorized"]               UNAUTHORIZED = 4 . 01);
code!(#[doc = "4.02 Bad Option"]                 BAD_OPTION = 4 . 02);
code!(#[doc = "4.03 Forbidden"]                  FORBIDDEN = 4 . 03);
code!(#[doc = "4.04 Not Found"]                  NOT_FOUND = 4 . 04);
code!(#[doc = "4.05 Method Not Allowed"]         METHOD_NOT_ALLOWED = 4 . 05);
code!(#[doc = "4.06 Not Acceptable"]             NOT_ACCEPTABLE = 4 . 06);
code!(#[doc = "4.12 Precondition Failed"]        PRECONDITION_FAILED = 4 . 12);
code!(#[doc = "4.13 Request Entity Too Large"]   REQUEST_ENTITY_TOO_LARGE = 4 . 13);
code!(#[doc = "4.15 Unsupported Content-Format"] UNSUPPORTED_CONTENT_FORMAT = 4 . 15);

code!(#[doc = "5.00 Internal Server Error"]  INTERNAL_SERVER_ERROR = 5 . 00);
code!(#[doc = "5.01 Not Implemented"]        NOT_IMPLEMENTED = 5 . 01);
code!(#[doc = "5.02 Bad Gateway"]            BAD_GATEWAY = 5 . 02);
code!(#[doc = "5.03 Service Unavailable"]    SERVICE_UNAVAILABLE = 5 . 03);
code!(#[doc = "5.04 Gateway Timeout"]        GATEWAY_TIMEOUT = 5 . 04);
code!(#[doc = "5.05 Proxying Not Supported"] PROXYING_NOT_SUPPORTED = 5 . 05);
