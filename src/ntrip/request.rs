//! Parsing of NTRIP 1.0 request headers.
//!
//! Base stations publish with either of
//!
//! ```plain
//! SOURCE <password> /<mountpoint>
//! SOURCE /<mountpoint> HTTP/1.0
//! Icy-Password: <password>
//! ```
//!
//! and rovers subscribe with
//!
//! ```plain
//! GET /<mountpoint> HTTP/1.0
//! Authorization: Basic <base64(username:password)>
//! ```
//!
//! A `GET` for `/` asks for the sourcetable.

use base64::{
    Engine,
    prelude::BASE64_STANDARD,
};

pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("unsupported method: {method}")]
    UnsupportedMethod { method: String },

    #[error("no mountpoint in request")]
    MissingMountpoint,
}

/// Returns the position of the blank line that terminates the header.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Request line and header fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub request_line: Vec<String>,
    pub fields: Vec<(String, String)>,
}

impl Header {
    /// Parses the header text, without the terminating blank line.
    pub fn parse(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .map(|line| line.split_whitespace().map(ToOwned::to_owned).collect())
            .unwrap_or_default();

        let fields = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
            .collect();

        Self {
            request_line,
            fields,
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.request_line.first().map(String::as_str)
    }

    /// Value of the first field with this name. Names are case-insensitive.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Credentials from an `Authorization: Basic` field.
    pub fn basic_auth(&self) -> Option<BasicAuth> {
        let value = self.field("authorization")?;
        let (scheme, encoded) = value.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':').unwrap_or((&decoded, ""));

        Some(BasicAuth {
            username: username.to_owned(),
            password: password.to_owned(),
        })
    }

    /// Arguments of the request line, without the method and a trailing
    /// protocol version.
    fn arguments(&self) -> &[String] {
        let arguments = self.request_line.get(1..).unwrap_or_default();
        match arguments.split_last() {
            Some((last, rest)) if is_protocol_version(last) => rest,
            _ => arguments,
        }
    }
}

fn is_protocol_version(token: &str) -> bool {
    ["HTTP/", "ICY/", "RTSP/"]
        .iter()
        .any(|prefix| token.to_ascii_uppercase().starts_with(prefix))
}

fn mountpoint_from_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or_default();
    path.trim_start_matches('/')
}

#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Places a base station may put its password, in order of priority.
const PASSWORD_SOURCES: &[fn(&Header) -> Option<String>] = &[
    // legacy `SOURCE <password> <mountpoint>`
    |header| {
        match header.arguments() {
            [password, _mountpoint, ..] => Some(password.clone()),
            _ => None,
        }
    },
    |header| header.field("icy-password").map(ToOwned::to_owned),
    |header| header.basic_auth().map(|auth| auth.password),
];

/// Classified request.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    /// A base station wants to publish.
    Source {
        mountpoint: String,
        password: Option<String>,
    },

    /// A rover wants to subscribe.
    Get {
        mountpoint: String,
        credentials: Option<BasicAuth>,
    },

    /// A client asks for the list of mountpoints.
    Sourcetable,
}

impl Request {
    pub fn parse(header: &Header) -> Result<Self, RequestError> {
        let method = header.method().ok_or(RequestError::Empty)?;

        match method {
            "SOURCE" => {
                let mountpoint = match header.arguments() {
                    [mountpoint] | [_, mountpoint, ..] => mountpoint_from_path(mountpoint),
                    [] => "",
                };
                if mountpoint.is_empty() {
                    return Err(RequestError::MissingMountpoint);
                }

                let password = PASSWORD_SOURCES
                    .iter()
                    .find_map(|source| source(header).filter(|password| !password.is_empty()));

                Ok(Self::Source {
                    mountpoint: mountpoint.to_owned(),
                    password,
                })
            }
            "GET" => {
                let mountpoint = header
                    .arguments()
                    .first()
                    .map(|path| mountpoint_from_path(path))
                    .unwrap_or_default();

                if mountpoint.is_empty() {
                    Ok(Self::Sourcetable)
                }
                else {
                    Ok(Self::Get {
                        mountpoint: mountpoint.to_owned(),
                        credentials: header.basic_auth(),
                    })
                }
            }
            _ => {
                Err(RequestError::UnsupportedMethod {
                    method: method.to_owned(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source {
                mountpoint,
                password,
            } => {
                f.debug_struct("Source")
                    .field("mountpoint", mountpoint)
                    .field("has_password", &password.is_some())
                    .finish()
            }
            Self::Get {
                mountpoint,
                credentials,
            } => {
                f.debug_struct("Get")
                    .field("mountpoint", mountpoint)
                    .field("credentials", credentials)
                    .finish()
            }
            Self::Sourcetable => write!(f, "Sourcetable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{
        Engine,
        prelude::BASE64_STANDARD,
    };

    use crate::ntrip::request::{
        BasicAuth,
        Header,
        Request,
        RequestError,
        find_header_end,
    };

    fn parse(text: &str) -> Result<Request, RequestError> {
        Request::parse(&Header::parse(text.as_bytes()))
    }

    fn authorization(username: &str, password: &str) -> String {
        format!(
            "Authorization: Basic {}",
            BASE64_STANDARD.encode(format!("{username}:{password}"))
        )
    }

    #[test]
    fn it_finds_the_header_end() {
        let data = b"SOURCE pw /MP\r\nSource-Agent: x\r\n\r\n\xd3\x00\x13";
        let end = find_header_end(data).unwrap();
        assert_eq!(&data[end + 4..], b"\xd3\x00\x13");
        assert_eq!(find_header_end(b"SOURCE pw /MP\r\n"), None);
    }

    #[test]
    fn legacy_source() {
        assert_eq!(
            parse("SOURCE secret /TEST01\r\nSource-Agent: NTRIP test"),
            Ok(Request::Source {
                mountpoint: "TEST01".to_owned(),
                password: Some("secret".to_owned()),
            })
        );
        assert_eq!(
            parse("SOURCE secret TEST01"),
            Ok(Request::Source {
                mountpoint: "TEST01".to_owned(),
                password: Some("secret".to_owned()),
            })
        );
    }

    #[test]
    fn source_with_icy_password() {
        assert_eq!(
            parse("SOURCE /LMB1 HTTP/1.0\r\nSource-Agent: TestBase/1.0\r\nIcy-Password: 1234"),
            Ok(Request::Source {
                mountpoint: "LMB1".to_owned(),
                password: Some("1234".to_owned()),
            })
        );
        assert_eq!(
            parse("SOURCE /LMB1\r\nicy-password: 1234"),
            Ok(Request::Source {
                mountpoint: "LMB1".to_owned(),
                password: Some("1234".to_owned()),
            })
        );
    }

    #[test]
    fn source_with_basic_auth() {
        assert_eq!(
            parse(&format!(
                "SOURCE /LMB1 HTTP/1.1\r\n{}",
                authorization("LMB1", "pw")
            )),
            Ok(Request::Source {
                mountpoint: "LMB1".to_owned(),
                password: Some("pw".to_owned()),
            })
        );
    }

    #[test]
    fn request_line_password_has_priority() {
        assert_eq!(
            parse(&format!(
                "SOURCE first /MP\r\nIcy-Password: second\r\n{}",
                authorization("MP", "third")
            )),
            Ok(Request::Source {
                mountpoint: "MP".to_owned(),
                password: Some("first".to_owned()),
            })
        );
        assert_eq!(
            parse(&format!(
                "SOURCE /MP\r\nIcy-Password:\r\n{}",
                authorization("MP", "third")
            )),
            Ok(Request::Source {
                mountpoint: "MP".to_owned(),
                password: Some("third".to_owned()),
            })
        );
    }

    #[test]
    fn source_without_password() {
        assert_eq!(
            parse("SOURCE /MP HTTP/1.0"),
            Ok(Request::Source {
                mountpoint: "MP".to_owned(),
                password: None,
            })
        );
        assert_eq!(parse("SOURCE"), Err(RequestError::MissingMountpoint));
        assert_eq!(parse("SOURCE pw /"), Err(RequestError::MissingMountpoint));
    }

    #[test]
    fn get_mountpoint() {
        assert_eq!(
            parse(&format!(
                "GET /LMB1 HTTP/1.0\r\nUser-Agent: NTRIP Client/1.0\r\n{}",
                authorization("LMR1", "1234")
            )),
            Ok(Request::Get {
                mountpoint: "LMB1".to_owned(),
                credentials: Some(BasicAuth {
                    username: "LMR1".to_owned(),
                    password: "1234".to_owned(),
                }),
            })
        );
        assert_eq!(
            parse("GET /LMB1 HTTP/1.0\r\nUser-Agent: NTRIP Client/1.0"),
            Ok(Request::Get {
                mountpoint: "LMB1".to_owned(),
                credentials: None,
            })
        );
    }

    #[test]
    fn get_root_is_sourcetable() {
        assert_eq!(parse("GET / HTTP/1.0"), Ok(Request::Sourcetable));
        assert_eq!(parse("GET HTTP/1.0"), Ok(Request::Sourcetable));
        assert_eq!(parse("GET"), Ok(Request::Sourcetable));
    }

    #[test]
    fn malformed_basic_auth_is_ignored() {
        let header = Header::parse(b"GET /MP HTTP/1.0\r\nAuthorization: Basic !!!");
        assert_eq!(header.basic_auth(), None);
        let header = Header::parse(b"GET /MP HTTP/1.0\r\nAuthorization: Bearer abc");
        assert_eq!(header.basic_auth(), None);
    }

    #[test]
    fn other_methods_are_rejected() {
        assert_eq!(
            parse("POST /MP HTTP/1.1"),
            Err(RequestError::UnsupportedMethod {
                method: "POST".to_owned()
            })
        );
        assert_eq!(parse(""), Err(RequestError::Empty));
    }
}
