// Endpoint attribute flags describing where and how a request arrived

use crate::HttpMethod;
use std::fmt;
use std::net::IpAddr;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// A set of flags describing the network origin, security, verb, call
/// style, format and endpoint kind of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAttributes(u64);

impl EndpointAttributes {
    pub const NONE: Self = Self(0);

    // Network
    pub const LOCALHOST: Self = Self(1 << 0);
    pub const LOCAL_SUBNET: Self = Self(1 << 1);
    pub const EXTERNAL: Self = Self(1 << 2);

    // Security
    pub const SECURE: Self = Self(1 << 3);
    pub const INSECURE: Self = Self(1 << 4);

    // Verbs
    pub const HTTP_GET: Self = Self(1 << 5);
    pub const HTTP_POST: Self = Self(1 << 6);
    pub const HTTP_PUT: Self = Self(1 << 7);
    pub const HTTP_DELETE: Self = Self(1 << 8);
    pub const HTTP_PATCH: Self = Self(1 << 9);
    pub const HTTP_HEAD: Self = Self(1 << 10);
    pub const HTTP_OPTIONS: Self = Self(1 << 11);
    pub const HTTP_OTHER: Self = Self(1 << 12);

    // Call style
    pub const ONE_WAY: Self = Self(1 << 13);
    pub const REPLY: Self = Self(1 << 14);

    // Format
    pub const JSON: Self = Self(1 << 15);
    pub const XML: Self = Self(1 << 16);
    pub const JSV: Self = Self(1 << 17);
    pub const CSV: Self = Self(1 << 18);
    pub const FORM_DATA: Self = Self(1 << 19);
    pub const OTHER_FORMAT: Self = Self(1 << 20);

    // Endpoint
    pub const HTTP: Self = Self(1 << 21);
    pub const MESSAGE_QUEUE: Self = Self(1 << 22);
    pub const TCP: Self = Self(1 << 23);
    pub const GRPC: Self = Self(1 << 24);

    pub const IN_PROCESS: Self = Self(1 << 25);

    pub const INTERNAL_NETWORK_ACCESS: Self = Self(Self::LOCALHOST.0 | Self::LOCAL_SUBNET.0);
    pub const ANY_NETWORK: Self =
        Self(Self::LOCALHOST.0 | Self::LOCAL_SUBNET.0 | Self::EXTERNAL.0);

    const NAMES: [(Self, &'static str); 26] = [
        (Self::LOCALHOST, "Localhost"),
        (Self::LOCAL_SUBNET, "LocalSubnet"),
        (Self::EXTERNAL, "External"),
        (Self::SECURE, "Secure"),
        (Self::INSECURE, "InSecure"),
        (Self::HTTP_GET, "HttpGet"),
        (Self::HTTP_POST, "HttpPost"),
        (Self::HTTP_PUT, "HttpPut"),
        (Self::HTTP_DELETE, "HttpDelete"),
        (Self::HTTP_PATCH, "HttpPatch"),
        (Self::HTTP_HEAD, "HttpHead"),
        (Self::HTTP_OPTIONS, "HttpOptions"),
        (Self::HTTP_OTHER, "HttpOther"),
        (Self::ONE_WAY, "OneWay"),
        (Self::REPLY, "Reply"),
        (Self::JSON, "Json"),
        (Self::XML, "Xml"),
        (Self::JSV, "Jsv"),
        (Self::CSV, "Csv"),
        (Self::FORM_DATA, "FormData"),
        (Self::OTHER_FORMAT, "OtherFormat"),
        (Self::HTTP, "Http"),
        (Self::MESSAGE_QUEUE, "MessageQueue"),
        (Self::TCP, "Tcp"),
        (Self::GRPC, "Grpc"),
        (Self::IN_PROCESS, "InProcess"),
    ];

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Every flag in `other` is also set here.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Flags of `self` that are missing from `actual`.
    pub const fn missing_from(&self, actual: Self) -> Self {
        Self(self.0 & !actual.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Individual flag names, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Look a single flag up by its display name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(flag, _)| *flag)
    }

    pub fn from_verb(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Self::HTTP_GET,
            HttpMethod::POST => Self::HTTP_POST,
            HttpMethod::PUT => Self::HTTP_PUT,
            HttpMethod::DELETE => Self::HTTP_DELETE,
            HttpMethod::PATCH => Self::HTTP_PATCH,
            HttpMethod::HEAD => Self::HTTP_HEAD,
            HttpMethod::OPTIONS => Self::HTTP_OPTIONS,
        }
    }

    /// Verb flag for a raw method name; unknown verbs map to `HTTP_OTHER`.
    pub fn from_verb_name(verb: &str) -> Self {
        HttpMethod::from_str(verb)
            .map(Self::from_verb)
            .unwrap_or(Self::HTTP_OTHER)
    }

    /// The verb flagged in this set, if exactly one known verb is present.
    pub fn verb(&self) -> Option<HttpMethod> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| self.contains(Self::from_verb(*m)))
    }

    /// Classify a remote address into a network flag.
    pub fn from_remote_addr(addr: IpAddr) -> Self {
        if addr.is_loopback() {
            return Self::LOCALHOST;
        }
        let local = match addr {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => {
                let first = v6.segments()[0];
                // fc00::/7 unique local, fe80::/10 link local
                (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
            }
        };
        if local {
            Self::LOCAL_SUBNET
        } else {
            Self::EXTERNAL
        }
    }

    pub fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/json" | "text/json" | "json" => Self::JSON,
            "application/xml" | "text/xml" | "xml" => Self::XML,
            "text/jsv" | "jsv" => Self::JSV,
            "text/csv" | "csv" => Self::CSV,
            "application/x-www-form-urlencoded" | "multipart/form-data" | "form" => {
                Self::FORM_DATA
            }
            _ => Self::OTHER_FORMAT,
        }
    }

    pub fn is_localhost(&self) -> bool {
        self.contains(Self::LOCALHOST)
    }

    pub fn is_internal_network(&self) -> bool {
        self.intersects(Self::INTERNAL_NETWORK_ACCESS)
    }

    pub fn is_external(&self) -> bool {
        self.contains(Self::EXTERNAL)
    }
}

impl BitOr for EndpointAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EndpointAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EndpointAttributes {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for EndpointAttributes {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for EndpointAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        f.write_str(&self.names().join(", "))
    }
}
