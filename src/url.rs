//! Absolute `http`/`https` URL splitting for the report endpoint
//!
//! No userinfo, IPv6 literals or fragments; the path and query are kept
//! as a single request target.

use arrayvec::ArrayString;
use core::fmt::Write;

use crate::errors::UrlError;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub scheme: Scheme,
    pub host: &'a str,
    pub port: u16,
    /// Path and query as given, possibly empty
    target: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, UrlError> {
        let (scheme, rest) = url.split_once("://").ok_or(UrlError::MissingScheme)?;
        let scheme = if scheme.eq_ignore_ascii_case("http") {
            Scheme::Http
        } else if scheme.eq_ignore_ascii_case("https") {
            Scheme::Https
        } else {
            return Err(UrlError::UnsupportedScheme);
        };

        let split = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
        let (authority, target) = rest.split_at(split);
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| UrlError::InvalidPort)?,
            ),
            None => (authority, scheme.default_port()),
        };
        if host.is_empty() {
            return Err(UrlError::EmptyHost);
        }
        Ok(Self {
            scheme,
            host,
            port,
            target,
        })
    }

    /// Path part of the request target, `/` when empty
    pub fn path(&self) -> &'a str {
        let path = self.target.split('?').next().unwrap_or("");
        if path.is_empty() {
            "/"
        } else {
            path
        }
    }

    pub fn query(&self) -> Option<&'a str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Write the origin-form request target
    pub fn write_target<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        if !self.target.starts_with('/') {
            out.write_char('/')?;
        }
        out.write_str(self.target)
    }

    /// Resolve a redirect `location` against this URL
    ///
    /// Absolute locations are taken as they are, path-absolute ones keep
    /// this URL's scheme, host and port.
    pub fn resolve<const N: usize>(&self, location: &str) -> Result<ArrayString<N>, UrlError> {
        let mut out = ArrayString::<N>::new();
        if location.contains("://") {
            Url::parse(location)?;
            out.try_push_str(location).map_err(|_| UrlError::TooLong)?;
        } else if location.starts_with('/') {
            write!(out, "{}://{}", self.scheme.as_str(), self.host)
                .map_err(|_| UrlError::TooLong)?;
            if self.port != self.scheme.default_port() {
                write!(out, ":{}", self.port).map_err(|_| UrlError::TooLong)?;
            }
            out.try_push_str(location).map_err(|_| UrlError::TooLong)?;
        } else {
            return Err(UrlError::MissingScheme);
        }
        Ok(out)
    }
}
