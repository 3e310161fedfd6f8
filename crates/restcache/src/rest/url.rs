use std::borrow::Cow;

use url::Url;

use crate::error::ConfigError;

/// Query parameters, kept in insertion order of their distinct names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryParams {
    /// Parses the query of a URL.
    ///
    /// Comma separated values are split before decoding, so that they are joined back the
    /// same way while encoded commas stay part of their value.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = decode_form(name);
            for value in value.split(',') {
                params.push(name.clone(), decode_form(value));
            }
        }
        params
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    fn push(&mut self, name: String, value: String) {
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Appends a percent-encoded or plain value to `name`.
    pub fn add(&mut self, name: &str, value: &str) {
        self.push(decode(name).into_owned(), decode(value).into_owned());
    }

    /// Replaces all values of `name`, keeping its original position.
    pub fn set(&mut self, name: &str, value: &str) {
        let name = decode(name).into_owned();
        let value = decode(value).into_owned();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value],
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Returns the decoded values of `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|idx| self.entries[idx].1.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the parameters as query string, in insertion order.
    pub fn encode(&self) -> String {
        encode_entries(self.entries.iter())
    }

    /// Encodes the parameters sorted by name, as used for cache keys.
    pub fn canonical(&self) -> String {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        encode_entries(entries.into_iter())
    }
}

fn encode_entries<'a>(entries: impl Iterator<Item = &'a (String, Vec<String>)>) -> String {
    let mut out = String::new();
    for (name, values) in entries {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&urlencoding::encode(name));
        out.push('=');
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&urlencoding::encode(value));
        }
    }
    out
}

fn decode(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

/// Decodes a query component, where `+` stands for a space.
fn decode_form(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    decode(&raw).into_owned()
}

/// Returns the first character that is not allowed anywhere in a URL by RFC 3986.
pub fn find_invalid_char(url: &str) -> Option<char> {
    url.chars().find(|c| {
        !(c.is_ascii_alphanumeric()
            || matches!(
                c,
                // unreserved
                '-' | '.' | '_' | '~'
                // gen-delims
                | ':' | '/' | '?' | '#' | '[' | ']' | '@'
                // sub-delims
                | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ';' | '='
                // percent-encoding
                | '%'
            ))
    })
}

/// A URL split into the parts used for sending and for keying.
#[derive(Debug, Clone)]
pub struct RequestUrl {
    /// The URL sent on the wire.
    pub url: Url,
    /// Scheme, host, port, path and sorted query.
    pub canonical: String,
    pub params: QueryParams,
}

impl RequestUrl {
    /// Merges `base` with `params` applied on top of the query `base` already carries.
    pub fn build(
        base: &str,
        apply: impl FnOnce(&mut QueryParams),
    ) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let mut params = url.query().map(QueryParams::from_query).unwrap_or_default();
        apply(&mut params);

        url.set_fragment(None);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&params.encode()));
        }

        let mut canonical = format!(
            "{}://{}:{}{}",
            url.scheme(),
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default(),
            url.path()
        );
        if !params.is_empty() {
            canonical.push('?');
            canonical.push_str(&params.canonical());
        }

        Ok(Self {
            url,
            canonical,
            params,
        })
    }
}
