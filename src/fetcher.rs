use std::borrow::Cow;
use std::time::Duration;

use quick_xml::errors::IllFormedError;
use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

pub const USER_AGENT: &str = "gator";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest HTML5 entity name is 31 bytes
const MAX_ENTITY_LEN: usize = 32;

/// Entities HTML allows without the trailing `;`, sorted for binary search
const BARE_ENTITIES: [&str; 106] = [
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY",
    "Ccedil", "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc",
    "Igrave", "Iuml", "LT", "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde",
    "Ouml", "QUOT", "REG", "THORN", "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute",
    "aacute", "acirc", "acute", "aelig", "agrave", "amp", "aring", "atilde", "auml",
    "brvbar", "ccedil", "cedil", "cent", "copy", "curren", "deg", "divide", "eacute",
    "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34", "gt", "iacute",
    "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm",
    "oslash", "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg",
    "sect", "shy", "sup1", "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc",
    "ugrave", "uml", "uuml", "yacute", "yen", "yuml",
];

const LONGEST_BARE_ENTITY: usize = 6;

/// Numeric references in 0x80..=0x9F are read as Windows-1252
const WINDOWS_1252: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}',
    '\u{2021}', '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}',
    '\u{017D}', '\u{008F}', '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}',
    '\u{2022}', '\u{2013}', '\u{2014}', '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}',
    '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("building http client")]
    Client(#[source] reqwest::Error),

    #[error("creating request")]
    Request(#[source] reqwest::Error),

    #[error("sending request")]
    Send(#[source] reqwest::Error),

    #[error("bad status: {0}")]
    BadStatus(StatusCode),

    #[error("reading response body")]
    Body(#[source] reqwest::Error),

    #[error("unmarshaling XML")]
    Xml(#[from] quick_xml::Error),

    #[error("unmarshaling XML: no root element")]
    NoRoot,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RssFeed {
    pub channel: RssChannel,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RssChannel {
    pub title: String,
    pub description: String,
    pub link: String,
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RssItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: String,
}

impl RssFeed {
    /// Parse an RSS document and decode HTML entities left in titles and
    /// descriptions after XML decoding.
    ///
    /// Elements are matched by local name, so `<atom:link href=".."/>` is
    /// read as a `link` with no text and never shadows the real one.
    pub fn parse(xml: &str) -> Result<Self, FetchError> {
        let mut reader = Reader::from_str(xml);
        let mut builder = FeedBuilder::default();

        loop {
            match reader.read_event()? {
                Event::Start(e) => builder.start(e.local_name().as_ref()),
                Event::Empty(e) => {
                    builder.start(e.local_name().as_ref());
                    builder.end();
                }
                Event::End(_) => builder.end(),
                Event::Text(e) if builder.capturing() => builder.text(&e.unescape()?),
                Event::CData(e) if builder.capturing() => {
                    builder.text(&e.decode().map_err(quick_xml::Error::from)?)
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let mut feed = builder.finish()?;
        feed.decode_entities();
        Ok(feed)
    }

    fn decode_entities(&mut self) {
        let channel = &mut self.channel;
        decode_in_place(&mut channel.title);
        decode_in_place(&mut channel.description);

        for item in &mut channel.items {
            decode_in_place(&mut item.title);
            decode_in_place(&mut item.description);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Description,
    Link,
    PubDate,
}

/// Text collected for one channel or item field, including the text of any
/// markup nested inside it.
#[derive(Debug)]
struct Capture {
    field: Field,
    in_item: bool,
    depth: usize,
    text: String,
}

/// Builds an `RssFeed` from reader events. Depth 1 is the root element,
/// `<channel>` sits at depth 2 and `<item>` at depth 3.
#[derive(Debug, Default)]
struct FeedBuilder {
    feed: RssFeed,
    open: Vec<String>,
    seen_root: bool,
    in_channel: bool,
    in_item: bool,
    capture: Option<Capture>,
}

impl FeedBuilder {
    fn capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn start(&mut self, name: &[u8]) {
        self.open.push(String::from_utf8_lossy(name).into_owned());
        self.seen_root = true;
        if self.capturing() {
            return;
        }

        let depth = self.open.len();
        match (depth, name) {
            (2, b"channel") => self.in_channel = true,
            (3, b"item") if self.in_channel => {
                self.in_item = true;
                self.feed.channel.items.push(RssItem::default());
            }
            _ => {
                let in_item = match depth {
                    3 if self.in_channel => false,
                    4 if self.in_item => true,
                    _ => return,
                };
                let field = match name {
                    b"title" => Field::Title,
                    b"description" => Field::Description,
                    b"link" => Field::Link,
                    b"pubDate" if in_item => Field::PubDate,
                    _ => return,
                };
                self.capture = Some(Capture {
                    field,
                    in_item,
                    depth,
                    text: String::new(),
                });
            }
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(capture) = &mut self.capture {
            capture.text.push_str(text);
        }
    }

    fn end(&mut self) {
        let depth = self.open.len();
        self.open.pop();

        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let Some(capture) = self.capture.take() {
                self.store(capture);
            }
            return;
        }

        match depth {
            3 => self.in_item = false,
            2 => self.in_channel = false,
            _ => {}
        }
    }

    /// Repeated fields keep the first value that has text.
    fn store(&mut self, capture: Capture) {
        let channel = &mut self.feed.channel;
        let slot = match (capture.in_item, capture.field) {
            (false, Field::Title) => &mut channel.title,
            (false, Field::Description) => &mut channel.description,
            (false, Field::Link) => &mut channel.link,
            (false, Field::PubDate) => return,
            (true, field) => {
                let Some(item) = channel.items.last_mut() else {
                    return;
                };
                match field {
                    Field::Title => &mut item.title,
                    Field::Description => &mut item.description,
                    Field::Link => &mut item.link,
                    Field::PubDate => &mut item.pub_date,
                }
            }
        };

        let value = capture.text.trim();
        if slot.is_empty() && !value.is_empty() {
            *slot = value.to_string();
        }
    }

    fn finish(mut self) -> Result<RssFeed, FetchError> {
        if let Some(name) = self.open.pop() {
            return Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(name)).into());
        }
        if !self.seen_root {
            return Err(FetchError::NoRoot);
        }
        Ok(self.feed)
    }
}

fn decode_in_place(text: &mut String) {
    if let Cow::Owned(decoded) = decode_html_entities(text) {
        *text = decoded;
    }
}

/// Replace named and numeric HTML character references with the characters
/// they stand for, the way browsers read text content. References that do
/// not resolve are kept verbatim.
pub fn decode_html_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];

        let resolved = match tail.strip_prefix('#') {
            Some(number) => decode_numeric(number)
                .map(|(ch, len)| (Cow::Owned(ch.to_string()), len + 1)),
            None => decode_named(tail).map(|(value, len)| (Cow::Borrowed(value), len)),
        };

        match resolved {
            Some((value, len)) => {
                out.push_str(&value);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// `number` follows `&#`. Returns the character and the bytes consumed,
/// including an optional `;`.
fn decode_numeric(number: &str) -> Option<(char, usize)> {
    let (radix, prefix) = match number.as_bytes().first() {
        Some(b'x' | b'X') => (16, 1),
        _ => (10, 0),
    };

    let digits = &number[prefix..];
    let count = digits
        .bytes()
        .take_while(|b| char::from(*b).is_digit(radix))
        .count();
    if count == 0 {
        return None;
    }

    let code = digits[..count].chars().fold(0u32, |acc, c| {
        acc.saturating_mul(radix)
            .saturating_add(c.to_digit(radix).unwrap_or(0))
    });

    let mut len = prefix + count;
    if number[len..].starts_with(';') {
        len += 1;
    }
    Some((code_point(code), len))
}

fn code_point(code: u32) -> char {
    match code {
        0 => char::REPLACEMENT_CHARACTER,
        0x80..=0x9F => WINDOWS_1252[(code - 0x80) as usize],
        _ => char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
    }
}

/// `tail` follows `&`. A name terminated by `;` is looked up in the full
/// HTML5 table; otherwise the longest bare entity prefix wins, so `&copy2024`
/// reads as `©2024`.
fn decode_named(tail: &str) -> Option<(&'static str, usize)> {
    let len = tail
        .bytes()
        .take(MAX_ENTITY_LEN)
        .take_while(u8::is_ascii_alphanumeric)
        .count();
    if len == 0 {
        return None;
    }
    let name = &tail[..len];

    if tail[len..].starts_with(';') {
        if let Some(value) = resolve_html5_entity(name) {
            return Some((value, len + 1));
        }
    }

    (2..=len.min(LONGEST_BARE_ENTITY)).rev().find_map(|end| {
        let prefix = &name[..end];
        BARE_ENTITIES
            .binary_search(&prefix)
            .ok()
            .and_then(|_| resolve_html5_entity(prefix))
            .map(|value| (value, end))
    })
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client })
    }

    /// GET `url` and parse the body as RSS. Anything but a 200 is an error.
    pub async fn fetch_feed(&self, url: &str) -> Result<RssFeed, FetchError> {
        info!("Fetching feed: {}", url);

        let request = self.client.get(url).build().map_err(FetchError::Request)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(FetchError::Send)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::BadStatus(status));
        }

        let body = response.text().await.map_err(FetchError::Body)?;
        let feed = RssFeed::parse(&body)?;

        debug!(
            "Parsed feed '{}' with {} items",
            feed.channel.title,
            feed.channel.items.len()
        );
        Ok(feed)
    }
}
