use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use reqwest::{Client, ClientBuilder};
use url::Url;

use crate::error::FetchError;
use crate::rewriter::declared_charset;

/// How far into a document a `<meta>` charset declaration is looked for.
const META_SNIFF_LEN: usize = 1024;

/// A successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// URL the body was finally served from, after redirects.
    pub final_url: Url,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedBody {
    /// Whether the server labelled the body as a stylesheet.
    pub fn is_stylesheet(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .is_some_and(|m| m.type_() == mime::TEXT && m.subtype() == mime::CSS)
    }

    /// Charset named by the `Content-Type` header, if it is one we can decode.
    pub fn header_encoding(&self) -> Option<&'static Encoding> {
        let parsed = self.content_type.as_deref()?.parse::<mime::Mime>().ok()?;
        let label = parsed.get_param(mime::CHARSET)?;
        Encoding::for_label(label.as_str().as_bytes())
    }

    /// Decodes the body as markup.
    ///
    /// A byte order mark wins, then the header charset, then a `<meta>`
    /// declaration near the top of the document, then UTF-8. Malformed
    /// sequences become U+FFFD. Returns the text and the encoding used.
    pub fn decode_text(&self) -> (String, &'static Encoding) {
        let encoding = Encoding::for_bom(&self.bytes)
            .map(|(encoding, _)| encoding)
            .or_else(|| self.header_encoding())
            .or_else(|| {
                let head = &self.bytes[..self.bytes.len().min(META_SNIFF_LEN)];
                declared_charset(&String::from_utf8_lossy(head))
                    .and_then(|label| Encoding::for_label(label.as_bytes()))
            })
            .unwrap_or(UTF_8);

        let (text, _) = encoding.decode_with_bom_removal(&self.bytes);
        (text.into_owned(), encoding)
    }
}

/// Retrieves the bytes behind a URL.
///
/// Any non-success status counts as a failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError>;
}

/// `Fetch` over HTTP(S) with a fixed user-agent and a per-request timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody, FetchError> {
        tracing::debug!(%url, "sending request");
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        tracing::debug!(%url, %status, "response received");
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(FetchedBody {
            final_url,
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}
