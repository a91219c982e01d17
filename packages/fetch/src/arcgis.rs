//! Paginated `ArcGIS` `MapServer` / `FeatureServer` fetcher.
//!
//! Walks a layer's `query` endpoint with `resultOffset` +
//! `resultRecordCount`, accumulating features until a page arrives with
//! `exceededTransferLimit: false`. The total count is never requested:
//! the truncation flag is the canonical signal, since servers silently cap
//! pages at their own `maxRecordCount`.

use metro_map_geometry_models::{Feature, FeatureCollection, Geometry, PropertyValue};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{FetchError, RetryingFetcher};

/// Output spatial reference requested from the server (WGS84).
pub const OUTPUT_SPATIAL_REFERENCE: u32 = 4326;

/// Default generalization tolerance, in output units (degrees).
pub const DEFAULT_MAX_ALLOWABLE_OFFSET: f64 = 0.001;

/// Default number of extra fetches for a page whose body fails to decode.
pub const DEFAULT_DECODE_RETRIES: u32 = 2;

/// Maximum length of a body preview included in decode error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// One `ArcGIS` layer to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ArcGisLayer {
    /// Label for log messages (e.g. `"counties"`).
    pub label: String,
    /// Layer URL, without the trailing `/query`.
    pub url: String,
    /// `where` clause selecting the features to fetch.
    #[serde(rename = "where", default = "default_where")]
    pub filter: String,
    /// Features requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_where() -> String {
    "1=1".to_string()
}

const fn default_page_size() -> u32 {
    2000
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    features: Vec<EsriFeature>,
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: bool,
}

#[derive(Debug, Deserialize)]
struct EsriFeature {
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    geometry: Option<serde_json::Value>,
}

/// A decoded page.
#[derive(Debug)]
struct Page {
    features: Vec<Feature>,
    exceeded_transfer_limit: bool,
}

#[derive(Debug)]
enum PageError {
    Upstream { code: i64, message: String },
    Malformed(String),
}

/// Fetches every feature of an `ArcGIS` layer, one page at a time.
#[derive(Debug, Clone)]
pub struct PaginatedFeatureFetcher {
    fetcher: RetryingFetcher,
    max_allowable_offset: f64,
    decode_retries: u32,
}

impl PaginatedFeatureFetcher {
    /// Creates a pager that sends each page request through `fetcher`.
    #[must_use]
    pub const fn new(fetcher: RetryingFetcher) -> Self {
        Self {
            fetcher,
            max_allowable_offset: DEFAULT_MAX_ALLOWABLE_OFFSET,
            decode_retries: DEFAULT_DECODE_RETRIES,
        }
    }

    /// Sets the geometry generalization tolerance sent as
    /// `maxAllowableOffset`.
    #[must_use]
    pub const fn with_max_allowable_offset(mut self, offset: f64) -> Self {
        self.max_allowable_offset = offset;
        self
    }

    /// Sets how many times an undecodable page is re-fetched before giving
    /// up with [`FetchError::Decode`].
    #[must_use]
    pub const fn with_decode_retries(mut self, retries: u32) -> Self {
        self.decode_retries = retries;
        self
    }

    /// Builds the `query` URL for the page starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] if the layer URL does not
    /// parse.
    pub fn page_url(&self, layer: &ArcGisLayer, offset: usize) -> Result<String, FetchError> {
        let endpoint = format!("{}/query", layer.url.trim_end_matches('/'));
        let params = [
            ("f", "json".to_string()),
            ("outFields", "*".to_string()),
            ("outSR", OUTPUT_SPATIAL_REFERENCE.to_string()),
            ("maxAllowableOffset", self.max_allowable_offset.to_string()),
            ("returnGeometry", "true".to_string()),
            ("where", layer.filter.clone()),
            ("resultRecordCount", layer.page_size.to_string()),
            ("resultOffset", offset.to_string()),
        ];
        reqwest::Url::parse_with_params(&endpoint, &params)
            .map(String::from)
            .map_err(|e| FetchError::InvalidRequest {
                url: endpoint,
                message: e.to_string(),
            })
    }

    /// Fetches every feature matching the layer's filter.
    ///
    /// Pages are requested strictly in sequence, each offset by the number
    /// of features received so far. Features are returned in page order,
    /// then in-page order, without deduplication.
    ///
    /// # Errors
    ///
    /// * [`FetchError::Upstream`] as soon as any page carries an error
    ///   envelope; no later pages are requested.
    /// * [`FetchError::Decode`] if a page still cannot be decoded after its
    ///   re-fetch budget.
    /// * Any [`RetryingFetcher::fetch`] error (exhaustion, cancellation).
    pub async fn fetch_all(
        &self,
        layer: &ArcGisLayer,
        cancel: Option<&CancellationToken>,
    ) -> Result<FeatureCollection, FetchError> {
        let label = &layer.label;
        let mut collection = FeatureCollection::new();

        loop {
            let offset = collection.len();
            let url = self.page_url(layer, offset)?;
            log::debug!("{label}: querying {url}");

            let page = self.fetch_page(&url, cancel).await?;
            let page_len = page.features.len();
            collection.extend(page.features);

            if !page.exceeded_transfer_limit {
                break;
            }
            if page_len == 0 {
                log::warn!(
                    "{label}: server reported more results but returned an empty page \
                     at offset {offset}, stopping"
                );
                break;
            }

            log::info!(
                "{label}: fetched {page_len} features (total so far: {}), fetching next page...",
                collection.len()
            );
        }

        log::info!("{label}: download complete, {} features", collection.len());
        Ok(collection)
    }

    /// Fetches and decodes a single page, re-fetching undecodable bodies.
    async fn fetch_page(
        &self,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Page, FetchError> {
        let total = self.decode_retries + 1;
        let mut attempt = 1;

        loop {
            let body = self.fetcher.fetch(url, cancel).await?;

            let message = match decode_page(&body) {
                Ok(page) => return Ok(page),
                Err(PageError::Upstream { code, message }) => {
                    return Err(FetchError::Upstream {
                        url: url.to_string(),
                        code,
                        message,
                    });
                }
                Err(PageError::Malformed(message)) => message,
            };

            log::warn!(
                "page decode attempt {attempt}/{total} for {url} failed: {message}\n  \
                 received: {} bytes\n  \
                 body preview: {}",
                body.len(),
                preview(&body),
            );
            if attempt >= total {
                return Err(FetchError::Decode {
                    url: url.to_string(),
                    message,
                });
            }
            self.fetcher.pause(attempt, url, cancel).await?;
            attempt += 1;
        }
    }
}

/// Decodes one page body. An `error` member wins over everything else.
fn decode_page(body: &[u8]) -> Result<Page, PageError> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| PageError::Malformed(e.to_string()))?;

    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let envelope: ErrorEnvelope = serde_json::from_value(error.clone())
            .map_err(|e| PageError::Malformed(format!("unreadable error envelope: {e}")))?;
        return Err(PageError::Upstream {
            code: envelope.code,
            message: envelope.message,
        });
    }

    let envelope: PageEnvelope =
        serde_json::from_value(json).map_err(|e| PageError::Malformed(e.to_string()))?;

    let features = envelope
        .features
        .into_iter()
        .enumerate()
        .map(|(i, feature)| {
            let geometry = feature
                .geometry
                .filter(|g| !g.is_null())
                .ok_or_else(|| PageError::Malformed(format!("feature {i} has no geometry")))?;
            let geometry = Geometry::from_esri_json(&geometry)
                .map_err(|e| PageError::Malformed(format!("feature {i}: {e}")))?;
            let properties = feature
                .attributes
                .into_iter()
                .map(|(name, value)| (name, PropertyValue::from(value)))
                .collect();
            Ok(Feature {
                geometry,
                properties,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        features,
        exceeded_transfer_limit: envelope.exceeded_transfer_limit,
    })
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > BODY_PREVIEW_LEN {
        let cut: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{cut}...")
    } else {
        text.into_owned()
    }
}
