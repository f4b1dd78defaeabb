use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use quick_xml::de::from_str;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use serde::Deserialize;

use crate::error::CoreError;
use crate::ingest::IngestItem;
use crate::store::Metadata;

/// Media types whose `xmlns` declares a DASH MPD document this handler
/// understands.
const RECOGNISED_XMLNS: &[&str] = &["urn:mpeg:dash:schema:mpd:2011"];

/// Fallback deadline used when a manifest carries no usable segment
/// duration.
const FALLBACK_DEADLINE: Duration = Duration::from_secs(4);

/// Plug-point keyed by media type: validates/parses a manifest and derives
/// a schedule of ingest items.
pub trait ManifestHandler: Send + Sync {
    /// `true` if this handler's media type claim matches.
    fn accepts(&self, media_type: Option<&str>) -> bool;

    /// Validate and absorb a new manifest body. Returns `true` if it differs
    /// from the manifest currently held, `Err(InvalidManifest)` if it does
    /// not parse/validate.
    fn update(&self, bytes: &[u8], metadata: &Metadata) -> Result<bool, CoreError>;

    /// The earliest wall-clock time the caller should next invoke this,
    /// plus the items to schedule now.
    fn next_ingest_items(&self) -> (SystemTime, Vec<IngestItem>);

    /// Duration used when the scheduler has no other bound.
    fn default_deadline(&self) -> Duration;
}

#[derive(Debug, Deserialize, Default, Clone)]
struct SegmentTemplate {
    #[serde(rename = "@media")]
    media: Option<String>,
    #[serde(rename = "@duration")]
    duration: Option<u64>,
    #[serde(rename = "@timescale")]
    timescale: Option<u64>,
    #[serde(rename = "@startNumber")]
    start_number: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct Representation {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
}

#[derive(Debug, Deserialize, Default)]
struct AdaptationSet {
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "Representation", default)]
    representation: Vec<Representation>,
}

#[derive(Debug, Deserialize, Default)]
struct Period {
    #[serde(rename = "AdaptationSet", default)]
    adaptation_set: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize, Default)]
struct Mpd {
    #[serde(rename = "Period", default)]
    period: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq)]
struct RepresentationSchedule {
    media_template: String,
    duration_secs: f64,
    next_number: u64,
}

struct DashState {
    representations: Vec<RepresentationSchedule>,
    raw_len: usize,
}

/// DASH MPD manifest handler: validates the root element/namespace, then
/// derives a per-representation `$Number$` segment schedule from
/// `SegmentTemplate`. The upstream project leaves this scheduling logic as
/// a hardcoded stub; this is a genuine (if simplified) implementation of
/// the contract it stubs out.
pub struct DashManifestHandler {
    state: Mutex<Option<DashState>>,
}

impl DashManifestHandler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }
}

impl Default for DashManifestHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestHandler for DashManifestHandler {
    fn accepts(&self, media_type: Option<&str>) -> bool {
        matches!(media_type, Some("application/dash+xml") | None)
    }

    fn update(&self, bytes: &[u8], metadata: &Metadata) -> Result<bool, CoreError> {
        if let Some(media_type) = &metadata.media_type {
            if media_type != "application/dash+xml" {
                return Err(CoreError::InvalidManifest(format!(
                    "unexpected media type for DASH manifest: {media_type}"
                )));
            }
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|e| CoreError::InvalidManifest(format!("manifest is not valid UTF-8: {e}")))?;

        validate_root_element(text)?;

        let mpd: Mpd = from_str(text)
            .map_err(|e| CoreError::InvalidManifest(format!("failed to parse MPD: {e}")))?;

        let representations = derive_schedule(&mpd);
        if representations.is_empty() {
            return Err(CoreError::InvalidManifest(
                "manifest has no representations with a SegmentTemplate".to_string(),
            ));
        }

        let mut state = self.state.lock().unwrap();
        let changed = state
            .as_ref()
            .map(|s| s.raw_len != bytes.len() || s.representations != representations)
            .unwrap_or(true);
        *state = Some(DashState {
            representations,
            raw_len: bytes.len(),
        });
        Ok(changed)
    }

    fn next_ingest_items(&self) -> (SystemTime, Vec<IngestItem>) {
        let mut state = self.state.lock().unwrap();
        let Some(state) = state.as_mut() else {
            return (SystemTime::now() + FALLBACK_DEADLINE, Vec::new());
        };

        let now = SystemTime::now();
        let mut items = Vec::with_capacity(state.representations.len());
        let mut min_duration = f64::MAX;
        for representation in &mut state.representations {
            let url = representation
                .media_template
                .replace("$Number$", &representation.next_number.to_string());
            let deadline = now + Duration::from_secs_f64(representation.duration_secs);
            items.push(
                IngestItem::new(url.clone(), url, representation.next_number.to_string())
                    .with_deadline(deadline),
            );
            representation.next_number += 1;
            min_duration = min_duration.min(representation.duration_secs);
        }
        let fetch_time = if min_duration.is_finite() {
            now + Duration::from_secs_f64(min_duration)
        } else {
            now + FALLBACK_DEADLINE
        };
        (fetch_time, items)
    }

    fn default_deadline(&self) -> Duration {
        let state = self.state.lock().unwrap();
        state
            .as_ref()
            .and_then(|s| {
                s.representations
                    .iter()
                    .map(|r| r.duration_secs)
                    .fold(None, |acc: Option<f64>, d| {
                        Some(acc.map_or(d, |a| a.min(d)))
                    })
            })
            .map(Duration::from_secs_f64)
            .unwrap_or(FALLBACK_DEADLINE)
    }
}

fn derive_schedule(mpd: &Mpd) -> Vec<RepresentationSchedule> {
    let mut out = Vec::new();
    for period in &mpd.period {
        for adaptation_set in &period.adaptation_set {
            for representation in &adaptation_set.representation {
                let template = representation
                    .segment_template
                    .clone()
                    .or_else(|| adaptation_set.segment_template.clone());
                let Some(template) = template else { continue };
                let Some(media) = &template.media else { continue };
                let timescale = template.timescale.unwrap_or(1).max(1);
                let duration_units = template.duration.unwrap_or(timescale);
                let duration_secs = duration_units as f64 / timescale as f64;
                out.push(RepresentationSchedule {
                    media_template: media.clone(),
                    duration_secs,
                    next_number: template.start_number.unwrap_or(1),
                });
                let _ = &representation.id;
            }
        }
    }
    out
}

fn validate_root_element(text: &str) -> Result<(), CoreError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Eof) => {
                return Err(CoreError::InvalidManifest("empty document".to_string()))
            }
            Ok(XmlEvent::Start(tag)) | Ok(XmlEvent::Empty(tag)) => {
                let name = tag.local_name();
                if name.as_ref() != b"MPD" {
                    return Err(CoreError::InvalidManifest(format!(
                        "root element is not MPD: {}",
                        String::from_utf8_lossy(name.as_ref())
                    )));
                }
                let xmlns = tag.attributes().filter_map(Result::ok).find(|a| {
                    a.key.as_ref() == b"xmlns"
                });
                let Some(xmlns) = xmlns else {
                    return Err(CoreError::InvalidManifest("MPD element has no xmlns".to_string()));
                };
                let value = xmlns.unescape_value().map_err(|e| {
                    CoreError::InvalidManifest(format!("invalid xmlns attribute: {e}"))
                })?;
                if !RECOGNISED_XMLNS.contains(&value.as_ref()) {
                    return Err(CoreError::InvalidManifest(format!(
                        "unrecognised xmlns: {value}"
                    )));
                }
                return Ok(());
            }
            Ok(_) => continue,
            Err(e) => return Err(CoreError::InvalidManifest(format!("XML parse error: {e}"))),
        }
    }
}

/// Priority-ordered registration of manifest handlers by media type.
pub struct ManifestHandlerFactory {
    entries: Vec<(String, i32, fn() -> Box<dyn ManifestHandler>)>,
}

impl ManifestHandlerFactory {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn with_default_handlers() -> Self {
        let mut factory = Self::new();
        factory.register("application/dash+xml", 100, || Box::new(DashManifestHandler::new()));
        factory
    }

    pub fn register(&mut self, media_type: &str, priority: i32, ctor: fn() -> Box<dyn ManifestHandler>) {
        self.entries.push((media_type.to_string(), priority, ctor));
    }

    /// Highest-priority handler whose media type matches, falling back to
    /// handlers registered with an empty media type.
    pub fn make_handler(&self, media_type: &str) -> Option<Box<dyn ManifestHandler>> {
        self.entries
            .iter()
            .filter(|(mt, _, _)| mt == media_type || mt.is_empty())
            .max_by_key(|(_, priority, _)| *priority)
            .map(|(_, _, ctor)| ctor())
    }
}

impl Default for ManifestHandlerFactory {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}
