//! Turns capture sources into outbound envelopes.
//!
//! Four sources feed one envelope shape: the host clipboard, a dropped file, a
//! picked file and typed text. Every successful capture results in exactly one
//! [`EnvelopeSink::send`]; nothing here touches the store.

use std::{
    io,
    path::{Path, PathBuf},
};

use arboard::Clipboard;
use base64::Engine;
use image::{ExtendedColorType, ImageEncoder, codecs::png::PngEncoder};
use liveclip_core::{DEFAULT_CLIPBOARD_IMAGE_NAME, MAX_CAPTURE_BYTES, OutboundEnvelope};
use thiserror::Error;
use tracing::{debug, info};

use crate::transport::SendOutcome;

pub const FALLBACK_MIME: &str = "application/octet-stream";

const CLIPBOARD_DENIED_GUIDANCE: &str = "Clipboard access denied.\n\n\
    - Trigger the paste explicitly\n\
    - Make sure a graphical session is available\n\
    - Allow clipboard permissions";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("clipboard access denied: {0}")]
    PermissionDenied(String),
    #[error("clipboard holds neither an image nor text")]
    ClipboardEmpty,
    #[error("capture too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },
    #[error("nothing to send: input is empty")]
    EmptyText,
    #[error("no file selected")]
    NoFile,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode clipboard image: {0}")]
    ImageEncode(String),
}

impl IngestError {
    /// Text meant for the person who triggered the capture.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::PermissionDenied(_) | IngestError::ClipboardEmpty => {
                CLIPBOARD_DENIED_GUIDANCE.to_owned()
            }
            IngestError::PayloadTooLarge { max, .. } => {
                format!("File too large (max {}MB)", max / (1024 * 1024))
            }
            other => other.to_string(),
        }
    }
}

/// Receives envelopes for transmission. Sends are fire-and-forget.
pub trait EnvelopeSink {
    fn send(&self, envelope: OutboundEnvelope) -> SendOutcome;
}

impl<T: EnvelopeSink + ?Sized> EnvelopeSink for &T {
    fn send(&self, envelope: OutboundEnvelope) -> SendOutcome {
        (**self).send(envelope)
    }
}

pub trait ClipboardSource {
    /// PNG bytes of the first image representation on the clipboard, if any.
    fn read_image_png(&mut self) -> Result<Option<Vec<u8>>, IngestError>;
    fn read_text(&mut self) -> Result<Option<String>, IngestError>;
}

/// The host clipboard.
pub struct SystemClipboard {
    clipboard: Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, IngestError> {
        let clipboard = Clipboard::new().map_err(map_clipboard_error)?;
        Ok(Self { clipboard })
    }
}

impl ClipboardSource for SystemClipboard {
    fn read_image_png(&mut self) -> Result<Option<Vec<u8>>, IngestError> {
        match self.clipboard.get_image() {
            Ok(image) => encode_png(image.width, image.height, &image.bytes).map(Some),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(err) => Err(map_clipboard_error(err)),
        }
    }

    fn read_text(&mut self) -> Result<Option<String>, IngestError> {
        match self.clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(err) => Err(map_clipboard_error(err)),
        }
    }
}

fn map_clipboard_error(err: arboard::Error) -> IngestError {
    IngestError::PermissionDenied(err.to_string())
}

fn encode_png(width: usize, height: usize, rgba: &[u8]) -> Result<Vec<u8>, IngestError> {
    let width = u32::try_from(width).map_err(|err| IngestError::ImageEncode(err.to_string()))?;
    let height = u32::try_from(height).map_err(|err| IngestError::ImageEncode(err.to_string()))?;
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(rgba, width, height, ExtendedColorType::Rgba8)
        .map_err(|err| IngestError::ImageEncode(err.to_string()))?;
    Ok(out)
}

fn check_size(size: u64, max: u64) -> Result<(), IngestError> {
    if size > max {
        return Err(IngestError::PayloadTooLarge { size, max });
    }
    Ok(())
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Image first (only the first representation), then non-blank text.
/// `max_bytes` caps the PNG size; an explicit paste passes `None`.
pub fn clipboard_envelope(
    source: &mut impl ClipboardSource,
    max_bytes: Option<u64>,
) -> Result<OutboundEnvelope, IngestError> {
    if let Some(png) = source.read_image_png()? {
        if let Some(max) = max_bytes {
            check_size(png.len() as u64, max)?;
        }
        return Ok(OutboundEnvelope::Image {
            name: DEFAULT_CLIPBOARD_IMAGE_NAME.to_owned(),
            data: encode_base64(&png),
        });
    }

    match source.read_text()? {
        Some(text) if !text.trim().is_empty() => Ok(OutboundEnvelope::Text {
            data: text,
            name: None,
        }),
        _ => Err(IngestError::ClipboardEmpty),
    }
}

/// Declared properties of a captured file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFile {
    pub name: String,
    pub size: u64,
    pub mime: String,
}

impl CapturedFile {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let meta = std::fs::metadata(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.bin".to_owned());
        Ok(Self {
            name,
            size: meta.len(),
            mime: mime_for_path(path).to_owned(),
        })
    }
}

/// Builds the envelope for one file. `read` is only called for image and text
/// files, after the size check; the bytes read are checked again in case the
/// file grew in between.
pub fn file_envelope<R>(
    file: &CapturedFile,
    max_bytes: u64,
    read: R,
) -> Result<OutboundEnvelope, IngestError>
where
    R: FnOnce() -> Result<Vec<u8>, IngestError>,
{
    check_size(file.size, max_bytes)?;

    if file.mime.starts_with("image/") {
        let bytes = read()?;
        check_size(bytes.len() as u64, max_bytes)?;
        return Ok(OutboundEnvelope::Image {
            name: file.name.clone(),
            data: encode_base64(&bytes),
        });
    }

    if file.mime.starts_with("text/") {
        let bytes = read()?;
        check_size(bytes.len() as u64, max_bytes)?;
        return Ok(OutboundEnvelope::Text {
            data: String::from_utf8_lossy(&bytes).into_owned(),
            name: Some(file.name.clone()),
        });
    }

    Ok(OutboundEnvelope::File {
        name: file.name.clone(),
        size: file.size,
        mime: file.mime.clone(),
    })
}

pub fn typed_envelope(input: &str) -> Result<OutboundEnvelope, IngestError> {
    if input.trim().is_empty() {
        return Err(IngestError::EmptyText);
    }
    Ok(OutboundEnvelope::Text {
        data: input.to_owned(),
        name: None,
    })
}

/// Media type declared by a file's extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "txt" | "log" | "text" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "xml" => "text/xml",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => FALLBACK_MIME,
    }
}

/// Applies the capture policy and hands each envelope to the sink.
#[derive(Debug, Clone)]
pub struct IngestPipeline<K> {
    sink: K,
    max_bytes: u64,
}

impl<K: EnvelopeSink> IngestPipeline<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            max_bytes: MAX_CAPTURE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// The size cap applies to file capture only, not to an explicit paste.
    pub fn paste_clipboard(
        &self,
        source: &mut impl ClipboardSource,
    ) -> Result<SendOutcome, IngestError> {
        let envelope = clipboard_envelope(source, None)?;
        Ok(self.dispatch(envelope))
    }

    /// Only the first file is used; the rest of a multi-file drop is ignored.
    pub fn capture_files(&self, paths: &[PathBuf]) -> Result<SendOutcome, IngestError> {
        let (first, rest) = paths.split_first().ok_or(IngestError::NoFile)?;
        if !rest.is_empty() {
            info!(ignored = rest.len(), "only the first file is sent");
        }
        self.capture_file(first)
    }

    pub fn capture_file(&self, path: &Path) -> Result<SendOutcome, IngestError> {
        let file = CapturedFile::from_path(path)?;
        let envelope = file_envelope(&file, self.max_bytes, || {
            std::fs::read(path).map_err(|source| IngestError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        Ok(self.dispatch(envelope))
    }

    /// Clears `input` once a send was attempted, whatever the transport did with it.
    pub fn submit_typed(&self, input: &mut String) -> Result<SendOutcome, IngestError> {
        let envelope = typed_envelope(input)?;
        let outcome = self.dispatch(envelope);
        input.clear();
        Ok(outcome)
    }

    pub fn dispatch(&self, envelope: OutboundEnvelope) -> SendOutcome {
        let kind = envelope.kind();
        let outcome = self.sink.send(envelope);
        debug!(kind = kind.as_str(), queued = outcome.is_queued(), "envelope dispatched");
        outcome
    }
}
