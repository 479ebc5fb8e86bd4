use std::time::Duration;

use liveclip_core::{MAX_CAPTURE_BYTES, OutboundEnvelope};
use sha2::{Digest, Sha256};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    ingest::{ClipboardSource, EnvelopeSink, IngestError, clipboard_envelope},
    transport::{Delivery, SendOutcome},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pushes clipboard content whenever it changes.
///
/// Change detection compares a SHA-256 digest of the PNG bytes or text against
/// the last content pushed, so copying the same thing twice sends it once.
/// Content whose send is dropped or whose write fails is pushed again on a
/// later poll.
#[derive(Debug)]
pub struct ClipboardWatcher {
    last_digest: Option<[u8; 32]>,
    max_bytes: u64,
}

impl Default for ClipboardWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardWatcher {
    pub fn new() -> Self {
        Self {
            last_digest: None,
            max_bytes: MAX_CAPTURE_BYTES,
        }
    }

    /// Returns an envelope when the clipboard holds something not pushed yet.
    pub fn poll(
        &mut self,
        source: &mut impl ClipboardSource,
    ) -> Result<Option<OutboundEnvelope>, IngestError> {
        let envelope = match clipboard_envelope(source, Some(self.max_bytes)) {
            Ok(envelope) => envelope,
            Err(IngestError::ClipboardEmpty) => return Ok(None),
            Err(err) => return Err(err),
        };

        let digest = envelope_digest(&envelope);
        if self.last_digest == Some(digest) {
            return Ok(None);
        }
        self.last_digest = Some(digest);
        debug!(
            digest = %hex::encode(&digest[..8]),
            kind = envelope.kind().as_str(),
            "clipboard changed"
        );
        Ok(Some(envelope))
    }

    pub async fn run<S, K>(
        mut self,
        mut source: S,
        sink: K,
        poll_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        S: ClipboardSource,
        K: EnvelopeSink,
    {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(poll_ms = poll_interval.as_millis() as u64, "clipboard watcher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            match self.poll(&mut source) {
                Ok(Some(envelope)) => {
                    let kind = envelope.kind();
                    let delivery = match sink.send(envelope) {
                        SendOutcome::Queued(receipt) => receipt.delivery().await,
                        SendOutcome::Dropped(_) => Delivery::Failed,
                    };
                    if delivery == Delivery::Written {
                        info!(kind = kind.as_str(), "clipboard pushed");
                    } else {
                        // Forget the digest so the content goes out once we are back online.
                        debug!(kind = kind.as_str(), "clipboard push failed; will retry");
                        self.last_digest = None;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("clipboard read failed: {}", err),
            }
        }

        info!("clipboard watcher stopped");
    }
}

fn envelope_digest(envelope: &OutboundEnvelope) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match envelope {
        OutboundEnvelope::Text { data, .. } => {
            hasher.update(b"text:");
            hasher.update(data.as_bytes());
        }
        OutboundEnvelope::Image { data, .. } => {
            hasher.update(b"image:");
            hasher.update(data.as_bytes());
        }
        OutboundEnvelope::File { name, size, mime } => {
            hasher.update(b"file:");
            hasher.update(name.as_bytes());
            hasher.update(size.to_le_bytes());
            hasher.update(mime.as_bytes());
        }
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use tokio::sync::oneshot;

    use super::*;
    use crate::transport::Receipt;

    /// Fails the first write, then reports every later one as written.
    #[derive(Default)]
    struct FlakySink {
        sent: RefCell<Vec<OutboundEnvelope>>,
        failed_once: Cell<bool>,
    }

    impl EnvelopeSink for FlakySink {
        fn send(&self, envelope: OutboundEnvelope) -> SendOutcome {
            self.sent.borrow_mut().push(envelope);
            let (tx, rx) = oneshot::channel();
            if self.failed_once.replace(true) {
                let _ = tx.send(Delivery::Written);
            } else {
                let _ = tx.send(Delivery::Failed);
            }
            SendOutcome::Queued(Receipt::new(rx))
        }
    }

    struct ImageClipboard(Vec<u8>);

    impl ClipboardSource for ImageClipboard {
        fn read_image_png(&mut self) -> Result<Option<Vec<u8>>, IngestError> {
            Ok(Some(self.0.clone()))
        }

        fn read_text(&mut self) -> Result<Option<String>, IngestError> {
            Ok(None)
        }
    }

    struct TextClipboard(Option<String>);

    impl ClipboardSource for TextClipboard {
        fn read_image_png(&mut self) -> Result<Option<Vec<u8>>, IngestError> {
            Ok(None)
        }

        fn read_text(&mut self) -> Result<Option<String>, IngestError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn unchanged_clipboard_is_pushed_once() {
        let mut watcher = ClipboardWatcher::new();
        let mut clipboard = TextClipboard(Some("copied".to_owned()));

        assert!(watcher.poll(&mut clipboard).unwrap().is_some());
        assert!(watcher.poll(&mut clipboard).unwrap().is_none());

        clipboard.0 = Some("copied again".to_owned());
        assert!(watcher.poll(&mut clipboard).unwrap().is_some());
    }

    #[test]
    fn empty_clipboard_is_not_an_error() {
        let mut watcher = ClipboardWatcher::new();
        assert!(watcher.poll(&mut TextClipboard(None)).unwrap().is_none());
    }

    #[test]
    fn digest_separates_kinds() {
        let text = OutboundEnvelope::Text {
            data: "abc".to_owned(),
            name: None,
        };
        let image = OutboundEnvelope::Image {
            name: "clipboard.png".to_owned(),
            data: "abc".to_owned(),
        };
        assert_ne!(envelope_digest(&text), envelope_digest(&image));
    }

    #[test]
    fn oversized_clipboard_image_is_not_pushed() {
        let mut watcher = ClipboardWatcher {
            last_digest: None,
            max_bytes: 4,
        };
        let err = watcher
            .poll(&mut ImageClipboard(vec![0; 16]))
            .expect_err("image over the cap");
        assert!(matches!(err, IngestError::PayloadTooLarge { size: 16, max: 4 }));
    }

    #[tokio::test]
    async fn failed_write_is_pushed_again() {
        let sink = FlakySink::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run = ClipboardWatcher::new().run(
            TextClipboard(Some("copied".to_owned())),
            &sink,
            Duration::from_millis(10),
            shutdown_rx,
        );
        let stop = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = shutdown_tx.send(true);
        };
        tokio::join!(run, stop);

        let sent = sink.sent.borrow();
        assert_eq!(sent.len(), 2, "one failed write, one retry, then deduped");
        assert_eq!(sent[0], sent[1]);
    }
}
