//! Tracing setup shared by the gateway and CLI binaries.
//!
//! With `logging.redact_pii` on, event messages and fields pass through the
//! PII detector and are masked before they reach the writer. Timestamps,
//! levels and targets are left alone.

use std::fmt;

use lkm_core::Settings;
use lkm_knowledge::pii::{SanitizationStrategy, detect_and_sanitize_pii};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Matches below this confidence stay in the log line.
pub const LOG_REDACTION_MIN_CONFIDENCE: f64 = 0.6;

/// Mask PII in one formatted log fragment.
pub fn redact(text: &str) -> String {
    detect_and_sanitize_pii(text, SanitizationStrategy::Mask, LOG_REDACTION_MIN_CONFIDENCE).0
}

/// Field formatter that renders with `inner`, then masks PII in the output.
#[derive(Debug)]
pub struct RedactingFields<F = DefaultFields> {
    inner: F,
}

impl<F> RedactingFields<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl Default for RedactingFields {
    fn default() -> Self {
        Self::new(DefaultFields::new())
    }
}

impl<'writer, F> FormatFields<'writer> for RedactingFields<F>
where
    F: for<'a> FormatFields<'a> + 'static,
{
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut rendered = String::new();
        self.inner.format_fields(Writer::new(&mut rendered), fields)?;
        writer.write_str(&redact(&rendered))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_tracing(settings: &Settings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.logging.level.as_str().into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if settings.logging.redact_pii {
        registry
            .with(tracing_subscriber::fmt::layer().fmt_fields(RedactingFields::default()))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::info;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(redacting: bool, f: impl FnOnce()) -> String {
        let out = Captured::default();
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(out.clone())
            .with_ansi(false)
            .without_time();
        let registry = tracing_subscriber::registry();
        if redacting {
            let subscriber = registry.with(layer.fmt_fields(RedactingFields::default()));
            tracing::subscriber::with_default(subscriber, f);
        } else {
            tracing::subscriber::with_default(registry.with(layer), f);
        }
        out.text()
    }

    #[test]
    fn test_message_and_fields_are_masked() {
        let line = capture(true, || {
            info!(contact = "jordan@acme.io", "Reached out to 415-867-5309 about the post")
        });
        assert!(!line.contains("jordan@acme.io"), "{line}");
        assert!(!line.contains("415-867-5309"), "{line}");
        assert!(line.contains("***-***-5309"), "{line}");
        assert!(line.contains("Reached out to"), "{line}");
        assert!(line.contains("INFO"), "{line}");
    }

    #[test]
    fn test_plain_lines_pass_through() {
        let line = capture(true, || info!(items = 3, "Knowledge exported"));
        assert!(line.contains("Knowledge exported items=3"), "{line}");
    }

    #[test]
    fn test_redaction_off_keeps_pii() {
        let line = capture(false, || info!("mail jordan@acme.io"));
        assert!(line.contains("jordan@acme.io"), "{line}");
    }

    #[test]
    fn test_profile_links_are_masked() {
        assert!(!redact("see linkedin.com/in/jane-doe-42").contains("jane-doe-42"));
        assert_eq!(redact("Batch finished"), "Batch finished");
    }
}
