use std::{borrow::Cow, fs, path::Path, path::PathBuf};

use image::codecs::jpeg::JpegEncoder;

use crate::{
    error::{SwitcherError, SwitcherResult},
    fetcher::{Fetcher, WallpaperImage},
    image_classifier::{format_class, ExtraFormats, FormatClass, ImageFormat},
    info,
    link_manager::{ensure_secondary_reference, LinkAttempt, LinkMechanism, LINK_ATTEMPTS},
    slots::{Slot, PARTIAL_SUFFIX},
    utility::hex_signature,
    warn, DEBUG_NAME,
};

/// Quality at which payloads are stored untouched.
pub const VERBATIM_QUALITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePlan {
    Verbatim(ImageFormat),
    Reencode { quality: u8 },
}

#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    pub primary: PathBuf,
    pub secondary: PathBuf,
    pub format: ImageFormat,
    pub mechanism: LinkMechanism,
}

/// Decides how a payload may be stored, or why it must be rejected.
pub fn storage_plan(
    format: ImageFormat,
    header: &[u8],
    quality: u8,
    extra: &ExtraFormats,
) -> SwitcherResult<StoragePlan> {
    match format_class(format, extra) {
        FormatClass::Safe if quality >= VERBATIM_QUALITY => Ok(StoragePlan::Verbatim(format)),
        FormatClass::Safe => Ok(StoragePlan::Reencode { quality }),
        FormatClass::Extra => Ok(StoragePlan::Verbatim(format)),
        FormatClass::Rejected => Err(SwitcherError::UnsupportedFormat {
            format: format.tag().to_string(),
            signature: hex_signature(header, 8),
        }),
    }
}

pub struct PreparePipeline {
    fetcher: Fetcher,
    links: &'static [LinkAttempt],
}

impl PreparePipeline {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            links: &LINK_ATTEMPTS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_links(mut self, links: &'static [LinkAttempt]) -> Self {
        self.links = links;
        self
    }

    /// Makes `slot` hold a fresh image. Every failure is logged and reported as `false`.
    pub fn prepare(&self, slot: &mut Slot, url: &str, quality: u8, extra: &ExtraFormats) -> bool {
        match self.try_prepare(slot, url, quality, extra) {
            Ok(outcome) => {
                info!(
                    "[{}][PREPARE] {} ready: {} ({}), {} via {}",
                    DEBUG_NAME,
                    slot.id,
                    outcome.primary.display(),
                    outcome.format,
                    outcome.secondary.display(),
                    outcome.mechanism
                );
                true
            }
            Err(e) => {
                warn!("[{}][PREPARE] {} not prepared: {}", DEBUG_NAME, slot.id, e);
                false
            }
        }
    }

    pub fn try_prepare(
        &self,
        slot: &mut Slot,
        url: &str,
        quality: u8,
        extra: &ExtraFormats,
    ) -> SwitcherResult<PrepareOutcome> {
        fs::create_dir_all(&slot.dir)?;
        slot.clear()?;
        slot.source_url = None;
        slot.last_prepared = None;

        let image = self.fetcher.fetch(url)?;

        match store(slot, &image, quality, extra, self.links) {
            Ok(outcome) => {
                slot.source_url = Some(image.source_url);
                slot.last_prepared = Some(image.fetched_at);
                Ok(outcome)
            }
            Err(e) => {
                if let Err(clear_err) = slot.clear() {
                    warn!(
                        "[{}][PREPARE] {} left partially written, cleanup failed: {}",
                        DEBUG_NAME, slot.id, clear_err
                    );
                }
                Err(e)
            }
        }
    }
}

fn store(
    slot: &Slot,
    image: &WallpaperImage,
    quality: u8,
    extra: &ExtraFormats,
    links: &[LinkAttempt],
) -> SwitcherResult<PrepareOutcome> {
    let plan = storage_plan(image.format, &image.bytes, quality, extra)?;

    let (format, bytes) = match plan {
        StoragePlan::Verbatim(format) => (format, Cow::Borrowed(image.bytes.as_slice())),
        StoragePlan::Reencode { quality } => {
            (ImageFormat::Jpg, Cow::Owned(reencode_jpeg(&image.bytes, quality)?))
        }
    };

    let primary = slot.primary_path(format.extension());
    write_atomically(&primary, &bytes)?;

    let secondary = slot.secondary_path(format.extension());
    let mechanism =
        ensure_secondary_reference(&primary, &secondary, links).map_err(SwitcherError::LinkFallbackExhausted)?;

    Ok(PrepareOutcome {
        primary,
        secondary,
        format,
        mechanism,
    })
}

fn reencode_jpeg(bytes: &[u8], quality: u8) -> SwitcherResult<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)?;
    let rgb = decoded.to_rgb8();

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(&rgb)?;
    Ok(out)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> SwitcherResult<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    fs::write(&partial, bytes)?;
    fs::rename(&partial, path)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        fetcher::tests::{offline, ScriptedTransport},
        image_classifier::classify_file,
        link_manager::tests::NOTHING_WORKS,
        slots::{SlotId, SlotManager},
    };
    use std::io::Cursor;

    pub(crate) fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([30, 120, 200]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub(crate) fn webp_bytes() -> Vec<u8> {
        let mut data = b"RIFF\x1a\x00\x00\x00WEBPVP8L".to_vec();
        data.extend_from_slice(&[0u8; 18]);
        data
    }

    fn slot_files(slot: &Slot) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&slot.dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn pipeline(transport: ScriptedTransport) -> PreparePipeline {
        PreparePipeline::new(Fetcher::new(vec![Box::new(transport)]))
    }

    fn next_slot(dir: &Path) -> Slot {
        let slots = SlotManager::new(dir, SlotId::A);
        slots.ensure_dirs().unwrap();
        slots.next().clone()
    }

    #[test]
    fn storage_plan_follows_format_rules() {
        let none = ExtraFormats::default();
        let webp = ExtraFormats::parse("webp");

        assert_eq!(
            storage_plan(ImageFormat::Png, b"", 100, &none).unwrap(),
            StoragePlan::Verbatim(ImageFormat::Png)
        );
        assert_eq!(
            storage_plan(ImageFormat::Bmp, b"", 80, &none).unwrap(),
            StoragePlan::Reencode { quality: 80 }
        );
        assert_eq!(
            storage_plan(ImageFormat::Webp, b"", 10, &webp).unwrap(),
            StoragePlan::Verbatim(ImageFormat::Webp)
        );
        match storage_plan(ImageFormat::Unknown, b"<html>", 95, &webp) {
            Err(SwitcherError::UnsupportedFormat { format, signature }) => {
                assert_eq!(format, "unknown");
                assert_eq!(signature, "3C-68-74-6D-6C-3E");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_prepare_leaves_one_primary_and_one_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let pipeline = pipeline(ScriptedTransport::always(png_bytes()));
        let extra = ExtraFormats::default();

        assert!(pipeline.prepare(&mut slot, "https://example.com/img", 100, &extra));
        assert!(pipeline.prepare(&mut slot, "https://example.com/img", 100, &extra));

        assert_eq!(slot_files(&slot), vec!["wp1.png", "wp2.png"]);
        assert_eq!(
            fs::read(slot.secondary_file().unwrap()).unwrap(),
            fs::read(slot.primary_file().unwrap()).unwrap()
        );
        assert_eq!(slot.source_url.as_deref(), Some("https://example.com/img#resolved"));
        assert!(slot.last_prepared.is_some());
    }

    #[test]
    fn safe_format_below_full_quality_is_reencoded_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let pipeline = pipeline(ScriptedTransport::always(png_bytes()));

        let outcome = pipeline
            .try_prepare(&mut slot, "u", 80, &ExtraFormats::default())
            .unwrap();

        assert_eq!(outcome.format, ImageFormat::Jpg);
        assert_eq!(slot_files(&slot), vec!["wp1.jpg", "wp2.jpg"]);
        assert_eq!(classify_file(&outcome.primary), ImageFormat::Jpg);
    }

    #[test]
    fn webp_requires_opt_in_and_is_stored_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let pipeline = pipeline(ScriptedTransport::always(webp_bytes()));

        let rejected = pipeline.try_prepare(&mut slot, "u", 95, &ExtraFormats::default());
        assert!(matches!(rejected, Err(SwitcherError::UnsupportedFormat { ref format, .. }) if format == "webp"));
        assert!(slot_files(&slot).is_empty());

        assert!(pipeline.prepare(&mut slot, "u", 95, &ExtraFormats::parse("webp")));
        assert_eq!(slot_files(&slot), vec!["wp1.webp", "wp2.webp"]);
        assert_eq!(fs::read(slot.primary_file().unwrap()).unwrap(), webp_bytes());
    }

    #[test]
    fn fetch_failure_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        fs::write(slot.primary_path("jpg"), b"stale").unwrap();
        fs::write(slot.secondary_path("jpg"), b"stale").unwrap();
        let pipeline = pipeline(ScriptedTransport::new("fake", vec![Err(offline("fake"))]));

        let result = pipeline.try_prepare(&mut slot, "u", 95, &ExtraFormats::default());

        assert!(matches!(result, Err(SwitcherError::TransientFetch(_))));
        assert!(slot_files(&slot).is_empty());
        assert!(!slot.is_populated());
    }

    #[test]
    fn undecodable_safe_payload_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let mut broken = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        broken.extend_from_slice(&[0xAB; 32]);
        let pipeline = pipeline(ScriptedTransport::always(broken));

        assert!(!pipeline.prepare(&mut slot, "u", 90, &ExtraFormats::default()));
        assert!(slot_files(&slot).is_empty());
    }

    #[test]
    fn exhausted_link_fallbacks_fail_the_prepare_and_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let pipeline = pipeline(ScriptedTransport::always(png_bytes())).with_links(&NOTHING_WORKS);

        let result = pipeline.try_prepare(&mut slot, "u", 100, &ExtraFormats::default());

        assert!(matches!(result, Err(SwitcherError::LinkFallbackExhausted(_))));
        assert!(slot_files(&slot).is_empty());
        assert!(slot.source_url.is_none());
    }

    fn leave_directory(_primary: &Path, secondary: &Path) -> std::io::Result<()> {
        fs::create_dir(secondary)?;
        fs::write(secondary.join("keep"), b"x")?;
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "refused"))
    }

    const LEAVES_A_DIRECTORY: [LinkAttempt; 1] = [(LinkMechanism::Symlink, leave_directory)];

    #[test]
    fn failed_cleanup_keeps_the_original_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut slot = next_slot(dir.path());
        let pipeline = pipeline(ScriptedTransport::always(png_bytes())).with_links(&LEAVES_A_DIRECTORY);

        let result = pipeline.try_prepare(&mut slot, "u", 100, &ExtraFormats::default());

        assert!(matches!(result, Err(SwitcherError::LinkFallbackExhausted(_))));
        assert!(slot.secondary_path("png").is_dir());
        assert!(!pipeline.prepare(&mut slot, "u", 100, &ExtraFormats::default()));
    }
}
