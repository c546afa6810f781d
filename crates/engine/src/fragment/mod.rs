//! Splitting extracted text into bounded, overlapping fragments.
//!
//! Fragments are cut at a fixed target length measured in characters, moving
//! the cut back to a natural breakpoint (paragraph, line, sentence, word) when
//! one exists inside a tolerance window. Consecutive fragments overlap by a
//! configured number of characters.
//!
//! Fragment ids are a pure function of the source path, the ordinal and the
//! fragmenter configuration version, so re-fragmenting unchanged content
//! reproduces the same ids and a configuration change moves every id into a
//! new namespace.

mod boundary;

pub use boundary::Breakpoint;

use crate::fingerprint::fingerprint_bytes;
use crate::types::Fragment;
use docsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Revision of the splitting algorithm, folded into the config version.
const FRAGMENT_SCHEME: u32 = 1;

/// Length of the config version prefix.
const VERSION_LEN: usize = 12;

/// Configuration for the fragmenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmenterConfig {
    /// Target fragment length in characters
    #[serde(default = "default_target_length")]
    pub target_length: usize,

    /// Characters shared by consecutive fragments
    #[serde(default = "default_overlap")]
    pub overlap: usize,

    /// How far before the target length a natural breakpoint may be used
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
}

fn default_target_length() -> usize {
    500
}

fn default_overlap() -> usize {
    50
}

fn default_boundary_window() -> usize {
    100
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            target_length: default_target_length(),
            overlap: default_overlap(),
            boundary_window: default_boundary_window(),
        }
    }
}

impl FragmenterConfig {
    /// Reject configurations that cannot make progress.
    pub fn validate(&self) -> AppResult<()> {
        if self.target_length == 0 {
            return Err(AppError::Config(
                "fragmenter.target_length must be greater than 0".to_string(),
            ));
        }

        if self.overlap >= self.target_length {
            return Err(AppError::Config(format!(
                "fragmenter.overlap ({}) must be smaller than target_length ({})",
                self.overlap, self.target_length
            )));
        }

        if self.boundary_window >= self.target_length {
            return Err(AppError::Config(format!(
                "fragmenter.boundary_window ({}) must be smaller than target_length ({})",
                self.boundary_window, self.target_length
            )));
        }

        Ok(())
    }

    /// Stable version tag of this configuration.
    pub fn version(&self) -> String {
        let descriptor = format!(
            "fragmenter/v{}:{}:{}:{}",
            FRAGMENT_SCHEME, self.target_length, self.overlap, self.boundary_window
        );
        fingerprint_bytes(descriptor.as_bytes())[..VERSION_LEN].to_string()
    }
}

/// Deterministic fragment id for (config version, path, ordinal).
pub fn fragment_id(config_version: &str, source_path: &str, ordinal: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_version.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_path.as_bytes());
    hasher.update([0x1f]);
    hasher.update(ordinal.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", config_version, &digest[..32])
}

/// Id of the marker entry stored for a file that yields no fragments.
///
/// Uses an ordinal no real fragment reaches.
pub fn empty_marker_id(config_version: &str, source_path: &str) -> String {
    fragment_id(config_version, source_path, u32::MAX)
}

/// Splits text into fragments under a validated configuration.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    config: FragmenterConfig,
    version: String,
}

impl Fragmenter {
    /// Create a fragmenter, rejecting invalid configurations.
    pub fn new(config: FragmenterConfig) -> AppResult<Self> {
        config.validate()?;
        let version = config.version();
        Ok(Self { config, version })
    }

    pub fn config(&self) -> &FragmenterConfig {
        &self.config
    }

    /// Version tag stamped on every fragment this fragmenter produces.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Lazily fragment `text`; clone the iterator to restart from its position.
    pub fn fragments<'a>(
        &'a self,
        source_path: &'a str,
        text: &'a str,
        file_fingerprint: &'a str,
    ) -> Fragments<'a> {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (offset, ch) in text.char_indices() {
            chars.push(ch);
            offsets.push(offset);
        }
        offsets.push(text.len());

        Fragments {
            fragmenter: self,
            source_path,
            text,
            file_fingerprint,
            chars,
            offsets,
            start: 0,
            ordinal: 0,
            done: text.trim().is_empty(),
        }
    }

    /// Fragment `text` eagerly.
    pub fn fragment(&self, source_path: &str, text: &str, file_fingerprint: &str) -> Vec<Fragment> {
        let fragments: Vec<Fragment> = self
            .fragments(source_path, text, file_fingerprint)
            .collect();

        tracing::debug!(
            "Fragmented {} into {} fragments ({} bytes, target {}, overlap {})",
            source_path,
            fragments.len(),
            text.len(),
            self.config.target_length,
            self.config.overlap
        );

        fragments
    }
}

/// Iterator over the fragments of one text.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    fragmenter: &'a Fragmenter,
    source_path: &'a str,
    text: &'a str,
    file_fingerprint: &'a str,
    chars: Vec<char>,
    /// Byte offset of every char, plus the text length
    offsets: Vec<usize>,
    start: usize,
    ordinal: u32,
    done: bool,
}

impl Fragments<'_> {
    /// Choose where the fragment starting at `self.start` ends.
    fn cut(&self, hard_end: usize) -> usize {
        let config = &self.fragmenter.config;
        // A cut must leave the fragment longer than the overlap so the next
        // start moves forward.
        let lower = hard_end
            .saturating_sub(config.boundary_window)
            .max(self.start + config.overlap + 1);

        if lower > hard_end {
            return hard_end;
        }

        boundary::best_cut(&self.chars, lower, hard_end).unwrap_or(hard_end)
    }
}

impl Iterator for Fragments<'_> {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        let total = self.chars.len();
        let config = &self.fragmenter.config;

        while !self.done {
            if self.start >= total {
                self.done = true;
                break;
            }

            let hard_end = (self.start + config.target_length).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.cut(hard_end)
            };

            let byte_start = self.offsets[self.start];
            let byte_end = self.offsets[end];

            if end == total {
                self.done = true;
            } else {
                self.start = end - config.overlap;
            }

            let text = self.text[byte_start..byte_end].trim();
            if text.is_empty() {
                continue;
            }

            let ordinal = self.ordinal;
            self.ordinal += 1;

            return Some(Fragment {
                id: fragment_id(&self.fragmenter.version, self.source_path, ordinal),
                source_path: self.source_path.to_string(),
                ordinal,
                text: text.to_string(),
                file_fingerprint: self.file_fingerprint.to_string(),
                config_version: self.fragmenter.version.clone(),
                byte_range: (byte_start, byte_end),
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragmenter(target_length: usize, overlap: usize, boundary_window: usize) -> Fragmenter {
        Fragmenter::new(FragmenterConfig {
            target_length,
            overlap,
            boundary_window,
        })
        .unwrap()
    }

    fn alphabet(len: usize) -> String {
        (0..len)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        let f = Fragmenter::new(FragmenterConfig::default()).unwrap();
        assert!(f.fragment("a.txt", "", "h").is_empty());
        assert!(f.fragment("a.txt", "  \n\t \n ", "h").is_empty());
    }

    #[test]
    fn test_short_text_single_fragment() {
        let f = Fragmenter::new(FragmenterConfig::default()).unwrap();
        let fragments = f.fragment("a.txt", "  Hello world.  ", "h1");

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "Hello world.");
        assert_eq!(fragments[0].ordinal, 0);
        assert_eq!(fragments[0].file_fingerprint, "h1");
        assert_eq!(fragments[0].config_version, f.version());
    }

    #[test]
    fn test_hard_cuts_without_breakpoints() {
        let f = fragmenter(100, 10, 20);
        let text = alphabet(250);
        let fragments = f.fragment("a.txt", &text, "h");

        let lengths: Vec<usize> = fragments.iter().map(|f| f.text.len()).collect();
        assert_eq!(lengths, vec![100, 100, 70]);
        assert_eq!(fragments[1].byte_range, (90, 190));
    }

    #[test]
    fn test_consecutive_fragments_overlap() {
        let f = fragmenter(100, 10, 20);
        let text = alphabet(250);
        let fragments = f.fragment("a.txt", &text, "h");

        for pair in fragments.windows(2) {
            let tail = &pair[0].text[pair[0].text.len() - 10..];
            assert!(pair[1].text.starts_with(tail));
        }
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let f = fragmenter(100, 10, 40);
        let first = "word ".repeat(16); // 80 chars
        let text = format!("{}\n\n{}", first.trim_end(), "more text here ".repeat(10));
        let fragments = f.fragment("a.txt", &text, "h");

        assert_eq!(fragments[0].text, first.trim_end());
    }

    #[test]
    fn test_fragments_respect_target_length() {
        let f = fragmenter(120, 20, 40);
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let fragments = f.fragment("a.txt", &text, "h");

        assert!(fragments.len() > 1);
        for fragment in &fragments {
            assert!(fragment.text.chars().count() <= 120);
        }
    }

    #[test]
    fn test_ordinals_are_dense() {
        let f = fragmenter(50, 5, 10);
        let text = "Sentence number one. Sentence two!\n\nParagraph two here. ".repeat(20);
        let fragments = f.fragment("a.txt", &text, "h");

        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.ordinal as usize, i);
        }
    }

    #[test]
    fn test_ids_are_deterministic() {
        let f = fragmenter(80, 10, 20);
        let text = "Some repeated content for determinism. ".repeat(30);

        let first: Vec<String> = f.fragment("docs/a.txt", &text, "h").into_iter().map(|f| f.id).collect();
        let second: Vec<String> = f.fragment("docs/a.txt", &text, "h").into_iter().map(|f| f.id).collect();

        assert_eq!(first, second);

        let rebuilt = fragmenter(80, 10, 20);
        let third: Vec<String> = rebuilt.fragment("docs/a.txt", &text, "h").into_iter().map(|f| f.id).collect();
        assert_eq!(first, third);
    }

    #[test]
    fn test_config_change_changes_id_namespace() {
        let a = fragmenter(80, 10, 20);
        let b = fragmenter(80, 15, 20);

        assert_ne!(a.version(), b.version());
        assert_ne!(
            fragment_id(a.version(), "a.txt", 0),
            fragment_id(b.version(), "a.txt", 0)
        );
    }

    #[test]
    fn test_ids_depend_on_path_and_ordinal() {
        let version = FragmenterConfig::default().version();
        let id = fragment_id(&version, "a.txt", 0);

        assert_ne!(id, fragment_id(&version, "b.txt", 0));
        assert_ne!(id, fragment_id(&version, "a.txt", 1));
        assert!(id.starts_with(&version));
    }

    #[test]
    fn test_empty_marker_id_is_distinct_from_fragments() {
        let version = FragmenterConfig::default().version();
        let marker = empty_marker_id(&version, "a.txt");

        assert_eq!(marker, empty_marker_id(&version, "a.txt"));
        assert_ne!(marker, fragment_id(&version, "a.txt", 0));
        assert_ne!(marker, empty_marker_id(&version, "b.txt"));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let overlap_too_big = FragmenterConfig {
            target_length: 100,
            overlap: 100,
            boundary_window: 10,
        };
        assert!(matches!(
            Fragmenter::new(overlap_too_big),
            Err(AppError::Config(_))
        ));

        let zero = FragmenterConfig {
            target_length: 0,
            overlap: 0,
            boundary_window: 0,
        };
        assert!(Fragmenter::new(zero).is_err());

        let window_too_big = FragmenterConfig {
            target_length: 100,
            overlap: 10,
            boundary_window: 100,
        };
        assert!(Fragmenter::new(window_too_big).is_err());
    }

    #[test]
    fn test_utf8_safety() {
        let f = fragmenter(60, 10, 20);
        let text = "Gamedex é um aplicativo 🎮 brasileiro. Acentuação: ã, õ, ç. 你好世界。".repeat(20);
        let fragments = f.fragment("a.txt", &text, "h");

        assert!(!fragments.is_empty());
        for fragment in &fragments {
            assert!(fragment.text.chars().count() <= 60);
            assert!(text.is_char_boundary(fragment.byte_range.0));
            assert!(text.is_char_boundary(fragment.byte_range.1));
        }
    }

    #[test]
    fn test_iterator_is_restartable() {
        let f = fragmenter(40, 5, 10);
        let text = "alpha beta gamma delta epsilon zeta eta theta. ".repeat(10);

        let mut iter = f.fragments("a.txt", &text, "h");
        iter.next();
        let snapshot = iter.clone();

        let rest: Vec<Fragment> = iter.collect();
        let replay: Vec<Fragment> = snapshot.collect();
        assert_eq!(rest, replay);
        assert_eq!(rest.first().map(|f| f.ordinal), Some(1));
    }
}
