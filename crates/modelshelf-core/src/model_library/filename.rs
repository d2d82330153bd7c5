//! Structured filenames: `base`, optional dotted `prefix`, `extension`.
//!
//! ```text
//! sd15_inpaint_2.vae.safetensors
//! └──── base ──┘└pfx┘└── ext ───┘
//!              index(`_`) = 2
//! ```
//!
//! Parsing is a small left-to-right scan and never fails:
//! - the rightmost dot starts the extension
//! - in the remaining stem, the first dot that is not followed by a digit
//!   starts the prefix (a dot followed by a digit stays in the base, so
//!   `img.3.png` has base `img.3`)
//! - the index is the run of digits ending the base, and only counts when it
//!   is directly preceded by the separator asked for

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// An immutable parsed filename.
///
/// Equality and hashing use the full string only.
#[derive(Debug, Clone)]
pub struct Filename {
    full: String,
    base_end: usize,
    ext_start: usize,
}

impl Filename {
    /// Parse a filename. Any directory components are dropped.
    pub fn parse(name: &str) -> Self {
        let full = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(name)
            .to_string();

        let ext_start = full.rfind('.').unwrap_or(full.len());
        let stem = &full[..ext_start];

        let mut base_end = stem.len();
        for (i, c) in stem.char_indices() {
            if c != '.' {
                continue;
            }
            let next = stem[i + 1..].chars().next();
            if !next.is_some_and(|n| n.is_ascii_digit()) {
                base_end = i;
                break;
            }
        }

        Self {
            full,
            base_end,
            ext_start,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn base(&self) -> &str {
        &self.full[..self.base_end]
    }

    /// Dotted middle segment, e.g. `.vae`. Empty when absent.
    pub fn prefix(&self) -> &str {
        &self.full[self.base_end..self.ext_start]
    }

    /// Extension with its leading dot. Empty when absent.
    pub fn extension(&self) -> &str {
        &self.full[self.ext_start..]
    }

    /// Byte offset where the trailing `<separator><digits>` token starts.
    fn index_start(&self, separator: char) -> Option<usize> {
        let base = self.base();
        let digits_start = base
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i)?;
        base[..digits_start]
            .ends_with(separator)
            .then(|| digits_start - separator.len_utf8())
    }

    /// Trailing index in the base, when directly preceded by `separator`.
    pub fn index(&self, separator: char) -> Option<u32> {
        let start = self.index_start(separator)?;
        self.base()[start + separator.len_utf8()..].parse().ok()
    }

    /// Replace (or append) the trailing index. `None` returns an unchanged
    /// copy.
    pub fn with_index(&self, index: Option<u32>, separator: char) -> Self {
        let Some(index) = index else {
            return self.clone();
        };
        let base = self.base();
        let stem = match self.index_start(separator) {
            Some(start) => &base[..start],
            None => base,
        };
        self.with_base(&format!("{stem}{separator}{index}"))
    }

    /// Same prefix and extension with a new base. The result is re-parsed,
    /// so a base that smuggles in dots may not survive as the new base.
    pub fn with_base(&self, base: &str) -> Self {
        Self::parse(&format!("{base}{}{}", self.prefix(), self.extension()))
    }

    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self::parse(&format!("{}{prefix}{}", self.base(), self.extension()))
    }

    pub fn with_extension(&self, extension: &str) -> Self {
        Self::parse(&format!("{}{}{extension}", self.base(), self.prefix()))
    }

    /// Base with any trailing index removed.
    pub fn without_index(&self, separator: char) -> &str {
        let base = self.base();
        match self.index_start(separator) {
            Some(start) => &base[..start],
            None => base,
        }
    }

    /// First candidate for which `is_taken` is false: the name itself, then
    /// `base{sep}0`, `base{sep}1`, ...
    pub fn find_available(&self, separator: char, mut is_taken: impl FnMut(&Filename) -> bool) -> Self {
        if !is_taken(self) {
            return self.clone();
        }
        let base = self.base();
        (0u32..)
            .map(|i| self.with_base(&format!("{base}{separator}{i}")))
            .find(|candidate| !is_taken(candidate))
            .unwrap_or_else(|| self.clone())
    }

    /// First candidate that does not exist in `dir`. Touches the filesystem.
    pub fn find_nonexistent(&self, dir: &Path, separator: char) -> Self {
        self.find_available(separator, |candidate| {
            dir.join(candidate.as_str()).symlink_metadata().is_ok()
        })
    }
}

impl PartialEq for Filename {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl Eq for Filename {}

impl Hash for Filename {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl PartialOrd for Filename {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Filename {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.full.cmp(&other.full)
    }
}

impl fmt::Display for Filename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl From<&str> for Filename {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Filename {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn parts(name: &str) -> (String, String, String) {
        let f = Filename::parse(name);
        (f.base().into(), f.prefix().into(), f.extension().into())
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(parts("model.safetensors"), ("model".into(), "".into(), ".safetensors".into()));
        assert_eq!(parts("model"), ("model".into(), "".into(), "".into()));
        assert_eq!(parts(""), ("".into(), "".into(), "".into()));
    }

    #[test]
    fn test_parse_prefix() {
        assert_eq!(parts("foo.vae.pt"), ("foo".into(), ".vae".into(), ".pt".into()));
        assert_eq!(parts("foo.preview.png"), ("foo".into(), ".preview".into(), ".png".into()));
        assert_eq!(parts("a.b.c.d"), ("a".into(), ".b.c".into(), ".d".into()));
    }

    #[test]
    fn test_dotted_digits_stay_in_base() {
        assert_eq!(parts("LORA_detail.3.png"), ("LORA_detail.3".into(), "".into(), ".png".into()));
        assert_eq!(parts("a.1.2.png"), ("a.1.2".into(), "".into(), ".png".into()));
        assert_eq!(Filename::parse("a.1.2.png").index('.'), Some(2));
        assert_eq!(parts("v1.5.ckpt"), ("v1.5".into(), "".into(), ".ckpt".into()));
    }

    #[test]
    fn test_parse_strips_directories() {
        assert_eq!(Filename::parse("models/Lora/x.pt").as_str(), "x.pt");
        assert_eq!(Filename::parse(r"C:\models\x.pt").as_str(), "x.pt");
    }

    #[test]
    fn test_index_requires_separator() {
        let f = Filename::parse("sd_15.safetensors");
        assert_eq!(f.index('_'), Some(15));
        assert_eq!(f.index('.'), None);
        assert_eq!(Filename::parse("v12.pt").index('_'), None);
        assert_eq!(Filename::parse("12.pt").index('_'), None);
    }

    #[test]
    fn test_with_index_replaces_token() {
        let f = Filename::parse("LORA_x.3.png");
        assert_eq!(f.with_index(Some(1000), '.').as_str(), "LORA_x.1000.png");
        let f = Filename::parse("LORA_x.png");
        assert_eq!(f.with_index(Some(0), '.').as_str(), "LORA_x.0.png");
        assert_eq!(f.with_index(None, '.'), f);
        assert_eq!(Filename::parse("a.vae.pt").with_index(Some(1), '_').as_str(), "a_1.vae.pt");
    }

    #[test]
    fn test_with_parts() {
        let f = Filename::parse("foo.vae.pt");
        assert_eq!(f.with_base("bar").as_str(), "bar.vae.pt");
        assert_eq!(f.with_prefix("").as_str(), "foo.pt");
        assert_eq!(f.with_extension(".md").as_str(), "foo.vae.md");
        assert_eq!(Filename::parse("foo.pt").with_prefix(".preview").as_str(), "foo.preview.pt");
    }

    #[test]
    fn test_find_available_appends_index() {
        let taken = ["model.pt", "model_0.pt"];
        let f = Filename::parse("model.pt");
        let found = f.find_available('_', |c| taken.contains(&c.as_str()));
        assert_eq!(found.as_str(), "model_1.pt");

        let free = Filename::parse("other.pt");
        assert_eq!(free.find_available('_', |_| false), free);
    }

    #[test]
    fn test_find_nonexistent_probes_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("x.bin"), b"").unwrap();
        std::fs::write(temp.path().join("x_0.bin"), b"").unwrap();

        let found = Filename::parse("x.bin").find_nonexistent(temp.path(), '_');
        assert_eq!(found.as_str(), "x_1.bin");
    }

    #[test]
    fn test_equality_uses_full_string() {
        assert_eq!(Filename::parse("a.pt"), Filename::from("dir/a.pt"));
        assert_ne!(Filename::parse("a.pt"), Filename::parse("A.pt"));
    }

    proptest! {
        #[test]
        fn prop_parse_roundtrips(name in "[a-zA-Z0-9_. -]{0,40}") {
            let f = Filename::parse(&name);
            prop_assert_eq!(format!("{}{}{}", f.base(), f.prefix(), f.extension()), name);
        }

        #[test]
        fn prop_with_index_sets_index(
            name in "[a-zA-Z][a-zA-Z0-9_.-]{0,20}\\.[a-z]{1,5}",
            n in 0u32..100_000,
            sep in prop::sample::select(vec!['.', '_']),
        ) {
            let f = Filename::parse(&name);
            prop_assert_eq!(Filename::parse(f.with_index(Some(n), sep).as_str()).index(sep), Some(n));
            prop_assert_eq!(f.with_index(None, sep), f);
        }
    }
}
