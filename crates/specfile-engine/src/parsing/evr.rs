//! Epoch-version-release values and their ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static EVR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+):)?([^-\s]+?)(?:-([^-\s]+))?$").expect("valid evr regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Evr {
    pub epoch: u64,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: u64, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }

    /// Parse `[epoch:]version[-release]`.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = EVR.captures(text.trim())?;
        let epoch = match caps.get(1) {
            Some(epoch) => epoch.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self {
            epoch,
            version: caps[2].to_string(),
            release: caps.get(3).map_or(String::new(), |m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| vercmp(&self.version, &other.version))
            .then_with(|| vercmp(&self.release, &other.release))
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_separator(b: u8) -> bool {
    !b.is_ascii_alphanumeric() && b != b'~' && b != b'^'
}

/// Compare two version strings segment by segment. Numeric segments compare
/// as numbers and are newer than alphabetic ones; `~` sorts before
/// anything, `^` after the end of a string but before any other segment.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        while i < a.len() && is_separator(a[i]) {
            i += 1;
        }
        while j < b.len() && is_separator(b[j]) {
            j += 1;
        }
        let (x, y) = (a.get(i).copied(), b.get(j).copied());
        if x == Some(b'~') || y == Some(b'~') {
            if x != Some(b'~') {
                return Ordering::Greater;
            }
            if y != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }
        if x == Some(b'^') || y == Some(b'^') {
            match (x, y) {
                (None, _) => return Ordering::Less,
                (_, None) => return Ordering::Greater,
                (Some(x), _) if x != b'^' => return Ordering::Greater,
                (_, Some(y)) if y != b'^' => return Ordering::Less,
                _ => {}
            }
            i += 1;
            j += 1;
            continue;
        }
        let (Some(x), Some(_)) = (x, y) else {
            break;
        };
        let numeric = x.is_ascii_digit();
        let matches = |c: u8| if numeric { c.is_ascii_digit() } else { c.is_ascii_alphabetic() };
        let start = (i, j);
        while i < a.len() && matches(a[i]) {
            i += 1;
        }
        while j < b.len() && matches(b[j]) {
            j += 1;
        }
        let mut one = &a[start.0..i];
        let mut two = &b[start.1..j];
        if two.is_empty() {
            return if numeric { Ordering::Greater } else { Ordering::Less };
        }
        if numeric {
            while one.first() == Some(&b'0') {
                one = &one[1..];
            }
            while two.first() == Some(&b'0') {
                two = &two[1..];
            }
            match one.len().cmp(&two.len()) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        match one.cmp(two) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    match (i >= a.len(), j >= b.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("1.0", "1.0", Ordering::Equal)]
    #[case("1.0", "2.0", Ordering::Less)]
    #[case("2.0.1", "2.0", Ordering::Greater)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("1.010", "1.10", Ordering::Equal)]
    #[case("1.0a", "1.0", Ordering::Greater)]
    #[case("1.0a", "1.0.1", Ordering::Less)]
    #[case("2.0", "2_0", Ordering::Equal)]
    #[case("1.0~rc1", "1.0", Ordering::Less)]
    #[case("1.0~rc1", "1.0~rc2", Ordering::Less)]
    #[case("1.0^git1", "1.0", Ordering::Greater)]
    #[case("1.0^git1", "1.0.1", Ordering::Less)]
    #[case("1.0^git1", "1.0~rc1", Ordering::Greater)]
    #[case("a", "1", Ordering::Less)]
    fn test_vercmp(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(vercmp(a, b), expected);
        assert_eq!(vercmp(b, a), expected.reverse());
    }

    #[rstest]
    #[case("1.0-1", Some(Evr::new(0, "1.0", "1")))]
    #[case("2:1.0-3.fc38", Some(Evr::new(2, "1.0", "3.fc38")))]
    #[case("0.1", Some(Evr::new(0, "0.1", "")))]
    #[case("<john@example.com>", Some(Evr::new(0, "<john@example.com>", "")))]
    #[case("1.0-1-2", None)]
    #[case("", None)]
    fn test_parse(#[case] text: &str, #[case] expected: Option<Evr>) {
        assert_eq!(Evr::parse(text), expected);
    }

    #[test]
    fn test_ordering_and_display() {
        let older = Evr::parse("1.9-2").unwrap();
        let newer = Evr::parse("1:1.0-1").unwrap();

        assert!(older < newer);
        assert_eq!(newer.to_string(), "1:1.0-1");
        assert_eq!(older.to_string(), "1.9-2");
    }
}
