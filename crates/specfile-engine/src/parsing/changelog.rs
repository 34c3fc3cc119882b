//! `%changelog` entries.
//!
//! An entry starts at a `* <weekday> <month> <day> [time zone] <year> ...`
//! header and runs until the next header. Blank lines at the end of an
//! entry are kept apart from its content so they render back in place.
//! Every `%changelog` section is tracked separately.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveTime};
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::parsing::evr::Evr;
use crate::parsing::lines::{LineId, LineStore};
use crate::parsing::sections::{self, Section, Sections};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\*\s+(?P<weekday>Mon|Tue|Wed|Thu|Fri|Sat|Sun) (?P<month>Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) (?P<padding> *)(?P<day>\d{1,2})(?: (?P<time>\d{2}:\d{2}:\d{2}) (?P<zone>\S+))? (?P<year>\d{4})(?:\s+(?P<rest>.*?))?\s*$",
    )
    .expect("valid changelog header regex")
});

/// Marker that makes the build tool generate the changelog.
pub const AUTOCHANGELOG: &str = "%autochangelog";

/// Whether `line` opens a changelog entry.
pub fn is_header(line: &str) -> bool {
    HEADER.is_match(line)
}

/// Point in time of an entry. The legacy extended format adds a time of day
/// and a zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub zone: Option<String>,
}

impl Timestamp {
    pub fn date(date: NaiveDate) -> Self {
        Self {
            date,
            time: None,
            zone: None,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.time.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub header: String,
    pub content: Vec<String>,
    /// Blank lines following the entry
    trailing: Vec<String>,
    location: Option<(LineId, usize)>,
}

impl ChangelogEntry {
    /// A new entry. `padding` is the day-of-month padding of the header:
    /// spaces, optionally followed by `0` for a zero-padded day.
    pub fn assemble(
        timestamp: &Timestamp,
        author: &str,
        content: Vec<String>,
        evr: Option<&str>,
        padding: &str,
    ) -> Self {
        let date = timestamp.date;
        let mut header = format!("* {} {}", date.format("%a"), date.format("%b"));
        match padding.strip_suffix('0') {
            Some(spaces) => header.push_str(&format!(" {spaces}{:02}", date.day())),
            None => header.push_str(&format!(" {padding}{}", date.day())),
        }
        if let Some(time) = timestamp.time {
            let zone = timestamp.zone.as_deref().unwrap_or("UTC");
            header.push_str(&format!(" {} {zone}", time.format("%H:%M:%S")));
        }
        header.push_str(&format!(" {} {author}", date.year()));
        if let Some(evr) = evr {
            header.push_str(&format!(" - {evr}"));
        }
        Self {
            header,
            content,
            trailing: Vec::new(),
            location: None,
        }
    }

    pub fn id(&self) -> Option<LineId> {
        self.location.map(|(id, _)| id)
    }

    fn rest(&self) -> Option<String> {
        HEADER
            .captures(&self.header)
            .and_then(|caps| caps.name("rest").map(|m| m.as_str().to_string()))
    }

    /// Author text and the version-release after ` - `, if any.
    fn split_rest(&self) -> (String, Option<String>) {
        let rest = self.rest().unwrap_or_default();
        match rest.rsplit_once(" - ") {
            Some((author, evr)) => (author.trim().to_string(), Some(evr.trim().to_string())),
            None => match rest.strip_suffix(']').and_then(|r| r.rsplit_once(" [")) {
                Some((author, evr)) => (author.trim().to_string(), Some(evr.to_string())),
                None => (rest, None),
            },
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        let caps = HEADER.captures(&self.header)?;
        let month = MONTHS.iter().position(|m| *m == &caps["month"])? as u32 + 1;
        let date = NaiveDate::from_ymd_opt(caps["year"].parse().ok()?, month, caps["day"].parse().ok()?)?;
        let time = match caps.name("time") {
            Some(time) => Some(NaiveTime::parse_from_str(time.as_str(), "%H:%M:%S").ok()?),
            None => None,
        };
        Some(Timestamp {
            date,
            time,
            zone: caps.name("zone").map(|m| m.as_str().to_string()),
        })
    }

    pub fn extended_timestamp(&self) -> bool {
        HEADER
            .captures(&self.header)
            .is_some_and(|caps| caps.name("time").is_some())
    }

    /// Spaces before the day of month, followed by `0` when the day is
    /// zero-padded.
    pub fn day_of_month_padding(&self) -> String {
        let Some(caps) = HEADER.captures(&self.header) else {
            return String::new();
        };
        let day = &caps["day"];
        let zero = if day.len() == 2 && day.starts_with('0') {
            "0"
        } else {
            ""
        };
        format!("{}{zero}", &caps["padding"])
    }

    /// Author without the e-mail address.
    pub fn author(&self) -> String {
        let (author, _) = self.split_rest();
        match author.split_once('<') {
            Some((name, _)) => name.trim().to_string(),
            None => author,
        }
    }

    pub fn email(&self) -> Option<String> {
        let (author, _) = self.split_rest();
        let start = author.find('<')?;
        let end = author[start..].find('>')?;
        Some(author[start + 1..start + end].to_string())
    }

    /// Version-release of the entry, unless the header carries none.
    pub fn evr(&self) -> Option<Evr> {
        let (_, evr) = self.split_rest();
        let evr = evr?;
        let evr = evr.trim_end_matches(':');
        if evr.starts_with('<') && evr.ends_with('>') {
            return None;
        }
        Evr::parse(evr)
    }

    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![self.header.clone()];
        lines.extend(self.content.iter().cloned());
        lines.extend(self.trailing.iter().cloned());
        lines
    }
}

/// Entries of one `%changelog` section, newest first as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogSection {
    pub section: Section,
    pub entries: Vec<ChangelogEntry>,
    /// Whether the only content is `%autochangelog`
    pub automatic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog {
    sections: Vec<ChangelogSection>,
}

impl Changelog {
    pub fn parse(store: &LineStore, sections: &Sections) -> Self {
        let sections = sections
            .find_all("changelog")
            .map(|section| parse_section(store, section))
            .collect::<Vec<_>>();
        log::debug!(
            "Parsed {} changelog entries",
            sections.iter().map(|s| s.entries.len()).sum::<usize>()
        );
        Self { sections }
    }

    pub fn sections(&self) -> &[ChangelogSection] {
        &self.sections
    }

    /// Entries of every section, in document order.
    pub fn entries(&self) -> impl Iterator<Item = &ChangelogEntry> {
        self.sections.iter().flat_map(|s| s.entries.iter())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Whether the first changelog section is generated by `%autochangelog`.
    pub fn is_automatic(&self) -> bool {
        self.sections.first().is_some_and(|s| s.automatic)
    }

    /// Oldest-to-newest run of entries from the first one whose
    /// version-release reaches `since` to the last one not past `until`,
    /// in document order. Entries inside the run are kept whatever their
    /// own version-release, so a rebuild or downgrade in between stays.
    pub fn filter<'a>(
        &'a self,
        since: Option<&Evr>,
        until: Option<&Evr>,
    ) -> impl Iterator<Item = &'a ChangelogEntry> + use<'a> {
        let chronological: Vec<&ChangelogEntry> = self.entries().collect::<Vec<_>>().into_iter().rev().collect();
        let start = match since {
            None => 0,
            Some(since) => chronological
                .iter()
                .position(|entry| entry.evr().is_some_and(|evr| &evr >= since))
                .unwrap_or(chronological.len()),
        };
        let end = match until {
            None => chronological.len(),
            Some(until) => chronological
                .iter()
                .rposition(|entry| entry.evr().is_some_and(|evr| &evr <= until))
                .map_or(0, |i| i + 1),
        };
        let selected = chronological.get(start..end).unwrap_or_default().to_vec();
        selected.into_iter().rev()
    }
}

fn parse_section(store: &LineStore, section: &Section) -> ChangelogSection {
    let body = section.body();
    let mut entries = Vec::new();
    let mut current: Option<(usize, String, Vec<String>)> = None;
    let mut preceding = Vec::new();
    for index in body.clone() {
        let text = store.text(index);
        let starts_entry = is_header(text)
            && current
                .as_ref()
                .is_none_or(|(_, _, content)| content.iter().any(|l| !l.trim().is_empty()));
        if starts_entry {
            if let Some(entry) = current.take() {
                entries.push(finish(store, entry, index));
            }
            current = Some((index, text.to_string(), Vec::new()));
        } else if let Some((_, _, content)) = current.as_mut() {
            content.push(text.to_string());
        } else {
            preceding.push(text.trim());
        }
    }
    if let Some(entry) = current.take() {
        entries.push(finish(store, entry, body.end));
    }
    let meaningful: Vec<&str> = preceding.into_iter().filter(|l| !l.is_empty()).collect();
    ChangelogSection {
        section: section.clone(),
        automatic: entries.is_empty() && meaningful == [AUTOCHANGELOG],
        entries,
    }
}

fn finish(store: &LineStore, (start, header, mut content): (usize, String, Vec<String>), end: usize) -> ChangelogEntry {
    let mut trailing = Vec::new();
    while content.last().is_some_and(|l| l.trim().is_empty()) {
        if let Some(line) = content.pop() {
            trailing.insert(0, line);
        }
    }
    ChangelogEntry {
        header,
        content,
        trailing,
        location: Some((store.lines()[start].id(), end - start)),
    }
}

/// Where a new entry ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Written at the top of the first changelog section
    Written,
    /// The section is generated by `%autochangelog`; the entry was not
    /// written to the document
    Redirected(ChangelogEntry),
}

/// Details of an entry to add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub author: String,
    pub email: Option<String>,
    pub content: Vec<String>,
    pub evr: Option<String>,
    pub timestamp: Timestamp,
}

/// Prepend an entry to the first changelog section, in the timestamp style
/// and day padding of the entry currently on top.
pub fn add_entry(store: &mut LineStore, changelog: &Changelog, entry: NewEntry) -> Result<Placement> {
    let first = changelog
        .sections
        .first()
        .ok_or_else(|| EngineError::NotFound("%changelog section".to_string()))?;
    let top = first.entries.first();
    let mut timestamp = entry.timestamp;
    if let Some(top) = top {
        if top.extended_timestamp() && timestamp.time.is_none() {
            timestamp.time = NaiveTime::from_hms_opt(12, 0, 0);
        } else if !top.extended_timestamp() {
            timestamp.time = None;
            timestamp.zone = None;
        }
    }
    let padding = top.map_or("0".to_string(), ChangelogEntry::day_of_month_padding);
    let author = match &entry.email {
        Some(email) => format!("{} <{email}>", entry.author),
        None => entry.author.clone(),
    };
    let mut new = ChangelogEntry::assemble(&timestamp, &author, entry.content, entry.evr.as_deref(), &padding);
    if first.automatic {
        log::debug!("Redirecting changelog entry, the section uses {AUTOCHANGELOG}");
        return Ok(Placement::Redirected(new));
    }
    let at = match top.and_then(ChangelogEntry::id) {
        Some(id) => {
            new.trailing.push(String::new());
            store
                .position(id)
                .ok_or_else(|| EngineError::NotFound("changelog entry".to_string()))?
        }
        None => {
            let range = sections::locate(store, &first.section)?;
            let mut at = range.end;
            while at > range.start + 1 && store.text(at - 1).trim().is_empty() {
                at -= 1;
            }
            at
        }
    };
    store.insert(at, new.render());
    Ok(Placement::Written)
}

fn located(store: &LineStore, entry: &ChangelogEntry) -> Result<std::ops::Range<usize>> {
    entry
        .location
        .and_then(|(id, count)| store.position(id).map(|start| start..start + count))
        .ok_or_else(|| EngineError::NotFound(format!("changelog entry `{}`", entry.header)))
}

/// Write a modified entry back over its lines.
pub fn update(store: &mut LineStore, entry: &ChangelogEntry) -> Result<()> {
    let range = located(store, entry)?;
    store.replace(range, entry.render());
    Ok(())
}

pub fn remove(store: &mut LineStore, entry: &ChangelogEntry) -> Result<()> {
    let range = located(store, entry)?;
    store.delete(range);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::macro_definitions::MacroDefinitions;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const SPEC: &str = "\
Name: foo

%changelog
* Tue Mar 05 2024 Jane Doe <jane@example.com> - 1.1-1
- New upstream release

- Drop old patch

* Mon Jan  1 2024 John Smith <john@example.com> - 1.0-1
- Initial package
";

    fn parse(store: &LineStore) -> Changelog {
        let definitions = MacroDefinitions::parse(store);
        Changelog::parse(store, &Sections::parse(store, &definitions, &[]))
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_parse_entries() {
        let store = LineStore::load(SPEC);

        let changelog = parse(&store);

        let entries: Vec<_> = changelog.entries().collect();
        assert_eq!(entries.len(), 2);
        let newest = entries[0];
        assert_eq!(newest.author(), "Jane Doe");
        assert_eq!(newest.email().as_deref(), Some("jane@example.com"));
        assert_eq!(newest.evr(), Evr::parse("1.1-1"));
        assert_eq!(newest.content, vec!["- New upstream release", "", "- Drop old patch"]);
        assert_eq!(newest.timestamp(), Some(Timestamp::date(date(2024, 3, 5))));
        assert_eq!(newest.day_of_month_padding(), "0");
        assert_eq!(entries[1].day_of_month_padding(), " ");
        assert!(entries[0].timestamp() > entries[1].timestamp());
    }

    #[test]
    fn test_render_round_trip() {
        let store = LineStore::load(SPEC);
        let changelog = parse(&store);

        let rendered: Vec<String> = changelog.entries().flat_map(ChangelogEntry::render).collect();

        assert_eq!(rendered, store.texts(3..store.len()));
    }

    #[rstest]
    #[case("* Mon Jan  1 2024 A - 1.0-1", true)]
    #[case("* Wed Jun 14 09:12:01 UTC 2006 - someone@example.com", true)]
    #[case("* Fri Feb 30 2024 A", true)]
    #[case("* not a header", false)]
    #[case("- * Mon Jan 1 2024", false)]
    fn test_is_header(#[case] line: &str, #[case] expected: bool) {
        assert_eq!(is_header(line), expected);
    }

    #[test]
    fn test_extended_timestamp() {
        let entry = ChangelogEntry::assemble(
            &Timestamp {
                date: date(2006, 6, 14),
                time: NaiveTime::from_hms_opt(9, 12, 1),
                zone: Some("CEST".to_string()),
            },
            "someone@example.com",
            vec![],
            None,
            "",
        );

        assert_eq!(entry.header, "* Wed Jun 14 09:12:01 CEST 2006 someone@example.com");
        assert!(entry.extended_timestamp());
        assert_eq!(entry.timestamp().unwrap().zone.as_deref(), Some("CEST"));
        assert_eq!(entry.evr(), None);
    }

    #[test]
    fn test_invalid_date_has_no_timestamp() {
        let entry = ChangelogEntry::assemble(&Timestamp::date(date(2024, 2, 1)), "A", vec![], None, "");
        let broken = ChangelogEntry {
            header: entry.header.replace(" 1 ", " 30 "),
            ..entry
        };

        assert_eq!(broken.timestamp(), None);
    }

    #[test]
    fn test_add_entry_matches_top_entry() {
        let mut store = LineStore::load(SPEC);
        let changelog = parse(&store);

        let placement = add_entry(
            &mut store,
            &changelog,
            NewEntry {
                author: "Jane Doe".to_string(),
                email: Some("jane@example.com".to_string()),
                content: vec!["- Rebuilt".to_string()],
                evr: Some("1.1-2".to_string()),
                timestamp: Timestamp::date(date(2024, 4, 2)),
            },
        )
        .unwrap();

        assert_eq!(placement, Placement::Written);
        assert_snapshot!(store.render(), @r"
        Name: foo

        %changelog
        * Tue Apr 02 2024 Jane Doe <jane@example.com> - 1.1-2
        - Rebuilt

        * Tue Mar 05 2024 Jane Doe <jane@example.com> - 1.1-1
        - New upstream release

        - Drop old patch

        * Mon Jan  1 2024 John Smith <john@example.com> - 1.0-1
        - Initial package
        ");
    }

    #[test]
    fn test_add_entry_to_empty_changelog() {
        let mut store = LineStore::load("Name: foo\n%changelog\n");
        let changelog = parse(&store);
        let entry = NewEntry {
            author: "A".to_string(),
            email: None,
            content: vec!["- First".to_string()],
            evr: None,
            timestamp: Timestamp::date(date(2024, 1, 7)),
        };

        add_entry(&mut store, &changelog, entry).unwrap();

        assert_eq!(store.render(), "Name: foo\n%changelog\n* Sun Jan 07 2024 A\n- First\n");
    }

    #[test]
    fn test_autochangelog_redirects() {
        let mut store = LineStore::load("Name: foo\n%changelog\n%autochangelog\n");
        let changelog = parse(&store);
        assert!(changelog.is_automatic());
        let entry = NewEntry {
            author: "A".to_string(),
            email: None,
            content: vec!["- Change".to_string()],
            evr: Some("1-1".to_string()),
            timestamp: Timestamp::date(date(2024, 1, 7)),
        };

        let placement = add_entry(&mut store, &changelog, entry).unwrap();

        assert!(matches!(placement, Placement::Redirected(ref e) if e.header == "* Sun Jan 07 2024 A - 1-1"));
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_multiple_sections_stay_separate() {
        let store = LineStore::load(
            "%changelog\n* Mon Jan  1 2024 A - 2-1\n- b\n%files\n%changelog\n* Sun Dec 31 2023 A - 1-1\n- a\n",
        );

        let changelog = parse(&store);

        assert_eq!(changelog.sections().len(), 2);
        assert!(changelog.sections().iter().all(|s| s.entries.len() == 1));
    }

    #[test]
    fn test_filter_by_evr() {
        let store = LineStore::load(SPEC);
        let changelog = parse(&store);
        let since = Evr::parse("1.0-2").unwrap();

        let headers: Vec<_> = changelog.filter(Some(&since), None).map(|e| e.author()).collect();

        assert_eq!(headers, vec!["Jane Doe"]);
    }

    #[rstest]
    #[case(Some("1.5-1"), None, vec!["C", "B"])]
    #[case(None, Some("1.0-1"), vec!["A"])]
    #[case(None, Some("1.5-1"), vec!["C", "B", "A"])]
    #[case(Some("1.0-1"), Some("1.0-1"), vec!["A"])]
    #[case(Some("3.0-1"), None, vec![])]
    #[case(None, Some("0.1-1"), vec![])]
    fn test_filter_keeps_a_contiguous_run(
        #[case] since: Option<&str>,
        #[case] until: Option<&str>,
        #[case] expected: Vec<&str>,
    ) {
        // Given a downgrade after the newest release
        let store = LineStore::load(
            "%changelog\n* Wed Mar 06 2024 C - 1.2-1\n- c\n\n* Tue Feb 06 2024 B - 2.0-1\n- b\n\n* Mon Jan 01 2024 A - 1.0-1\n- a\n",
        );
        let changelog = parse(&store);
        let since = since.map(|s| Evr::parse(s).unwrap());
        let until = until.map(|s| Evr::parse(s).unwrap());

        // When filtered
        let authors: Vec<_> = changelog.filter(since.as_ref(), until.as_ref()).map(|e| e.author()).collect();

        // Then the run between the bounds is kept as a whole
        assert_eq!(authors, expected);
    }
}
