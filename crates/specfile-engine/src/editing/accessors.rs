//! Shortcuts for well-known tags and the changelog.

use chrono::{NaiveTime, Timelike, Utc};

use crate::editing::document::Document;
use crate::editing::session::View;
use crate::error::{EngineError, Result};
use crate::macros::ExpandError;
use crate::parsing::changelog::{self, NewEntry, Placement, Timestamp};
use crate::parsing::tags;

const DIST: &str = "%{?dist}";

/// Version-release written into new changelog entries by default.
pub const DEFAULT_EVR: &str = "%{?epoch:%{epoch}:}%{version}-%{release}";

impl Document {
    fn tag_value(&self, name: &str) -> Option<String> {
        self.tags(None)
            .ok()
            .and_then(|tags| tags.get(name).map(|tag| tag.value.clone()))
    }

    fn set_tag_value(&mut self, name: &str, value: &str) -> Result<()> {
        let mut session = self.open(View::Tags(None))?;
        let tags = session.tags(None)?;
        tags::set_value(session.lines_mut(), &tags, name, value)?;
        session.close()
    }

    pub fn version(&self) -> Option<String> {
        self.tag_value("version")
    }

    pub fn set_version(&mut self, version: &str) -> Result<()> {
        self.set_tag_value("version", version)
    }

    pub fn expanded_version(&self) -> Result<String> {
        let version = self
            .version()
            .ok_or_else(|| EngineError::NotFound("Version tag".to_string()))?;
        self.expand(&version)
            .map_err(|err| EngineError::malformed_directive(&version, err))
    }

    /// Release without the `%{?dist}` suffix.
    pub fn release(&self) -> Option<String> {
        self.tag_value("release")
            .map(|release| release.strip_suffix(DIST).unwrap_or(&release).to_string())
    }

    /// Set the release, keeping an existing `%{?dist}` suffix.
    pub fn set_release(&mut self, release: &str) -> Result<()> {
        let current = self
            .tag_value("release")
            .ok_or_else(|| EngineError::NotFound("Release tag".to_string()))?;
        let value = if current.ends_with(DIST) && !release.ends_with(DIST) {
            format!("{release}{DIST}")
        } else {
            release.to_string()
        };
        self.set_tag_value("release", &value)
    }

    /// Set both in one session, so the document is saved at most once.
    pub fn set_version_and_release(&mut self, version: &str, release: &str) -> Result<()> {
        let current = self
            .tag_value("release")
            .ok_or_else(|| EngineError::NotFound("Release tag".to_string()))?;
        let release = if current.ends_with(DIST) && !release.ends_with(DIST) {
            format!("{release}{DIST}")
        } else {
            release.to_string()
        };
        let mut session = self.open(View::Tags(None))?;
        let tags = session.tags(None)?;
        tags::set_value(session.lines_mut(), &tags, "version", version)?;
        let tags = session.tags(None)?;
        tags::set_value(session.lines_mut(), &tags, "release", &release)?;
        session.close()
    }

    pub fn has_autochangelog(&self) -> bool {
        self.changelog().is_automatic()
    }

    /// `[epoch:]version-release` as the build tool would compute it, with
    /// `dist` empty.
    pub fn default_evr(&self) -> Result<String, ExpandError> {
        let mut context = self.context().clone();
        context.define("dist", "");
        self.evaluator().expand(DEFAULT_EVR, &context)
    }

    /// Prepend a changelog entry dated now, for the current version-release.
    pub fn add_changelog_entry(
        &mut self,
        author: &str,
        email: Option<&str>,
        content: Vec<String>,
    ) -> Result<Placement> {
        let evr = self
            .default_evr()
            .map_err(|err| EngineError::malformed_directive(DEFAULT_EVR, err))?;
        let now = Utc::now();
        self.add_changelog_entry_with(NewEntry {
            author: author.to_string(),
            email: email.map(str::to_string),
            content,
            evr: Some(evr),
            timestamp: Timestamp {
                date: now.date_naive(),
                time: NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second()),
                zone: Some("UTC".to_string()),
            },
        })
    }

    pub fn add_changelog_entry_with(&mut self, entry: NewEntry) -> Result<Placement> {
        let mut session = self.open(View::Changelog)?;
        let current = session.changelog();
        let placement = changelog::add_entry(session.lines_mut(), &current, entry)?;
        session.close()?;
        if let Placement::Redirected(entry) = &placement {
            self.redirected.push(entry.clone());
        }
        Ok(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;

    const SPEC: &str = "\
Name: foo
Epoch: 1
Version: %{major}.2
Release: 3%{?dist}

%changelog
* Mon Jan 01 2024 A <a@example.com> - 1:1.1-1
- Old
";

    fn document() -> Document {
        Document::builder()
            .define("major", "4")
            .build_from_text(SPEC)
            .unwrap()
    }

    #[test]
    fn test_version_and_release() {
        let document = document();

        assert_eq!(document.version().as_deref(), Some("%{major}.2"));
        assert_eq!(document.expanded_version().unwrap(), "4.2");
        assert_eq!(document.release().as_deref(), Some("3"));
        assert!(!document.has_autochangelog());
    }

    #[test]
    fn test_set_release_keeps_dist() {
        let mut document = document();

        document.set_release("4").unwrap();

        assert_eq!(document.tags(None).unwrap().get("release").unwrap().value, "4%{?dist}");
        assert_eq!(document.release().as_deref(), Some("4"));
    }

    #[test]
    fn test_set_version_and_release() {
        let mut document = document();

        document.set_version_and_release("5.0", "1").unwrap();

        assert!(document.render().contains("Version: 5.0\nRelease: 1%{?dist}\n"));
    }

    #[test]
    fn test_default_evr() {
        let document = document();

        assert_eq!(document.default_evr().unwrap(), "1:4.2-3");
    }

    #[test]
    fn test_add_changelog_entry() {
        let mut document = document();
        let entry = NewEntry {
            author: "B".to_string(),
            email: Some("b@example.com".to_string()),
            content: vec!["- New".to_string()],
            evr: Some(document.default_evr().unwrap()),
            timestamp: Timestamp::date(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap()),
        };

        let placement = document.add_changelog_entry_with(entry).unwrap();

        assert_eq!(placement, Placement::Written);
        assert_snapshot!(document.render(), @r"
        Name: foo
        Epoch: 1
        Version: %{major}.2
        Release: 3%{?dist}

        %changelog
        * Sat Feb 03 2024 B <b@example.com> - 1:4.2-3
        - New

        * Mon Jan 01 2024 A <a@example.com> - 1:1.1-1
        - Old
        ");
    }

    #[test]
    fn test_autochangelog_entries_are_redirected() {
        let mut document = Document::from_text("Name: foo\nVersion: 1\nRelease: 1\n%changelog\n%autochangelog\n").unwrap();
        assert!(document.has_autochangelog());

        let placement = document
            .add_changelog_entry("A", None, vec!["- Change".to_string()])
            .unwrap();

        assert!(matches!(placement, Placement::Redirected(_)));
        assert_eq!(document.redirected_entries().len(), 1);
        assert!(document.render().ends_with("%autochangelog\n"));
    }
}
