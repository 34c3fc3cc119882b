//! Properties every document must keep across parsing and editing.

use pretty_assertions::assert_eq;
use rstest::rstest;
use specfile_engine::parsing::{sources, tags};
use specfile_engine::{Config, Document, EngineError, IndeterminatePolicy, View};
use specfile_engine::parsing::lines::LineStore;
use tempfile::TempDir;

fn fixture(name: &str) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    std::fs::read_to_string(format!(
        "{}/tests/fixtures/{name}.spec",
        env!("CARGO_MANIFEST_DIR")
    ))
    .unwrap()
}

const RECOMMENDS: &str = "\
Name: foo
Version: 1.0
%if %fedora >= 36
Recommends: bar
%endif
";

#[rstest]
#[case("complete")]
#[case("implicit")]
fn test_round_trip_identity(#[case] name: &str) {
    let text = fixture(name);

    let document = Document::from_text(&text).unwrap();

    assert_eq!(document.render(), text);
}

#[test]
fn test_editing_one_tag_changes_one_line() {
    // Given the complete fixture
    let text = fixture("complete");
    let mut document = Document::from_text(&text).unwrap();
    let before: Vec<_> = document.lines().lines().iter().map(|l| l.id()).collect();

    // When the version changes
    document.set_version("1.5.0").unwrap();

    // Then only the Version line has a new identity
    let after: Vec<_> = document.lines().lines().iter().map(|l| l.id()).collect();
    assert_eq!(before.len(), after.len());
    let changed: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
    assert_eq!(changed, vec![6]);
    assert_eq!(document.lines().text(6), "Version:        1.5.0");
    let untouched: Vec<&str> = text.lines().enumerate().filter(|(i, _)| *i != 6).map(|(_, l)| l).collect();
    let rendered = document.render();
    let now: Vec<&str> = rendered.lines().enumerate().filter(|(i, _)| *i != 6).map(|(_, l)| l).collect();
    assert_eq!(untouched, now);
}

#[test]
fn test_implicit_numbers_continue_after_explicit_maximum() {
    let document = Document::from_text("Source2: a.tar.gz\nSource: b.tar.gz\nSource: c.tar.gz\n").unwrap();

    let numbers: Vec<u32> = document.sources().unwrap().iter().map(|s| s.number).collect();

    assert_eq!(numbers, vec![2, 3, 4]);
}

#[rstest]
#[case("Source4294967295: a.tar.gz\nSource: b.tar.gz\n")]
#[case("Patch4294967295: a.patch\n\n%patchlist\nb.patch\n")]
#[case("Source4294967296: a.tar.gz\n")]
fn test_numbers_past_u32_are_malformed(#[case] text: &str) {
    let document = Document::from_text(text).unwrap();

    let result = document.sources().and_then(|_| document.patches());

    assert!(matches!(result, Err(EngineError::MalformedDirective { .. })));
}

#[test]
fn test_largest_source_number_refuses_append() {
    let mut document = Document::from_text("Source4294967295: a.tar.gz\n").unwrap();
    let mut session = document.open(View::Sources).unwrap();
    let current = session.sources().unwrap();

    let result = sources::append(session.lines_mut(), &current, "b.tar.gz");

    assert!(matches!(result, Err(EngineError::MalformedDirective { .. })));
    session.close().unwrap();
    assert_eq!(document.render(), "Source4294967295: a.tar.gz\n");
}

fn validity(text: &str) -> Vec<bool> {
    let document = Document::from_text(text).unwrap();
    document.lines().lines().iter().map(|l| l.is_live()).collect()
}

fn current_validity(lines: &LineStore) -> Vec<bool> {
    lines.lines().iter().map(|l| l.is_live()).collect()
}

#[rstest]
#[case("%global x 0\nName: foo\n%if %x\nRequires: a\n%endif\n%global x 1\n")]
#[case("%global x 1\nName: foo\n%if %x\nRequires: a\n%endif\n%undefine x\n")]
#[case("Name: foo\n%if 0%{?x}\nRequires: a\n%endif\n%global x 1\n")]
fn test_edit_in_block_agrees_with_fresh_parse(#[case] text: &str) {
    // Given a block guarded by a macro that changes after the block
    let mut document = Document::from_text(text).unwrap();
    assert_eq!(current_validity(document.lines()), validity(text));

    // When a line inside the block is edited
    {
        let mut session = document.open(View::Tags(None)).unwrap();
        let current = session.tags(None).unwrap();
        tags::set_value(session.lines_mut(), &current, "requires", "b").unwrap();
    }

    // Then validity is what parsing the new text from scratch gives
    let rendered = document.render();
    assert!(rendered.contains("Requires: b"));
    assert_eq!(current_validity(document.lines()), validity(&rendered));
}

#[test]
fn test_editing_definition_continuation_updates_macro() {
    // Given a %global whose body continues on the next line
    let text = "%global x 1 \\\n  2\nName: foo\n";
    let mut document = Document::from_text(text).unwrap();
    assert!(document.expand("%{x}").unwrap().ends_with('2'));

    // When only the continuation line changes
    {
        let mut session = document.open(View::MacroDefinitions).unwrap();
        session.lines_mut().replace(1..2, vec!["  3".to_string()]);
    }

    // Then the registered macro follows the new body
    assert_eq!(document.macro_definitions().get("x").unwrap().body, "1 \\\n  3");
    assert!(document.expand("%{x}").unwrap().ends_with('3'));
}

#[test]
fn test_appending_to_implicit_sources_stays_implicit() {
    let mut document = Document::from_text(&fixture("implicit")).unwrap();
    {
        let mut session = document.open(View::Sources).unwrap();
        let current = session.sources().unwrap();
        let number = sources::append(session.lines_mut(), &current, "legacy-docs.tar.gz").unwrap();
        assert_eq!(number, 2);
    }

    assert!(document.render().contains("Source: legacy-extra.tar.gz\nSource: legacy-docs.tar.gz\n"));
}

#[rstest]
#[case(Some("37"), true)]
#[case(Some("30"), false)]
#[case(None, false)]
fn test_conditional_validity(#[case] fedora: Option<&str>, #[case] expected: bool) {
    let text = "Name: foo\n%if 0%{?fedora} >= 36\nRecommends: bar\n%endif\n";
    let mut builder = Document::builder();
    if let Some(fedora) = fedora {
        builder = builder.define("fedora", fedora);
    }

    let document = builder.build_from_text(text).unwrap();

    assert_eq!(document.tags(None).unwrap().get("recommends").unwrap().valid, expected);
}

#[rstest]
#[case(IndeterminatePolicy::AssumeLive, true)]
#[case(IndeterminatePolicy::AssumeDead, false)]
fn test_unexpandable_condition_follows_policy(#[case] policy: IndeterminatePolicy, #[case] expected: bool) {
    let document = Document::builder()
        .indeterminate(policy)
        .build_from_text(RECOMMENDS)
        .unwrap();

    assert_eq!(document.tags(None).unwrap().get("recommends").unwrap().valid, expected);
    assert_eq!(document.diagnostics().len(), 1);
}

#[rstest]
#[case("%if 0\n%global v dead\n%endif\n%global v live\n")]
#[case("%global v live\n%if 0\n%global v dead\n%endif\n")]
fn test_lookup_prefers_valid_definition(#[case] text: &str) {
    let document = Document::from_text(text).unwrap();

    let definition = document.macro_definitions().get("v").cloned().unwrap();

    assert_eq!(definition.body, "live");
    assert!(definition.valid);
}

#[test]
fn test_documents_do_not_share_overrides() {
    let first = Document::builder().define("fedora", "38").build_from_text(RECOMMENDS).unwrap();
    let second = Document::builder().define("fedora", "30").build_from_text(RECOMMENDS).unwrap();

    assert_eq!(first.expand("%{fedora}").unwrap(), "38");
    assert_eq!(second.expand("%{fedora}").unwrap(), "30");
    assert!(first.tags(None).unwrap().get("recommends").unwrap().valid);
    assert!(!second.tags(None).unwrap().get("recommends").unwrap().valid);
}

#[test]
fn test_concurrent_macro_definition_sessions_fail() {
    let mut document = Document::from_text(RECOMMENDS).unwrap();
    let mut session = document.open(View::MacroDefinitions).unwrap();

    let nested = session.open(View::MacroDefinitions);

    assert!(matches!(nested, Err(EngineError::Reentrancy(_))));
}

#[test]
fn test_tags_session_nested_in_sections_session() {
    let mut document = Document::from_text(&fixture("complete")).unwrap();
    let mut sections = document.open(View::Sections).unwrap();
    {
        let mut inner = sections.open(View::Tags(Some("package -n python3-%{srcname}".to_string()))).unwrap();
        let current = inner.tags(Some("package -n python3-%{srcname}")).unwrap();
        tags::set_value(inner.lines_mut(), &current, "summary", "Python 3 bindings").unwrap();
        inner.close().unwrap();
    }

    let summary = sections
        .tags(Some("package -n python3-%{srcname}"))
        .unwrap()
        .get("summary")
        .map(|t| t.value.clone());
    assert_eq!(summary.as_deref(), Some("Python 3 bindings"));
    sections.close().unwrap();
}

#[test]
fn test_recommends_follows_fedora_override() {
    // Given a Recommends tag gated on %fedora >= 36
    let mut document = Document::from_text(RECOMMENDS).unwrap();

    // When fedora is 38
    document.set_override("fedora", Some("38"));
    document.reload().unwrap();
    {
        let session = document.open(View::Tags(None)).unwrap();
        let current = session.tags(None).unwrap();
        assert!(current.get("recommends").unwrap().valid);
    }

    // And then 30
    document.set_override("fedora", Some("30"));
    document.reload().unwrap();
    let session = document.open(View::Tags(None)).unwrap();
    let current = session.tags(None).unwrap();
    assert!(!current.get("recommends").unwrap().valid);
}

#[test]
fn test_unterminated_conditional_is_fatal() {
    let result = Document::from_text("Name: foo\n%if 1\nRecommends: bar\n");

    assert!(matches!(result, Err(EngineError::MalformedDocument { line: 2, .. })));
}

#[test]
fn test_complete_fixture_views() {
    let document = Document::from_text(&fixture("complete")).unwrap();

    assert_eq!(document.sources().unwrap().len(), 2);
    assert_eq!(
        document.sources().unwrap().get(0).unwrap().expanded_location.as_deref(),
        Some("https://example.org/example/archive/v1.4.2/example-1.4.2.tar.gz")
    );
    assert_eq!(document.patches().unwrap().get(1).unwrap().filename(), "0002-drop-bundled-lib.patch");
    let prep = document.prep().unwrap();
    assert_eq!(prep.len(), 3);
    assert_eq!(prep.patch(1).unwrap().strip_level(), Some(1));
    assert_eq!(document.changelog().len(), 2);
    assert!(document.tags(None).unwrap().get("requires").unwrap().valid);
    assert!(document.sections().get("check").is_some());
}

#[test]
fn test_autosave_writes_on_outermost_close() {
    // Given a file-backed document with autosave on
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foo.spec");
    std::fs::write(&path, RECOMMENDS).unwrap();
    let mut document = Document::from_path(&path).unwrap();
    document.set_autosave(true);

    // When editing through nested sessions
    {
        let mut outer = document.open(View::Sections).unwrap();
        {
            let mut inner = outer.open(View::Tags(None)).unwrap();
            let current = inner.tags(None).unwrap();
            tags::set_value(inner.lines_mut(), &current, "version", "2.0").unwrap();
        }
        // Then nothing is written before the outer session closes
        assert_eq!(std::fs::read_to_string(&path).unwrap(), RECOMMENDS);
    }

    assert_eq!(std::fs::read_to_string(&path).unwrap(), RECOMMENDS.replace("1.0", "2.0"));
}

#[test]
fn test_reload_reads_storage_again() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foo.spec");
    std::fs::write(&path, RECOMMENDS).unwrap();
    let mut document = Document::from_path(&path).unwrap();

    std::fs::write(&path, "Name: bar\n").unwrap();
    document.reload().unwrap();

    assert_eq!(document.render(), "Name: bar\n");
}

#[test]
fn test_document_from_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foo.spec");
    std::fs::write(&path, format!("{RECOMMENDS}%include %{{_sourcedir}}/extra.inc\n")).unwrap();
    std::fs::write(dir.path().join("extra.inc"), "").unwrap();
    let config = Config::from_toml(&format!(
        "spec_path = {:?}\nautosave = true\n\n[macros]\nfedora = \"40\"\n",
        path.to_str().unwrap()
    ))
    .unwrap();

    let mut document = Document::from_config(&config).unwrap();

    assert!(document.autosave());
    assert!(!document.is_degraded());
    assert!(document.tags(None).unwrap().get("recommends").unwrap().valid);
    document.set_release("2").unwrap_err();
    document.set_version("3.0").unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("Version: 3.0"));
}

#[test]
fn test_builder_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foo.spec");
    std::fs::write(&path, RECOMMENDS).unwrap();
    let config_file = dir.path().join("config.toml");
    std::fs::write(
        &config_file,
        format!("spec_path = {:?}\n\n[macros]\nfedora = \"30\"\n", path.to_str().unwrap()),
    )
    .unwrap();

    let document = Document::builder().with_config_file(&config_file).unwrap().build().unwrap();

    assert!(document.is_file_backed());
    assert!(!document.tags(None).unwrap().get("recommends").unwrap().valid);
}

#[test]
fn test_missing_config_file_changes_nothing() {
    let dir = TempDir::new().unwrap();

    let builder = Document::builder().with_config_file(dir.path().join("missing.toml")).unwrap();

    assert!(matches!(builder.build(), Err(EngineError::NotFileBacked)));
}
