//! Tree building over the Go fixtures in `tests/fixtures`.

use std::path::Path;

use gotest::core::builder::{BuildOptions, BuildWarning};
use gotest::core::invariants::validate_tree;
use gotest::core::pattern::compile;
use gotest::core::selector::nearest_node;
use gotest::test_support::build_fixture;
use gotest::tree::{NodeKind, Tree};

const GAPS: &str = include_str!("fixtures/gaps_test.go");
const TABLES: &str = include_str!("fixtures/tables_test.go");
const OPERAND: &str = include_str!("fixtures/operand_test.go");
const CUSTOM_SUITE: &str = include_str!("fixtures/custom_suite_test.go");

fn id(file: &str, path: &str) -> String {
    format!("example.com/fixture/{file}::{path}")
}

fn run_names(tree: &Tree, file: &str) -> Vec<String> {
    let file_id = format!("example.com/fixture/{file}");
    let file_node = tree.find(&file_id).expect("file node");
    tree.subtree(file_node)
        .into_iter()
        .skip(1)
        .filter_map(|node| tree.node(node).run_name())
        .collect()
}

#[test]
fn suite_methods_nest_until_a_large_gap() {
    let output = build_fixture(&[("gaps_test.go", GAPS)], &BuildOptions::default());
    let tree = &output.tree;
    assert!(output.warnings.is_empty(), "{:?}", output.warnings);

    let namespace = tree.find(&id("gaps_test.go", "TestGapSuite")).expect("namespace");
    assert_eq!(tree.node(namespace).kind, NodeKind::Namespace);
    assert_eq!(tree.node(namespace).name, "GapSuite");
    let nested: Vec<&str> = tree
        .children(namespace)
        .iter()
        .map(|child| tree.node(*child).name.as_str())
        .collect();
    assert_eq!(nested, vec!["TestFirst", "TestSecond", "TestFourth"]);

    let third = tree.find(&id("gaps_test.go", "TestGapSuite/TestThird")).expect("third");
    let file = tree.node(third).parent.expect("parent");
    assert_eq!(tree.node(file).kind, NodeKind::File);
    assert_eq!(tree.node(third).position.start_line(), 58);

    let inner = tree
        .find(&id("gaps_test.go", "TestGapSuite/TestSecond/inner_case"))
        .expect("suite subtest");
    assert_eq!(tree.node(inner).kind, NodeKind::Subtest);
    assert_eq!(tree.node(inner).name, "inner case");

    // The runner is folded into the namespace; no separate test node.
    assert_eq!(
        run_names(tree, "gaps_test.go")
            .iter()
            .filter(|name| *name == "TestGapSuite")
            .count(),
        1
    );

    let spec = compile(tree, Some(third)).expect("compile");
    assert_eq!(spec.run_pattern.as_deref(), Some("^TestGapSuite$/^TestThird$"));
    assert_eq!(
        nearest_node(tree, Path::new("gaps_test.go"), 59),
        Some(third)
    );
}

#[test]
fn smaller_gap_threshold_flattens_more() {
    let options = BuildOptions {
        gap_threshold: 1,
        ..BuildOptions::default()
    };
    let output = build_fixture(&[("gaps_test.go", GAPS)], &options);
    let tree = &output.tree;
    let namespace = tree.find(&id("gaps_test.go", "TestGapSuite")).expect("namespace");
    let nested: Vec<&str> = tree
        .children(namespace)
        .iter()
        .map(|child| tree.node(*child).name.as_str())
        .collect();
    assert_eq!(nested, vec!["TestFirst"]);
}

#[test]
fn subtests_and_table_cases_follow_the_source() {
    let output = build_fixture(&[("tables_test.go", TABLES)], &BuildOptions::default());
    let tree = &output.tree;
    assert!(validate_tree(tree).is_empty());

    let names = run_names(tree, "tables_test.go");
    for expected in [
        "TestSubtests",
        "TestSubtests/first_case",
        "TestSubtests/first_case/nested",
        "TestSubtests/second",
        "TestStructTable/upper_case",
        "TestStructTable/already_upper",
        "TestPositionalRows/one_plus_one",
        "TestPositionalRows/two_plus_two",
        "TestMapTable/small",
        "TestMapTable/large",
        "TestStringSlice/alpha",
        "TestStringSlice/beta",
        "TestDuplicateNames/same",
        "TestDuplicateNames/same#01",
        "TestDynamicName",
        "ExampleOutput",
    ] {
        assert!(names.iter().any(|name| name == expected), "missing {expected}: {names:?}");
    }
    assert!(!names.iter().any(|name| name.starts_with("TestMain")));
    assert!(!names.iter().any(|name| name.starts_with("Benchmark")));
    assert!(!names.iter().any(|name| name.starts_with("TestDynamicName/")));

    let case = tree
        .find(&id("tables_test.go", "TestStructTable/already_upper"))
        .expect("table case");
    assert_eq!(tree.node(case).kind, NodeKind::TableCase);
    assert_eq!(tree.node(case).position.start_line(), 22);
    let positional = tree
        .find(&id("tables_test.go", "TestPositionalRows/two_plus_two"))
        .expect("positional case");
    assert_eq!(tree.node(positional).position.start_line(), 41);
    let map_case = tree
        .find(&id("tables_test.go", "TestMapTable/large"))
        .expect("map case");
    assert_eq!(tree.node(map_case).position.start_line(), 54);

    assert!(output.warnings.iter().any(|warning| matches!(
        warning,
        BuildWarning::DuplicateName { id: dup } if dup.ends_with("TestDuplicateNames/same#01")
    )));
    assert!(output.warnings.iter().any(|warning| matches!(
        warning,
        BuildWarning::UnresolvedCase { line: 77, .. }
    )));
}

#[test]
fn duplicate_warnings_can_be_disabled() {
    let options = BuildOptions {
        warn_duplicates: false,
        ..BuildOptions::default()
    };
    let output = build_fixture(&[("tables_test.go", TABLES)], &options);
    assert!(
        !output
            .warnings
            .iter()
            .any(|warning| matches!(warning, BuildWarning::DuplicateName { .. }))
    );
    assert!(
        output
            .tree
            .find(&id("tables_test.go", "TestDuplicateNames/same#01"))
            .is_some()
    );
}

#[test]
fn only_the_bound_test_handle_creates_subtests() {
    let output = build_fixture(&[("operand_test.go", OPERAND)], &BuildOptions::default());
    let names = run_names(&output.tree, "operand_test.go");
    assert_eq!(
        names,
        vec![
            "TestOperand",
            "TestOperand/real_subtest",
            "TestOperand/real_subtest/inner_via_tt",
            "TestShadowed",
            "TestShadowed/before_shadow",
            "TestRenamedHandle",
            "TestRenamedHandle/uses_tt",
        ]
    );
}

#[test]
fn aliased_and_embedded_suites_resolve() {
    let output = build_fixture(
        &[("custom_suite_test.go", CUSTOM_SUITE)],
        &BuildOptions::default(),
    );
    let tree = &output.tree;
    assert_eq!(
        run_names(tree, "custom_suite_test.go"),
        vec![
            "TestDerivedSuite",
            "TestDerivedSuite/TestDerived",
            "TestDerivedSuite/TestDerived/derived_subtest",
            "Orphan",
            "Orphan/TestOrphaned",
        ]
    );
    let derived = tree
        .find(&id("custom_suite_test.go", "TestDerivedSuite"))
        .expect("namespace");
    assert_eq!(tree.node(derived).name, "DerivedSuite");
    assert_eq!(
        output.warnings,
        vec![BuildWarning::MissingSuiteRunner {
            suite: "Orphan".into()
        }]
    );
}

#[test]
fn suites_are_plain_tests_when_testify_is_disabled() {
    let options = BuildOptions {
        testify: false,
        ..BuildOptions::default()
    };
    let output = build_fixture(&[("custom_suite_test.go", CUSTOM_SUITE)], &options);
    assert_eq!(
        run_names(&output.tree, "custom_suite_test.go"),
        vec!["TestDerivedSuite"]
    );
}

#[test]
fn suite_runner_in_another_file_keeps_its_own_node() {
    let runner = "package gaps\n\nimport (\n\t\"testing\"\n\n\t\"github.com/stretchr/testify/suite\"\n)\n\nfunc TestSplit(t *testing.T) {\n\tsuite.Run(t, new(SplitSuite))\n}\n";
    let methods = "package gaps\n\nimport \"github.com/stretchr/testify/suite\"\n\ntype SplitSuite struct {\n\tsuite.Suite\n}\n\nfunc (s *SplitSuite) TestOne() {}\n";
    let output = build_fixture(
        &[("a_runner_test.go", runner), ("b_methods_test.go", methods)],
        &BuildOptions::default(),
    );
    let tree = &output.tree;
    assert!(output.warnings.is_empty(), "{:?}", output.warnings);
    assert_eq!(run_names(tree, "a_runner_test.go"), vec!["TestSplit"]);
    assert_eq!(
        run_names(tree, "b_methods_test.go"),
        vec!["TestSplit", "TestSplit/TestOne"]
    );
    assert_eq!(tree.roots().len(), 1);
}

fn suite_with_gap(gap: u32) -> String {
    // TestA ends on line 18; TestB starts `gap` lines later.
    let head = "package gaps\n\nimport (\n\t\"testing\"\n\n\t\"github.com/stretchr/testify/suite\"\n)\n\ntype S struct {\n\tsuite.Suite\n}\n\nfunc TestS(t *testing.T) {\n\tsuite.Run(t, new(S))\n}\n\nfunc (s *S) TestA() {\n}\n";
    let padding = "\n".repeat(gap as usize - 1);
    format!("{head}{padding}func (s *S) TestB() {{}}\n")
}

#[test]
fn gap_threshold_boundary() {
    let at_threshold = build_fixture(
        &[("s_test.go", suite_with_gap(20).as_str())],
        &BuildOptions::default(),
    );
    let tree = &at_threshold.tree;
    let b = tree.find(&id("s_test.go", "TestS/TestB")).expect("TestB");
    assert_eq!(tree.node(b).position.start_line(), 38);
    let parent = tree.node(b).parent.expect("parent");
    assert_eq!(tree.node(parent).kind, NodeKind::Namespace);

    let past = build_fixture(
        &[("s_test.go", suite_with_gap(21).as_str())],
        &BuildOptions::default(),
    );
    let tree = &past.tree;
    let b = tree.find(&id("s_test.go", "TestS/TestB")).expect("TestB");
    let parent = tree.node(b).parent.expect("parent");
    assert_eq!(tree.node(parent).kind, NodeKind::File);
    let spec = compile(tree, Some(b)).expect("compile");
    assert_eq!(spec.run_pattern.as_deref(), Some("^TestS$/^TestB$"));
}

#[test]
fn building_twice_is_deterministic() {
    let files = [
        ("gaps_test.go", GAPS),
        ("tables_test.go", TABLES),
        ("custom_suite_test.go", CUSTOM_SUITE),
    ];
    let snapshot = |tree: &Tree| {
        tree.iter()
            .map(|(_, node)| (node.id.clone(), node.position.clone()))
            .collect::<Vec<_>>()
    };
    let first = build_fixture(&files, &BuildOptions::default());
    let second = build_fixture(&files, &BuildOptions::default());
    assert_eq!(snapshot(&first.tree), snapshot(&second.tree));
    assert_eq!(first.warnings, second.warnings);
}

#[test]
fn subtests_inside_table_callbacks_repeat_per_case() {
    let source = r#"package nested

import "testing"

func TestNested(t *testing.T) {
	tests := []struct {
		name string
	}{
		{name: "one"},
		{name: "two"},
	}
	for _, tc := range tests {
		t.Run(tc.name, func(t *testing.T) {
			t.Run("inner", func(t *testing.T) {})
		})
	}
}
"#;
    let output = build_fixture(&[("nested_test.go", source)], &BuildOptions::default());
    assert_eq!(
        run_names(&output.tree, "nested_test.go"),
        vec![
            "TestNested",
            "TestNested/one",
            "TestNested/one/inner",
            "TestNested/two",
            "TestNested/two/inner",
        ]
    );
}

#[test]
fn tables_resolve_only_within_their_own_test() {
    let source = r#"package scoped

import "testing"

var shared = []struct {
	name string
}{
	{name: "pkg_level"},
}

func TestA(t *testing.T) {
	tests := []struct {
		name string
	}{
		{name: "alpha"},
		{name: "beta"},
	}
	for _, tc := range tests {
		t.Run(tc.name, func(t *testing.T) {})
	}
}

func TestB(t *testing.T) {
	tests := makeCases()
	for _, tc := range tests {
		t.Run(tc.name, func(t *testing.T) {})
	}
}

func TestShared(t *testing.T) {
	for _, tc := range shared {
		t.Run(tc.name, func(t *testing.T) {})
	}
}
"#;
    let output = build_fixture(&[("scoped_test.go", source)], &BuildOptions::default());
    assert_eq!(
        run_names(&output.tree, "scoped_test.go"),
        vec![
            "TestA",
            "TestA/alpha",
            "TestA/beta",
            "TestB",
            "TestShared",
            "TestShared/pkg_level",
        ]
    );
    assert!(output.warnings.iter().any(|warning| matches!(
        warning,
        BuildWarning::UnresolvedCase { line, .. } if *line == 26
    )));
}

#[test]
fn rebinding_a_table_before_the_loop_drops_its_cases() {
    let source = r#"package rebound

import "testing"

func TestRebound(t *testing.T) {
	tests := []struct {
		name string
	}{
		{name: "stale"},
	}
	_ = tests
	tests = nil
	{
		tests := loadCases()
		for _, tc := range tests {
			t.Run(tc.name, func(t *testing.T) {})
		}
	}
}
"#;
    let output = build_fixture(&[("rebound_test.go", source)], &BuildOptions::default());
    assert_eq!(run_names(&output.tree, "rebound_test.go"), vec!["TestRebound"]);
}

#[test]
fn closed_blocks_do_not_shadow_the_test_handle() {
    let source = r#"package closed

import "testing"

func TestA(t *testing.T) {
	helper := func() {
		t := 5
		_ = t
	}
	helper()
	if true {
		t := "x"
		_ = t
	}
	t.Run("real", func(t *testing.T) {})
}
"#;
    let output = build_fixture(&[("closed_test.go", source)], &BuildOptions::default());
    assert_eq!(
        run_names(&output.tree, "closed_test.go"),
        vec!["TestA", "TestA/real"]
    );
}

#[test]
fn keyed_rows_without_the_name_field_run_as_zero_value() {
    let source = r#"package zero

import "testing"

func TestA(t *testing.T) {
	tests := []struct {
		name  string
		input string
	}{
		{name: "ok", input: "a"},
		{input: "b"},
	}
	for _, tc := range tests {
		t.Run(tc.name, func(t *testing.T) {})
	}
}
"#;
    let output = build_fixture(&[("zero_test.go", source)], &BuildOptions::default());
    assert_eq!(
        run_names(&output.tree, "zero_test.go"),
        vec!["TestA", "TestA/ok", "TestA/#00"]
    );
    assert!(output.tree.find(&id("zero_test.go", "TestA/#00")).is_some());
}
