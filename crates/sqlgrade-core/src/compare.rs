//! Comparator: diffs actual output against a test case's expected rows.
//!
//! Every actual and every expected row lands in exactly one
//! [`RowComparison`], so `row_comparisons.len() == max(actual, expected)`.

use crate::model::{ColumnMatch, ComparisonPolicy, RowComparison, RowOrder, ValidationDetails};
use crate::row::CanonicalRow;
use std::collections::HashMap;

const MISSING_ROW: &str = "missing row: query returned fewer rows than expected";
const EXTRA_ROW: &str = "unexpected extra row";

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub details: ValidationDetails,
    pub output_matches: bool,
}

pub fn compare(
    actual: &[CanonicalRow],
    expected: &[CanonicalRow],
    policy: &ComparisonPolicy,
) -> Comparison {
    let mut differences = Vec::new();

    let column_issues = column_differences(actual, expected, policy.columns);
    let column_mismatch = !column_issues.is_empty();
    differences.extend(column_issues);

    if actual.len() != expected.len() {
        differences.push(format!(
            "row count mismatch: expected {} rows, got {}",
            expected.len(),
            actual.len()
        ));
    }

    let row_comparisons = match policy.order {
        RowOrder::Ordered => compare_ordered(actual, expected, policy),
        RowOrder::Unordered => compare_unordered(actual, expected, policy),
    };

    let matching_row_count = row_comparisons.iter().filter(|r| r.matches).count();
    let total_row_count = row_comparisons.len();
    let output_matches = matching_row_count == total_row_count
        && total_row_count == expected.len()
        && !column_mismatch;

    if !output_matches
        && policy.order == RowOrder::Ordered
        && !column_mismatch
        && actual.len() == expected.len()
        && compare_unordered(actual, expected, policy)
            .iter()
            .all(|r| r.matches)
    {
        differences.push("rows match but are in a different order; check ORDER BY".into());
    }

    Comparison {
        details: ValidationDetails {
            row_comparisons,
            matching_row_count,
            total_row_count,
            comparison_differences: differences,
        },
        output_matches,
    }
}

fn compare_ordered(
    actual: &[CanonicalRow],
    expected: &[CanonicalRow],
    policy: &ComparisonPolicy,
) -> Vec<RowComparison> {
    (0..actual.len().max(expected.len()))
        .map(|i| pair(i, actual.get(i), expected.get(i), policy))
        .collect()
}

/// Multiset comparison. Equal rows are paired first; the remaining rows are
/// then paired positionally so their cell-level differences are reported,
/// and whatever is left over is missing or extra.
fn compare_unordered(
    actual: &[CanonicalRow],
    expected: &[CanonicalRow],
    policy: &ComparisonPolicy,
) -> Vec<RowComparison> {
    let mut used = vec![false; actual.len()];
    let mut paired: Vec<Option<usize>> = vec![None; expected.len()];

    match exact_index(actual, expected, policy) {
        Some(mut index) => {
            for (j, e) in expected.iter().enumerate() {
                if let Some(i) = index.get_mut(&row_key(e, &expected[0])).and_then(|v| v.pop()) {
                    if row_differences(&actual[i], e, policy).is_empty() {
                        used[i] = true;
                        paired[j] = Some(i);
                    }
                }
            }
        }
        None => {
            for (j, e) in expected.iter().enumerate() {
                let hit = (0..actual.len())
                    .find(|&i| !used[i] && row_differences(&actual[i], e, policy).is_empty());
                if let Some(i) = hit {
                    used[i] = true;
                    paired[j] = Some(i);
                }
            }
        }
    }

    let mut spare_actual = (0..actual.len()).filter(|&i| !used[i]);
    let mut out = Vec::with_capacity(actual.len().max(expected.len()));
    for (j, e) in expected.iter().enumerate() {
        let a = match paired[j] {
            Some(i) => Some(i),
            None => spare_actual.next(),
        };
        out.push(pair(out.len(), a.map(|i| &actual[i]), Some(e), policy));
    }
    for i in spare_actual {
        out.push(pair(out.len(), Some(&actual[i]), None, policy));
    }
    out
}

/// Hash index of actual rows keyed by their projection onto the expected
/// columns. Only usable without tolerance and when every expected row names
/// the same columns; otherwise equality is not a plain key comparison.
fn exact_index(
    actual: &[CanonicalRow],
    expected: &[CanonicalRow],
    policy: &ComparisonPolicy,
) -> Option<HashMap<String, Vec<usize>>> {
    if policy.tolerance.is_some() {
        return None;
    }
    let shape = expected.first()?;
    let same_shape = expected.iter().all(|e| {
        e.len() == shape.len() && shape.columns().all(|c| e.get(c).is_some())
    });
    if !same_shape {
        return None;
    }

    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    // reversed so that pop() hands out the earliest actual row first
    for (i, a) in actual.iter().enumerate().rev() {
        index.entry(row_key(a, shape)).or_default().push(i);
    }
    Some(index)
}

fn row_key(row: &CanonicalRow, shape: &CanonicalRow) -> String {
    shape
        .columns()
        .map(|c| match row.get(c) {
            Some(v) => v.canonical(),
            None => "\u{0}absent".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn pair(
    row_index: usize,
    actual: Option<&CanonicalRow>,
    expected: Option<&CanonicalRow>,
    policy: &ComparisonPolicy,
) -> RowComparison {
    let (matches, differences) = match (actual, expected) {
        (Some(a), Some(e)) => {
            let diffs = row_differences(a, e, policy);
            (diffs.is_empty(), diffs.join("; "))
        }
        (None, Some(_)) => (false, MISSING_ROW.to_string()),
        (Some(_), None) => (false, EXTRA_ROW.to_string()),
        (None, None) => (true, String::new()),
    };
    RowComparison {
        row_index,
        matches,
        actual_row: actual.cloned(),
        expected_row: expected.cloned(),
        differences,
    }
}

/// Cell-level differences between one actual and one expected row. Empty
/// means the rows match under `policy`.
pub fn row_differences(
    actual: &CanonicalRow,
    expected: &CanonicalRow,
    policy: &ComparisonPolicy,
) -> Vec<String> {
    let mut diffs = Vec::new();
    for (col, want) in expected.iter() {
        match actual.get(col) {
            None => diffs.push(format!("column '{}' missing", col)),
            Some(got) if !got.matches(want, policy.tolerance) => {
                diffs.push(format!("{}: expected {}, got {}", col, want, got))
            }
            Some(_) => {}
        }
    }
    if policy.columns == ColumnMatch::Exact {
        for col in actual.columns() {
            if expected.get(col).is_none() {
                diffs.push(format!("unexpected column '{}'", col));
            }
        }
    }
    diffs
}

/// Case-level column issues. Uses the first row on each side as the column
/// set; with no actual rows there is nothing to check.
fn column_differences(
    actual: &[CanonicalRow],
    expected: &[CanonicalRow],
    mode: ColumnMatch,
) -> Vec<String> {
    let (Some(a), Some(e)) = (actual.first(), expected.first()) else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    let actual_cols: Vec<&str> = a.columns().collect();
    for col in e.columns() {
        if a.get(col).is_none() {
            match closest(col, &actual_cols) {
                Some(hint) => issues.push(format!(
                    "missing column '{}' (did you mean '{}'?)",
                    col, hint
                )),
                None => issues.push(format!("missing column '{}'", col)),
            }
        }
    }

    if mode == ColumnMatch::Exact {
        if a.len() != e.len() {
            issues.push(format!(
                "column count mismatch: expected {}, got {}",
                e.len(),
                a.len()
            ));
        }
        for col in a.columns() {
            if e.get(col).is_none() {
                issues.push(format!("unexpected column '{}'", col));
            }
        }
    }
    issues
}

fn closest<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let lower = name.to_ascii_lowercase();
    candidates
        .iter()
        .map(|c| (*c, strsim::jaro_winkler(&lower, &c.to_ascii_lowercase())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Cell;

    fn row(pairs: &[(&str, Cell)]) -> CanonicalRow {
        CanonicalRow::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    fn nr(name: &str, n: i64) -> CanonicalRow {
        row(&[("name", Cell::text(name)), ("n", Cell::Integer(n))])
    }

    fn ordered() -> ComparisonPolicy {
        ComparisonPolicy::default()
    }

    fn unordered() -> ComparisonPolicy {
        ComparisonPolicy {
            order: RowOrder::Unordered,
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_output_matches() {
        let rows = vec![nr("a", 1), nr("b", 2)];
        let c = compare(&rows, &rows, &ordered());
        assert!(c.output_matches);
        assert_eq!(c.details.matching_row_count, 2);
        assert_eq!(c.details.total_row_count, 2);
        assert!(c.details.comparison_differences.is_empty());
    }

    #[test]
    fn test_order_sensitive_by_default() {
        let expected = vec![nr("a", 1), nr("b", 2)];
        let actual = vec![nr("b", 2), nr("a", 1)];

        let c = compare(&actual, &expected, &ordered());
        assert!(!c.output_matches);
        assert_eq!(c.details.matching_row_count, 0);
        assert!(c
            .details
            .comparison_differences
            .iter()
            .any(|d| d.contains("different order")));

        assert!(compare(&actual, &expected, &unordered()).output_matches);
    }

    #[test]
    fn test_fewer_rows_recorded_as_missing() {
        let expected = vec![nr("a", 1), nr("b", 2), nr("c", 3)];
        let actual = vec![nr("a", 1), nr("b", 2)];
        let c = compare(&actual, &expected, &ordered());
        assert_eq!(c.details.total_row_count, 3);
        assert_eq!(c.details.matching_row_count, 2);
        assert!(c.details.row_comparisons[2].actual_row.is_none());
        assert!(!c.details.row_comparisons[2].matches);
        assert!(c.details.comparison_differences[0].contains("row count mismatch"));
        assert!(!c.output_matches);
    }

    #[test]
    fn test_surplus_rows_recorded_as_extra() {
        let expected = vec![nr("a", 1)];
        let actual = vec![nr("a", 1), nr("z", 9), nr("y", 8)];
        for policy in [ordered(), unordered()] {
            let c = compare(&actual, &expected, &policy);
            assert_eq!(c.details.row_comparisons.len(), 3);
            assert_eq!(c.details.matching_row_count, 1);
            let extras = c
                .details
                .row_comparisons
                .iter()
                .filter(|r| r.expected_row.is_none())
                .count();
            assert_eq!(extras, 2);
            assert!(!c.output_matches);
        }
    }

    #[test]
    fn test_extra_columns_depend_on_policy() {
        let expected = vec![row(&[("n", Cell::Integer(1))])];
        let actual = vec![row(&[("n", Cell::Integer(1)), ("extra", Cell::text("x"))])];
        assert!(compare(&actual, &expected, &ordered()).output_matches);

        let exact = ComparisonPolicy {
            columns: ColumnMatch::Exact,
            ..Default::default()
        };
        let c = compare(&actual, &expected, &exact);
        assert!(!c.output_matches);
        assert!(c
            .details
            .comparison_differences
            .iter()
            .any(|d| d.contains("unexpected column 'extra'")));
    }

    #[test]
    fn test_missing_column_suggests_name() {
        let expected = vec![row(&[("revenue", Cell::Integer(1))])];
        let actual = vec![row(&[("revenu", Cell::Integer(1))])];
        let c = compare(&actual, &expected, &ordered());
        assert!(!c.output_matches);
        assert_eq!(
            c.details.comparison_differences[0],
            "missing column 'revenue' (did you mean 'revenu'?)"
        );
    }

    #[test]
    fn test_column_names_are_case_insensitive() {
        let expected = vec![row(&[("Revenue", Cell::Integer(1))])];
        let actual = vec![row(&[("REVENUE", Cell::Real(1.0))])];
        assert!(compare(&actual, &expected, &ordered()).output_matches);
    }

    #[test]
    fn test_tolerance() {
        let expected = vec![row(&[("avg", Cell::Real(2.3333))])];
        let actual = vec![row(&[("avg", Cell::Real(2.333333333))])];
        assert!(!compare(&actual, &expected, &ordered()).output_matches);
        let loose = ComparisonPolicy {
            tolerance: Some(0.001),
            ..Default::default()
        };
        assert!(compare(&actual, &expected, &loose).output_matches);

        let loose_unordered = ComparisonPolicy {
            order: RowOrder::Unordered,
            tolerance: Some(0.001),
            ..Default::default()
        };
        assert!(compare(&actual, &expected, &loose_unordered).output_matches);
    }

    #[test]
    fn test_unordered_reports_cell_diffs_for_unmatched() {
        let expected = vec![nr("a", 1), nr("b", 2)];
        let actual = vec![nr("b", 2), nr("a", 5)];
        let c = compare(&actual, &expected, &unordered());
        assert_eq!(c.details.total_row_count, 2);
        assert_eq!(c.details.matching_row_count, 1);
        let bad = c.details.row_comparisons.iter().find(|r| !r.matches).unwrap();
        assert_eq!(bad.differences, "n: expected 1, got 5");
    }

    #[test]
    fn test_unordered_duplicates_are_counted() {
        let expected = vec![nr("a", 1), nr("a", 1)];
        let actual = vec![nr("a", 1), nr("b", 1)];
        let c = compare(&actual, &expected, &unordered());
        assert_eq!(c.details.matching_row_count, 1);
        assert!(!c.output_matches);
    }

    #[test]
    fn test_empty_vs_empty_matches() {
        let c = compare(&[], &[], &ordered());
        assert!(c.output_matches);
        assert_eq!(c.details.total_row_count, 0);
        assert_eq!(c.details.matching_row_count, 0);
        assert!(c.details.row_comparisons.is_empty());
    }

    #[test]
    fn test_null_vs_empty_string_differs() {
        let expected = vec![row(&[("x", Cell::Null)])];
        let actual = vec![row(&[("x", Cell::text(""))])];
        let c = compare(&actual, &expected, &ordered());
        assert!(!c.output_matches);
        assert_eq!(c.details.row_comparisons[0].differences, "x: expected NULL, got \"\"");
    }
}
