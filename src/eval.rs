//! In-memory reference semantics for conditions and sorts.
//!
//! Translators are checked against these functions on sample rows. Logic is
//! SQL three-valued: a comparison that touches NULL is UNKNOWN, AND/OR follow
//! Kleene rules, and UNKNOWN at the root does not match.

use std::cmp::Ordering;

use crate::ast::{AtomicCondition, Condition, Operand, Scalar, Sort, SortDirection};
use crate::coerce::{coerce, ColumnKind};
use crate::operator::Operator;
use crate::rows::Row;

/// Whether `row` satisfies `condition`.
pub fn evaluate(condition: &Condition, row: &Row) -> bool {
    evaluate_tri(condition, row) == Some(true)
}

/// Three-valued evaluation; `None` is UNKNOWN.
pub fn evaluate_tri(condition: &Condition, row: &Row) -> Option<bool> {
    match condition {
        Condition::And(children) => {
            let mut result = Some(true);
            for child in children {
                match evaluate_tri(child, row) {
                    Some(false) => return Some(false),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Condition::Or(children) => {
            let mut result = Some(false);
            for child in children {
                match evaluate_tri(child, row) {
                    Some(true) => return Some(true),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
        Condition::Atomic(atom) => evaluate_atomic(atom, row),
    }
}

fn evaluate_atomic(atom: &AtomicCondition, row: &Row) -> Option<bool> {
    let actual = row.get(&atom.column_key).unwrap_or(&Scalar::Null);

    match atom.operator {
        Operator::IsNull => return Some(actual.is_null()),
        Operator::IsNotNull => return Some(!actual.is_null()),
        _ => {}
    }
    if actual.is_null() {
        return None;
    }

    let kind = match atom.operator {
        Operator::Like | Operator::NotLike => ColumnKind::Text,
        _ => ColumnKind::from_declared(&atom.declared_column_type),
    };

    match (&atom.operator, &atom.value) {
        (Operator::In | Operator::NotIn, Operand::List(values)) => {
            let found = membership(actual, values, kind)?;
            Some(if atom.operator == Operator::In { found } else { !found })
        }
        (_, Operand::Scalar(expected)) => {
            let expected = coerce(expected, kind)?;
            if expected.is_null() {
                return None;
            }
            match atom.operator {
                Operator::Like | Operator::NotLike => {
                    let (Scalar::Text(value), Scalar::Text(pattern)) = (actual, &expected) else {
                        return None;
                    };
                    let matched = like_matches(value, pattern);
                    Some(if atom.operator == Operator::Like { matched } else { !matched })
                }
                op => {
                    let ordering = compare(actual, &expected)?;
                    Some(match op {
                        Operator::Equal => ordering == Ordering::Equal,
                        Operator::NotEqual => ordering != Ordering::Equal,
                        Operator::GreaterThan => ordering == Ordering::Greater,
                        Operator::GreaterOrEqual => ordering != Ordering::Less,
                        Operator::LessThan => ordering == Ordering::Less,
                        Operator::LessOrEqual => ordering != Ordering::Greater,
                        _ => return None,
                    })
                }
            }
        }
        _ => None,
    }
}

/// SQL `IN` membership: true on a match, UNKNOWN if a member is NULL or
/// incomparable, false otherwise.
fn membership(actual: &Scalar, values: &[Scalar], kind: ColumnKind) -> Option<bool> {
    let mut unknown = false;
    for value in values {
        match coerce(value, kind) {
            Some(v) if !v.is_null() => match compare(actual, &v) {
                Some(Ordering::Equal) => return Some(true),
                Some(_) => {}
                None => unknown = true,
            },
            _ => unknown = true,
        }
    }
    if unknown {
        None
    } else {
        Some(false)
    }
}

/// Compare two non-null scalars of compatible types.
pub fn compare(a: &Scalar, b: &Scalar) -> Option<Ordering> {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Int(x), Scalar::Float(y)) => (*x as f64).partial_cmp(y),
        (Scalar::Float(x), Scalar::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Scalar::Float(x), Scalar::Float(y)) => x.partial_cmp(y),
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
        (Scalar::Bytes(x), Scalar::Bytes(y)) => Some(x.cmp(y)),
        (Scalar::Timestamp(x), Scalar::Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// `%` matches any run of characters; everything else is literal.
pub fn like_matches(value: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return value == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Sort `rows` in place, stable. NULLs sort last ascending, first descending.
pub fn sort_rows(rows: &mut [Row], sorts: &[Sort]) {
    rows.sort_by(|a, b| compare_rows(a, b, sorts));
}

pub fn compare_rows(a: &Row, b: &Row, sorts: &[Sort]) -> Ordering {
    for sort in sorts {
        let left = a.get(&sort.column).unwrap_or(&Scalar::Null);
        let right = b.get(&sort.column).unwrap_or(&Scalar::Null);
        let ordering = total_order(left, right);
        let ordering = match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn rank(value: &Scalar) -> u8 {
    match value {
        Scalar::Bool(_) => 0,
        Scalar::Int(_) | Scalar::Float(_) => 1,
        Scalar::Text(_) => 2,
        Scalar::Bytes(_) => 3,
        Scalar::Timestamp(_) => 4,
        Scalar::Null => 5,
    }
}

/// Ordering used for sorting. Numbers compare by exact value with NaN above
/// every other number, so mixed Int/Float columns stay transitive.
fn total_order(a: &Scalar, b: &Scalar) -> Ordering {
    match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => x.cmp(y),
        (Scalar::Float(x), Scalar::Float(y)) => float_order(*x, *y),
        (Scalar::Int(x), Scalar::Float(y)) => int_float_order(*x, *y),
        (Scalar::Float(x), Scalar::Int(y)) => int_float_order(*y, *x).reverse(),
        _ => compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b))),
    }
}

fn float_order(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        // -0.0 and 0.0 are the same value
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer with a float, without rounding the integer.
fn int_float_order(i: i64, f: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let floor = f.floor();
    match i.cmp(&(floor as i64)) {
        Ordering::Equal if f > floor => Ordering::Less,
        ordering => ordering,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(age: i64, status: &str) -> Row {
        Row::from_pairs([("age", Scalar::Int(age)), ("status", Scalar::Text(status.into()))])
    }

    fn scenario_a() -> Condition {
        Condition::and(vec![
            Condition::atomic("age", Operator::GreaterThan, Scalar::Int(18), "integer"),
            Condition::or(vec![
                Condition::atomic("status", Operator::Equal, "active", "text"),
                Condition::atomic("status", Operator::Equal, "pending", "text"),
            ]),
        ])
    }

    #[test]
    fn test_scenario_a_only_first_row_matches() {
        let rows = [person(20, "active"), person(15, "active"), person(30, "closed")];
        let matched: Vec<bool> = rows.iter().map(|r| evaluate(&scenario_a(), r)).collect();
        assert_eq!(matched, vec![true, false, false]);
    }

    #[test]
    fn test_empty_combinators() {
        let row = person(1, "x");
        assert!(evaluate(&Condition::and(vec![]), &row));
        assert!(!evaluate(&Condition::or(vec![]), &row));
        assert!(evaluate(&Condition::and(vec![]), &Row::new()));
    }

    #[test]
    fn test_null_propagates_through_negation() {
        let row = Row::from_pairs([("status", Scalar::Null)]);
        let ne = Condition::atomic("status", Operator::NotEqual, "active", "text");
        let not_in =
            Condition::atomic("status", Operator::NotIn, vec![Scalar::Text("a".into())], "text");
        assert_eq!(evaluate_tri(&ne, &row), None);
        assert!(!evaluate(&ne, &row));
        assert!(!evaluate(&not_in, &row));
        assert!(evaluate(&Condition::null_check("status", Operator::IsNull), &row));
        assert!(evaluate(&Condition::null_check("missing", Operator::IsNull), &row));
    }

    #[test]
    fn test_kleene_or_with_unknown() {
        let row = Row::from_pairs([("a", Scalar::Null), ("b", Scalar::Int(1))]);
        let unknown = Condition::atomic("a", Operator::Equal, Scalar::Int(1), "int");
        let yes = Condition::atomic("b", Operator::Equal, Scalar::Int(1), "int");
        let no = Condition::atomic("b", Operator::Equal, Scalar::Int(2), "int");
        assert_eq!(evaluate_tri(&Condition::or(vec![unknown.clone(), yes]), &row), Some(true));
        assert_eq!(evaluate_tri(&Condition::or(vec![unknown.clone(), no.clone()]), &row), None);
        assert_eq!(evaluate_tri(&Condition::and(vec![unknown, no]), &row), Some(false));
    }

    #[test]
    fn test_not_in_with_null_member_never_matches() {
        let row = person(20, "active");
        let with_null = |first: &str| vec![Scalar::Text(first.into()), Scalar::Null];
        let cond = Condition::atomic("status", Operator::NotIn, with_null("closed"), "text");
        assert_eq!(evaluate_tri(&cond, &row), None);
        let cond = Condition::atomic("status", Operator::In, with_null("active"), "text");
        assert_eq!(evaluate_tri(&cond, &row), Some(true));
    }

    #[test]
    fn test_declared_type_coerces_operand() {
        let row = Row::from_pairs([("enabled", Scalar::Bool(true))]);
        let cond = Condition::atomic("enabled", Operator::Equal, "true", "boolean");
        assert!(evaluate(&cond, &row));
    }

    #[test]
    fn test_like_matching() {
        assert!(like_matches("hello world", "hello%"));
        assert!(like_matches("hello world", "%world"));
        assert!(like_matches("hello world", "h%o%d"));
        assert!(like_matches("a_b", "a_b"));
        assert!(!like_matches("axb", "a_b"));
        assert!(!like_matches("a", "a%a"));
        assert!(like_matches("", "%"));
    }

    #[test]
    fn test_sort_reversal_round_trip() {
        let mut asc = vec![person(30, "c"), person(10, "a"), person(20, "b")];
        let mut desc = asc.clone();
        let sorts = vec![Sort::asc("age")];
        let reversed: Vec<Sort> = sorts.iter().map(Sort::reversed).collect();

        sort_rows(&mut asc, &sorts);
        sort_rows(&mut desc, &reversed);
        let mut back = desc.clone();
        back.reverse();
        assert_eq!(back, asc);

        let twice: Vec<Sort> = reversed.iter().map(Sort::reversed).collect();
        sort_rows(&mut desc, &twice);
        assert_eq!(desc, asc);
    }

    #[test]
    fn test_nulls_sort_last_ascending() {
        let mut rows = vec![
            Row::from_pairs([("v", Scalar::Null)]),
            Row::from_pairs([("v", Scalar::Int(2))]),
            Row::from_pairs([("v", Scalar::Int(1))]),
        ];
        sort_rows(&mut rows, &[Sort::asc("v")]);
        assert_eq!(rows[0].get("v"), Some(&Scalar::Int(1)));
        assert_eq!(rows[2].get("v"), Some(&Scalar::Null));

        sort_rows(&mut rows, &[Sort::desc("v")]);
        assert_eq!(rows[0].get("v"), Some(&Scalar::Null));
    }

    #[test]
    fn test_tie_break_uses_second_sort() {
        let mut rows = vec![person(20, "b"), person(20, "a"), person(10, "z")];
        sort_rows(&mut rows, &[Sort::desc("age"), Sort::asc("status")]);
        let statuses: Vec<_> = rows.iter().map(|r| r.get("status").cloned().unwrap()).collect();
        assert_eq!(
            statuses,
            vec![Scalar::Text("a".into()), Scalar::Text("b".into()), Scalar::Text("z".into())]
        );
    }

    #[test]
    fn test_mixed_numeric_sort_is_total() {
        let nan = Scalar::Float(f64::NAN);
        assert_eq!(total_order(&nan, &Scalar::Int(1)), Ordering::Greater);
        assert_eq!(total_order(&Scalar::Int(1), &Scalar::Float(2.0)), Ordering::Less);
        assert_eq!(total_order(&nan, &Scalar::Float(2.0)), Ordering::Greater);
        assert_eq!(total_order(&Scalar::Int(0), &Scalar::Float(-0.0)), Ordering::Equal);
        assert_eq!(total_order(&Scalar::Int(i64::MAX), &Scalar::Float(9.3e18)), Ordering::Less);
        assert_eq!(total_order(&Scalar::Int(2), &Scalar::Float(1.5)), Ordering::Greater);

        // deterministic shuffle of NaN, Int, Float and NULL values
        let mut rows: Vec<Row> = (0..64i64)
            .map(|i| {
                let v = match (i * 37) % 5 {
                    0 => Scalar::Float(f64::NAN),
                    1 => Scalar::Int(i % 7),
                    2 => Scalar::Float((i % 9) as f64 - 3.5),
                    3 => Scalar::Null,
                    _ => Scalar::Float(f64::INFINITY),
                };
                Row::from_pairs([("v", v)])
            })
            .collect();
        sort_rows(&mut rows, &[Sort::asc("v")]);

        for pair in rows.windows(2) {
            assert_ne!(compare_rows(&pair[0], &pair[1], &[Sort::asc("v")]), Ordering::Greater);
        }
        let last_number = rows.iter().rev().find(|r| !r.get("v").is_some_and(Scalar::is_null));
        assert!(matches!(
            last_number.and_then(|r| r.get("v")),
            Some(Scalar::Float(f)) if f.is_nan()
        ));
        assert_eq!(rows.last().and_then(|r| r.get("v")), Some(&Scalar::Null));
    }
}
