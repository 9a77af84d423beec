use anyhow::Result;
use log::info;
use std::cmp::Ordering;

use crate::models::ObservationTable;

pub const TREND_EPSILON: f64 = 1e-6;

pub fn delta_value(first: f64, last: f64) -> f64 {
    last - first
}

/// `last / (first + eps)`; 0 when either end is missing or the denominator vanishes.
pub fn ratio_value(first: Option<f64>, last: Option<f64>) -> f64 {
    let (Some(first), Some(last)) = (first, last) else {
        return 0.0;
    };
    let denominator = first + TREND_EPSILON;
    if denominator == 0.0 {
        return 0.0;
    }
    let ratio = last / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

/// `(last - first) / (month_delta + eps)`; 0 when no month span exists.
pub fn slope_value(delta: Option<f64>, month_delta: Option<f64>) -> f64 {
    let (Some(delta), Some(month_delta)) = (delta, month_delta) else {
        return 0.0;
    };
    if month_delta == 0.0 {
        return 0.0;
    }
    let denominator = month_delta + TREND_EPSILON;
    if denominator == 0.0 {
        return 0.0;
    }
    let slope = delta / denominator;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

/// Row indices grouped by entity, each group in chronological order.
/// Rows with a missing month sort after dated rows; ties keep file order.
pub fn entity_timelines(ids: &[String], months: &[Option<f64>]) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_by(|a, b| {
        ids[*a]
            .cmp(&ids[*b])
            .then_with(|| compare_months(months[*a], months[*b]))
    });

    let mut timelines: Vec<Vec<usize>> = Vec::new();
    for row in order {
        match timelines.last_mut() {
            Some(current) if ids[current[0]] == ids[row] => current.push(row),
            _ => timelines.push(vec![row]),
        }
    }
    timelines
}

fn compare_months(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Appends per-entity `_delta`, `_ratio` and `_slope` columns for every
/// numeric column. Values are broadcast to all rows of the entity.
pub struct TemporalTrendBuilder;

impl TemporalTrendBuilder {
    pub fn build(table: &mut ObservationTable) -> Result<()> {
        let Some(months) = table.months.clone() else {
            info!("No month column present; temporal trend features skipped");
            return Ok(());
        };
        let timelines = entity_timelines(&table.ids, &months);
        let row_count = table.row_count();

        // Undated rows have no place in the timeline; an entity with no dated
        // rows at all falls back to file order.
        let dated_rows: Vec<Vec<usize>> = timelines
            .iter()
            .map(|rows| {
                let dated: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|row| months[*row].is_some())
                    .collect();
                if dated.is_empty() {
                    rows.clone()
                } else {
                    dated
                }
            })
            .collect();
        let month_spans: Vec<Option<f64>> = dated_rows
            .iter()
            .map(|rows| {
                let first = months[*rows.first()?]?;
                let last = months[*rows.last()?]?;
                Some(last - first)
            })
            .collect();

        let source_columns = table.numeric_column_names();
        let mut deltas = Vec::with_capacity(source_columns.len());
        let mut ratios = Vec::with_capacity(source_columns.len());
        let mut slopes = Vec::with_capacity(source_columns.len());

        for name in &source_columns {
            let Some(values) = table.column(name).and_then(|column| column.as_numeric()) else {
                continue;
            };
            let mut delta_column = vec![None; row_count];
            let mut ratio_column = vec![Some(0.0); row_count];
            let mut slope_column = vec![Some(0.0); row_count];

            let entities = timelines.iter().zip(&dated_rows).zip(&month_spans);
            for ((rows, dated), month_span) in entities {
                let first = dated.iter().find_map(|row| values[*row]);
                let last = dated.iter().rev().find_map(|row| values[*row]);
                let delta = first.zip(last).map(|(first, last)| delta_value(first, last));
                let ratio = ratio_value(first, last);
                let slope = slope_value(delta, *month_span);
                for row in rows {
                    delta_column[*row] = delta;
                    ratio_column[*row] = Some(ratio);
                    slope_column[*row] = Some(slope);
                }
            }

            deltas.push((format!("{name}_delta"), delta_column));
            ratios.push((format!("{name}_ratio"), ratio_column));
            slopes.push((format!("{name}_slope"), slope_column));
        }

        let added = deltas.len() + ratios.len() + slopes.len();
        for (name, values) in deltas.into_iter().chain(ratios).chain(slopes) {
            table.push_numeric(name, values)?;
        }
        info!(
            "Added {} trend feature(s) over {} entities",
            added,
            timelines.len()
        );
        Ok(())
    }
}
