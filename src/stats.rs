use std::{collections::HashMap, hash::Hash};

use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// Summary statistics over the non-null numeric cells of a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NumericStats {
    pub count: usize,
    pub min: Decimal,
    pub max: Decimal,
    pub mean: f64,
    pub median: Decimal,
    pub std_dev: Option<f64>,
}

impl NumericStats {
    pub fn from_values(values: &[Decimal]) -> Option<Self> {
        let median = median(values)?;
        let min = values.iter().min().copied()?;
        let max = values.iter().max().copied()?;
        let floats: Vec<f64> = values.iter().filter_map(|v| v.to_f64()).collect();
        let count = floats.len();
        let sum: f64 = floats.iter().sum();
        let sum_squares: f64 = floats.iter().map(|v| v * v).sum();
        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
        let std_dev = (count >= 2).then(|| {
            let variance = (sum_squares - count as f64 * mean * mean) / (count as f64 - 1.0);
            variance.max(0.0).sqrt()
        });
        Some(Self {
            count: values.len(),
            min,
            max,
            mean,
            median,
            std_dev,
        })
    }

    pub fn render_row(&self, name: &str) -> Vec<String> {
        vec![
            name.to_string(),
            self.count.to_string(),
            self.min.normalize().to_string(),
            self.max.normalize().to_string(),
            format_number(self.mean),
            self.median.normalize().to_string(),
            self.std_dev.map(format_number).unwrap_or_default(),
        ]
    }
}

/// Exact median; the mean of the two middle values for even counts.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        Some(midpoint(sorted[mid - 1], sorted[mid]))
    } else {
        Some(sorted[mid])
    }
}

fn midpoint(low: Decimal, high: Decimal) -> Decimal {
    match low.checked_add(high) {
        Some(sum) => sum / Decimal::TWO,
        None => low / Decimal::TWO + high / Decimal::TWO,
    }
}

/// Most frequent value; ties go to the value seen first.
pub fn mode<T, I>(values: I) -> Option<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    frequencies(values).into_iter().next().map(|(value, _)| value)
}

/// Values with their counts, most frequent first, ties in first-seen order.
pub fn frequencies<T, I>(values: I) -> Vec<(T, usize)>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, (usize, usize)> = HashMap::new();
    for (position, value) in values.into_iter().enumerate() {
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    let mut ranked: Vec<(T, usize, usize)> = counts
        .into_iter()
        .map(|(value, (count, first))| (value, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .map(|(value, count, _)| (value, count))
        .collect()
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.4}")
    }
}
