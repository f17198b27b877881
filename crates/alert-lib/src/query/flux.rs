//! Typed Flux query rendering
//!
//! Every caller-supplied value goes through [`FluxQuery`] so that device ids
//! and field names are rendered as escaped string literals and thresholds as
//! float literals.

use super::{QueryError, SeriesSelector};

/// Final aggregation applied to the filtered series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Last,
    Count,
}

/// Flux query for a single sensor series
#[derive(Debug, Clone)]
pub struct FluxQuery {
    bucket: String,
    selector: SeriesSelector,
    value_above: Option<f64>,
    aggregate: Aggregate,
}

impl FluxQuery {
    /// Latest value of the series
    pub fn last(bucket: impl Into<String>, selector: SeriesSelector) -> Self {
        Self {
            bucket: bucket.into(),
            selector,
            value_above: None,
            aggregate: Aggregate::Last,
        }
    }

    /// Count of values strictly above `threshold`
    pub fn count_above(
        bucket: impl Into<String>,
        selector: SeriesSelector,
        threshold: f64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            selector,
            value_above: Some(threshold),
            aggregate: Aggregate::Count,
        }
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// Render the query text
    pub fn render(&self) -> Result<String, QueryError> {
        let range_secs = self.selector.range.as_secs();
        if range_secs == 0 {
            return Err(QueryError::InvalidQuery(
                "range must be at least one second".to_string(),
            ));
        }

        let mut query = format!(
            concat!(
                "from(bucket: {bucket})\n",
                "  |> range(start: -{range_secs}s)\n",
                "  |> filter(fn: (r) => r[\"_measurement\"] == {measurement})\n",
                "  |> filter(fn: (r) => r[\"device_id\"] == {device})\n",
                "  |> filter(fn: (r) => r[\"_field\"] == {field})\n",
            ),
            bucket = string_literal(&self.bucket),
            range_secs = range_secs,
            measurement = string_literal(&self.selector.measurement),
            device = string_literal(&self.selector.device_id),
            field = string_literal(&self.selector.field),
        );

        if let Some(threshold) = self.value_above {
            query.push_str(&format!(
                "  |> filter(fn: (r) => r[\"_value\"] > {})\n",
                float_literal(threshold)?
            ));
        }

        query.push_str(match self.aggregate {
            Aggregate::Last => "  |> last()",
            Aggregate::Count => "  |> count()",
        });

        Ok(query)
    }
}

/// Quote and escape a Flux string literal
fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // `${` opens string interpolation in Flux
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a float so Flux types it as `float`, never `int`
fn float_literal(value: f64) -> Result<String, QueryError> {
    if !value.is_finite() {
        return Err(QueryError::InvalidQuery(format!(
            "threshold must be finite, got {value}"
        )));
    }
    let rendered = format!("{value}");
    if rendered.contains('.') {
        Ok(rendered)
    } else {
        Ok(format!("{rendered}.0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn selector(device: &str) -> SeriesSelector {
        SeriesSelector::new("sensor_reading", device, "temperature", Duration::from_secs(60))
    }

    #[test]
    fn test_last_query_shape() {
        let query = FluxQuery::last("telemetry", selector("S1")).render().unwrap();

        assert!(query.starts_with("from(bucket: \"telemetry\")"));
        assert!(query.contains("range(start: -60s)"));
        assert!(query.contains("r[\"device_id\"] == \"S1\""));
        assert!(query.contains("r[\"_field\"] == \"temperature\""));
        assert!(query.ends_with("|> last()"));
        assert!(!query.contains("_value"));
    }

    #[test]
    fn test_count_query_uses_float_threshold() {
        let query = FluxQuery::count_above("telemetry", selector("S1"), 50.0)
            .render()
            .unwrap();

        assert!(query.contains("r[\"_value\"] > 50.0"));
        assert!(query.ends_with("|> count()"));

        let query = FluxQuery::count_above("telemetry", selector("S1"), 3.5)
            .render()
            .unwrap();
        assert!(query.contains("r[\"_value\"] > 3.5"));
    }

    #[test]
    fn test_device_id_cannot_break_out_of_literal() {
        let hostile = "S1\") |> drop(columns: [\"x\"]) // ${secret}";
        let query = FluxQuery::last("telemetry", selector(hostile)).render().unwrap();

        assert!(query.contains(r#"== "S1\") |> drop(columns: [\"x\"]) // \${secret}""#));
    }

    #[test]
    fn test_backslash_escaped() {
        assert_eq!(string_literal(r"a\b"), r#""a\\b""#);
        assert_eq!(string_literal("cost $5"), "\"cost $5\"");
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let result = FluxQuery::count_above("telemetry", selector("S1"), f64::NAN).render();
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[test]
    fn test_zero_range_rejected() {
        let mut sel = selector("S1");
        sel.range = Duration::from_millis(500);
        assert!(FluxQuery::last("telemetry", sel).render().is_err());
    }
}
