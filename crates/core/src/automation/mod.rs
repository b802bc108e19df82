//! Turning sparse control points into dense parameter curves.
//!
//! A control point row is `index value.. [kind]`. Consecutive points A and B
//! produce the values for the gap between them using A's interpolation kind.
//! The last point is held until the end of the timeline. What one step of a
//! gap means (a segment or a single frame) and what the dense values become is
//! up to each [`Automation`].

mod equalizer;
mod tempo;
mod volume;

pub use equalizer::Equalizer;
pub use tempo::{MasterTrack, Tempo, TempoPoint, truncate_tempo_rows};
pub use volume::Volume;

use beatmix_project::Row;

use crate::interpolate::Interpolation;

/// Something laid out in beat segments.
pub trait Timeline {
    fn num_segments(&self) -> usize;

    /// Frames between the starts of segments `start` and `stop`.
    fn num_samples(&self, start: usize, stop: usize) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlPoint<P> {
    pub index: usize,
    pub value: P,
    pub kind: Interpolation,
}

pub trait Automation {
    /// Parsed values of one row.
    type Point: Clone;
    /// One dense step.
    type Item;
    type Output;

    /// Number of value tokens a full row carries.
    const ARITY: usize;

    /// Interpret the value tokens of a row. `None` skips the row.
    fn parse_point(&self, values: &[String]) -> Option<Self::Point>;

    /// Segment index the curve runs up to.
    fn timeline_end(&self) -> usize;

    /// Number of steps between two segment indices.
    fn span(&self, from: usize, to: usize) -> usize {
        to - from
    }

    fn expand(
        &self,
        from: &ControlPoint<Self::Point>,
        to: &ControlPoint<Self::Point>,
        steps: usize,
    ) -> Vec<Self::Item>;

    /// Result for a curve without any control point.
    fn empty(&self) -> Self::Output;

    fn process(&self, items: Vec<Self::Item>) -> Self::Output;

    /// Parse rows into points sorted by index.
    ///
    /// Points are clamped to the timeline: anything after the end is dropped,
    /// the first point is copied back to index 0 and the last one forward to
    /// the end.
    fn points(&self, rows: &[Row]) -> Vec<ControlPoint<Self::Point>> {
        let mut points: Vec<ControlPoint<Self::Point>> =
            rows.iter().filter_map(|row| self.parse_row(row)).collect();
        points.sort_by_key(|point| point.index);

        let end = self.timeline_end();
        points.retain(|point| point.index <= end);

        if let Some(first) = points.first().filter(|point| point.index > 0) {
            let mut start = first.clone();
            start.index = 0;
            points.insert(0, start);
        }
        if let Some(last) = points.last().filter(|point| point.index < end) {
            let mut tail = last.clone();
            tail.index = end;
            tail.kind = Interpolation::Constant;
            points.push(tail);
        }
        points
    }

    /// Separate the value tokens after the index from the interpolation kind.
    fn split_row<'r>(&self, row: &'r [String]) -> (&'r [String], Interpolation) {
        split_values(row, Self::ARITY)
    }

    fn parse_row(&self, row: &Row) -> Option<ControlPoint<Self::Point>> {
        let Some(index) = row.first().and_then(|token| token.parse::<usize>().ok()) else {
            log::warn!("skipping automation row with invalid index: {row:?}");
            return None;
        };

        let (values, kind) = self.split_row(row);
        match self.parse_point(values) {
            Some(value) => Some(ControlPoint { index, value, kind }),
            None => {
                log::warn!("skipping automation row with invalid values: {row:?}");
                None
            }
        }
    }

    /// Dense curve for `rows`.
    fn apply(&self, rows: &[Row]) -> Self::Output {
        let points = self.points(rows);
        if points.is_empty() {
            return self.empty();
        }

        let mut items = Vec::new();
        for pair in points.windows(2) {
            let steps = self.span(pair[0].index, pair[1].index);
            items.extend(self.expand(&pair[0], &pair[1], steps));
        }
        self.process(items)
    }
}

/// A row carrying exactly `arity` values plus index and kind ends in the kind;
/// shorter rows hold their value.
pub(crate) fn split_values(row: &[String], arity: usize) -> (&[String], Interpolation) {
    match row.len() {
        0 => (row, Interpolation::Constant),
        len if len == arity + 2 => (&row[1..len - 1], Interpolation::parse_lenient(&row[len - 1])),
        _ => (&row[1..], Interpolation::Constant),
    }
}

#[cfg(test)]
pub(crate) fn rows(lines: &[&str]) -> Vec<Row> {
    lines
        .iter()
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::Interpolate;

    /// Plain per-segment numbers, for exercising the shared machinery.
    struct Plain {
        end: usize,
    }

    impl Automation for Plain {
        type Point = f64;
        type Item = f64;
        type Output = Vec<f64>;
        const ARITY: usize = 1;

        fn parse_point(&self, values: &[String]) -> Option<f64> {
            values.first()?.parse().ok()
        }

        fn timeline_end(&self) -> usize {
            self.end
        }

        fn expand(&self, from: &ControlPoint<f64>, to: &ControlPoint<f64>, steps: usize) -> Vec<f64> {
            from.value.interpolate(&to.value, steps, from.kind)
        }

        fn empty(&self) -> Vec<f64> {
            Vec::new()
        }

        fn process(&self, items: Vec<f64>) -> Vec<f64> {
            items
        }
    }

    #[test]
    fn test_output_spans_whole_timeline() {
        let plain = Plain { end: 10 };
        let out = plain.apply(&rows(&["0 1", "4 5 linear", "6 0"]));
        assert_eq!(out.len(), 10);
        assert_eq!(&out[..4], &[1.0; 4]);
        assert_eq!(&out[4..6], &[5.0, 2.5]);
        assert_eq!(&out[6..], &[0.0; 4]);
    }

    #[test]
    fn test_first_point_is_copied_to_zero() {
        let plain = Plain { end: 4 };
        assert_eq!(plain.apply(&rows(&["2 3"])), vec![3.0; 4]);
    }

    #[test]
    fn test_points_after_end_are_dropped() {
        let plain = Plain { end: 3 };
        assert_eq!(plain.apply(&rows(&["0 1", "2 2", "9 7"])), vec![1.0, 1.0, 2.0]);
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let plain = Plain { end: 2 };
        let out = plain.apply(&rows(&["x 1", "0 nope", "0 4 bogus"]));
        // the unknown kind falls back to constant
        assert_eq!(out, vec![4.0, 4.0]);
    }

    #[test]
    fn test_no_rows_is_empty() {
        let plain = Plain { end: 5 };
        assert!(plain.apply(&[]).is_empty());
    }

    #[test]
    fn test_unsorted_rows_are_ordered() {
        let plain = Plain { end: 4 };
        let out = plain.apply(&rows(&["2 8", "0 0 linear"]));
        assert_eq!(out, vec![0.0, 4.0, 8.0, 8.0]);
    }
}
