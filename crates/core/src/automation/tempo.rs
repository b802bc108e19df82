use std::collections::HashMap;

use beatmix_project::Row;
use beatmix_transport::bpm_to_time;

use super::{Automation, ControlPoint, split_values};
use crate::grid::BeatGrid;
use crate::interpolate::{Interpolate, Interpolation};

/// An initialized track that tempo rows can follow.
#[derive(Debug, Clone)]
pub struct MasterTrack {
    pub position: usize,
    /// Local beat grid, starting at zero.
    pub grid: BeatGrid,
    pub bpm: f64,
}

impl MasterTrack {
    pub fn new(position: usize, grid: BeatGrid) -> Option<Self> {
        let bpm = grid.bpm()?;
        Some(Self {
            position,
            grid,
            bpm,
        })
    }

    /// Length of the master's own beat at global segment `index`, or its mean
    /// beat length outside its span.
    fn beat_length(&self, index: usize) -> f64 {
        match index.checked_sub(self.position) {
            Some(local) if local < self.grid.num_segments() => self.grid.duration(local),
            _ => bpm_to_time(self.bpm),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempoPoint<'a> {
    pub bpm: f64,
    pub master: Option<&'a MasterTrack>,
}

impl<'a> TempoPoint<'a> {
    /// Tempo the interpolated values are measured against.
    fn source_bpm(&self) -> f64 {
        self.master.map_or(self.bpm, |master| master.bpm)
    }
}

impl PartialEq for MasterTrack {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.grid == other.grid
    }
}

/// Beat durations of the whole mix, summed into its global grid times.
///
/// Rows are `index master tempo [kind]` or `index tempo [kind]`. With a known
/// master, `N%` is relative to the master's native tempo, a plain number is
/// absolute and anything else means the native tempo; the segment lengths
/// follow the master's own beats. Without a master the tempo must be a number.
pub struct Tempo<'a> {
    masters: &'a HashMap<String, MasterTrack>,
}

impl<'a> Tempo<'a> {
    pub fn new(masters: &'a HashMap<String, MasterTrack>) -> Self {
        Self { masters }
    }
}

impl<'a> Automation for Tempo<'a> {
    type Point = TempoPoint<'a>;
    type Item = f64;
    type Output = Vec<f64>;

    const ARITY: usize = 2;

    fn split_row<'r>(&self, row: &'r [String]) -> (&'r [String], Interpolation) {
        match row {
            // masterless row with a kind
            [_, tempo, kind] if kind.parse::<Interpolation>().is_ok() => {
                (std::slice::from_ref(tempo), Interpolation::parse_lenient(kind))
            }
            _ => split_values(row, Self::ARITY),
        }
    }

    fn parse_point(&self, values: &[String]) -> Option<TempoPoint<'a>> {
        let (name, token) = match values {
            [token] => (None, token),
            [name, token, ..] => (Some(name.as_str()), token),
            [] => return None,
        };

        match name.and_then(|name| self.masters.get(name)) {
            Some(master) => {
                let bpm = match token.strip_suffix('%') {
                    Some(percent) => percent
                        .parse::<f64>()
                        .ok()
                        .map(|pct| master.bpm * (1.0 + pct / 100.0)),
                    None => token.parse().ok(),
                };
                let bpm = bpm.filter(|bpm| usable_bpm(*bpm)).unwrap_or_else(|| {
                    log::warn!("tempo '{token}' is not usable, following the master at 0%");
                    master.bpm
                });
                Some(TempoPoint {
                    bpm,
                    master: Some(master),
                })
            }
            None => token
                .parse()
                .ok()
                .filter(|bpm: &f64| usable_bpm(*bpm))
                .map(|bpm| TempoPoint { bpm, master: None }),
        }
    }

    fn timeline_end(&self) -> usize {
        self.masters
            .values()
            .map(|master| master.position + master.grid.num_segments())
            .max()
            .unwrap_or(0)
    }

    fn expand(
        &self,
        from: &ControlPoint<TempoPoint<'a>>,
        to: &ControlPoint<TempoPoint<'a>>,
        steps: usize,
    ) -> Vec<f64> {
        let source = from.value.source_bpm();
        let bpms = from.value.bpm.interpolate(&to.value.bpm, steps, from.kind);

        bpms.into_iter()
            .enumerate()
            .map(|(step, bpm)| {
                let length = match from.value.master {
                    Some(master) => master.beat_length(from.index + step),
                    None => bpm_to_time(source),
                };
                let duration = length * source / bpm;
                if duration.is_finite() && duration > 0.0 {
                    duration
                } else {
                    length
                }
            })
            .collect()
    }

    fn empty(&self) -> Vec<f64> {
        vec![0.0]
    }

    fn process(&self, durations: Vec<f64>) -> Vec<f64> {
        let mut times = Vec::with_capacity(durations.len() + 1);
        let mut now = 0.0;
        times.push(now);
        for duration in durations {
            now += duration;
            times.push(now);
        }
        times
    }
}

fn usable_bpm(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

/// Cut tempo rows where they depend on a track whose beats are still unknown.
///
/// Interpretation stops at the first row following such a track, and at an
/// interpolating row whose target row follows one.
pub fn truncate_tempo_rows<'r>(rows: &'r [Row], is_pending: impl Fn(&str) -> bool) -> &'r [Row] {
    let pending = |row: &Row| row_master(row).is_some_and(&is_pending);

    for (i, row) in rows.iter().enumerate() {
        if pending(row) {
            return &rows[..i];
        }
        if row_kind(row) != Interpolation::Constant && rows.get(i + 1).is_some_and(pending) {
            return &rows[..i];
        }
    }
    rows
}

fn row_kind(row: &[String]) -> Interpolation {
    match row {
        [_, _, _, kind] | [_, _, kind] => kind.parse().unwrap_or_default(),
        _ => Interpolation::Constant,
    }
}

fn row_master(row: &[String]) -> Option<&str> {
    match row {
        [_, master, _, _] => Some(master.as_str()),
        [_, master, tempo] if tempo.parse::<Interpolation>().is_err() => Some(master.as_str()),
        _ => None,
    }
}
