//! Time/position mappings between playback time and plot coordinates.
//!
//! A plot draws its marker at `time_to_pos(time)` and turns a click at data
//! coordinate `p` into a seek to `pos_to_time(p)`. The two directions must
//! agree: `time_to_pos(pos_to_time(p)) == p` within floating point tolerance
//! for every `p` inside the mapped range. The built-in variants guarantee
//! this by requiring strictly increasing support points.

use std::fmt;
use std::sync::Arc;

use crate::error::MappingError;

/// One direction of a custom mapping.
pub type MapFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Bidirectional mapping between seconds and plot x coordinates.
#[derive(Clone)]
pub enum TimeMapping {
    /// Piecewise-linear interpolation through `(time, position)` points.
    Piecewise {
        times: Vec<f64>,
        positions: Vec<f64>,
    },

    /// Dense tick list: `ticks[i]` is the time shown at the i-th of
    /// `ticks.len()` evenly spaced positions between `first` and `last`.
    Dense {
        ticks: Vec<f64>,
        first: f64,
        last: f64,
    },

    /// Caller-supplied function pair (ease curves, log axes, ...).
    Custom {
        time_to_pos: MapFn,
        pos_to_time: MapFn,
    },
}

impl TimeMapping {
    /// Default mapping: `[0, duration]` spread linearly over `[x0, x1]`.
    ///
    /// # Errors
    ///
    /// Fails when `duration` is not positive or `x0 >= x1`.
    pub fn linear(duration: f64, x0: f64, x1: f64) -> Result<Self, MappingError> {
        Self::piecewise(&[(0.0, x0), (duration, x1)])
    }

    /// Piecewise-linear mapping through `(time, position)` points.
    ///
    /// # Errors
    ///
    /// - `MappingError::TooFewPoints` for fewer than two points
    /// - `MappingError::NonFinite` for NaN or infinite coordinates
    /// - `MappingError::NotMonotonic` unless both columns strictly increase
    pub fn piecewise(points: &[(f64, f64)]) -> Result<Self, MappingError> {
        if points.len() < 2 {
            return Err(MappingError::TooFewPoints(points.len()));
        }
        if let Some(index) = points
            .iter()
            .position(|(t, p)| !t.is_finite() || !p.is_finite())
        {
            return Err(MappingError::NonFinite(index));
        }
        let times: Vec<f64> = points.iter().map(|(t, _)| *t).collect();
        let positions: Vec<f64> = points.iter().map(|(_, p)| *p).collect();
        check_increasing(&times, "time")?;
        check_increasing(&positions, "position")?;
        Ok(Self::Piecewise { times, positions })
    }

    /// Dense tick mapping, typically from a spectrogram's frame times.
    ///
    /// # Errors
    ///
    /// Fails for fewer than two ticks, non-increasing ticks or an empty
    /// `first..last` range.
    pub fn dense(ticks: Vec<f64>, first: f64, last: f64) -> Result<Self, MappingError> {
        if ticks.len() < 2 {
            return Err(MappingError::TooFewPoints(ticks.len()));
        }
        if let Some(index) = ticks.iter().position(|t| !t.is_finite()) {
            return Err(MappingError::NonFinite(index));
        }
        check_increasing(&ticks, "tick")?;
        if !(first.is_finite() && last.is_finite() && last > first) {
            return Err(MappingError::EmptyRange { first, last });
        }
        Ok(Self::Dense { ticks, first, last })
    }

    /// Custom mapping from a function pair.
    ///
    /// The caller is responsible for the two functions being inverses.
    pub fn custom(
        time_to_pos: impl Fn(f64) -> f64 + Send + Sync + 'static,
        pos_to_time: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            time_to_pos: Arc::new(time_to_pos),
            pos_to_time: Arc::new(pos_to_time),
        }
    }

    /// Maps a playback time to a plot coordinate.
    pub fn time_to_pos(&self, time: f64) -> f64 {
        match self {
            Self::Piecewise { times, positions } => interpolate(time, times, positions),
            Self::Dense { ticks, first, last } => {
                let span = (ticks.len() - 1) as f64;
                let upper = ticks.partition_point(|tick| *tick < time);
                let raw = if upper >= ticks.len() {
                    span
                } else if upper == 0 {
                    0.0
                } else {
                    match (ticks.get(upper - 1), ticks.get(upper)) {
                        (Some(a), Some(b)) => (upper - 1) as f64 + (time - a) / (b - a),
                        _ => 0.0,
                    }
                };
                raw / span * (last - first) + first
            }
            Self::Custom { time_to_pos, .. } => time_to_pos(time),
        }
    }

    /// Maps a plot coordinate back to a playback time (unclamped).
    pub fn pos_to_time(&self, pos: f64) -> f64 {
        match self {
            Self::Piecewise { times, positions } => interpolate(pos, positions, times),
            Self::Dense { ticks, first, last } => {
                let span = (ticks.len() - 1) as f64;
                let index = ((pos - first) / (last - first) * span).clamp(0.0, span);
                let lower = index.floor();
                let alpha = index - lower;
                let lower = lower as usize;
                match (ticks.get(lower), ticks.get(lower + 1)) {
                    (Some(a), Some(b)) => a * (1.0 - alpha) + b * alpha,
                    (Some(a), None) => *a,
                    _ => 0.0,
                }
            }
            Self::Custom { pos_to_time, .. } => pos_to_time(pos),
        }
    }

    /// Position range covered by the built-in variants.
    pub fn position_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Piecewise { positions, .. } => Some((*positions.first()?, *positions.last()?)),
            Self::Dense { first, last, .. } => Some((*first, *last)),
            Self::Custom { .. } => None,
        }
    }
}

impl fmt::Debug for TimeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Piecewise { times, positions } => f
                .debug_struct("Piecewise")
                .field("times", times)
                .field("positions", positions)
                .finish(),
            Self::Dense { ticks, first, last } => f
                .debug_struct("Dense")
                .field("ticks", &ticks.len())
                .field("first", first)
                .field("last", last)
                .finish(),
            Self::Custom { .. } => f.write_str("Custom"),
        }
    }
}

fn check_increasing(values: &[f64], axis: &'static str) -> Result<(), MappingError> {
    match values.windows(2).position(|w| !matches!(w, [a, b] if b > a)) {
        Some(index) => Err(MappingError::NotMonotonic {
            axis,
            index: index + 1,
        }),
        None => Ok(()),
    }
}

/// Linear interpolation of `x` over increasing `xs`, clamped at both ends.
fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let (Some(&x_first), Some(&x_last), Some(&y_first), Some(&y_last)) =
        (xs.first(), xs.last(), ys.first(), ys.last())
    else {
        return 0.0;
    };
    if x.is_nan() || x <= x_first {
        return y_first;
    }
    if x >= x_last {
        return y_last;
    }

    // x_first < x < x_last, so 1 <= upper < len
    let upper = xs.partition_point(|v| *v <= x);
    match (
        xs.get(upper.wrapping_sub(1)),
        xs.get(upper),
        ys.get(upper.wrapping_sub(1)),
        ys.get(upper),
    ) {
        (Some(a), Some(b), Some(ya), Some(yb)) => {
            let alpha = (x - a) / (b - a);
            (1.0 - alpha) * ya + alpha * yb
        }
        _ => y_last,
    }
}
