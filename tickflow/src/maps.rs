//! Stock mapper constructors: deltas, day bounds and the RC filter family.

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::mapper::{PrevAwareMapper, SimpleMapper};
use crate::stream::{Retroactor, Stream};

/// Element-wise delta against the previous element.
pub fn delta_mapper(source: &Stream<f64>, outer: Option<Retroactor>) -> PrevAwareMapper<f64, f64> {
    PrevAwareMapper::retroactive(
        source,
        |x, prev| match (x, prev) {
            (Some(x), Some(prev)) => Some(x - prev),
            _ => None,
        },
        outer,
    )
}

/// True on the first sample of each calendar day.
pub fn day_bound_mapper(
    source: &Stream<NaiveDateTime>,
    outer: Option<Retroactor>,
) -> PrevAwareMapper<NaiveDateTime, bool> {
    PrevAwareMapper::retroactive(
        source,
        |t, prev| match (t, prev) {
            (Some(t), Some(prev)) => Some(t.date() != prev.date()),
            _ => None,
        },
        outer,
    )
}

fn lo_alpha(alpha: Option<f64>, rc: f64) -> Result<f64> {
    match alpha {
        Some(alpha) => {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::param(format!("invalid alpha value ({alpha})")));
            }
            Ok(alpha)
        }
        None => {
            if rc < 0.0 {
                return Err(Error::param(format!("invalid rc value ({rc})")));
            }
            Ok(1.0 / (rc + 1.0))
        }
    }
}

fn hi_alpha(alpha: Option<f64>, rc: f64) -> Result<f64> {
    match alpha {
        Some(alpha) => {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::param(format!("invalid alpha value ({alpha})")));
            }
            Ok(alpha)
        }
        None => {
            if rc < 0.0 {
                return Err(Error::param(format!("invalid rc value ({rc})")));
            }
            Ok(rc / (rc + 1.0))
        }
    }
}

/// Simple low-pass RC filter.  Either `alpha` or the `rc` time constant is
/// given.  Stateful and irreversible, so it does not support retroaction.
pub fn lo_pass_mapper(
    source: &Stream<f64>,
    alpha: Option<f64>,
    rc: f64,
) -> Result<SimpleMapper<f64, f64>> {
    let alpha = lo_alpha(alpha, rc)?;
    let mut y: Option<f64> = None;
    Ok(SimpleMapper::without_retroaction(source, move |x| {
        y = match x {
            None => None,
            Some(x) => Some(match y {
                None => x,
                Some(y) => y + alpha * (x - y),
            }),
        };
        y
    }))
}

/// Low-pass RC filter applied to the element delta, tracking the level.
pub fn delta_lo_pass_mapper(
    source: &Stream<f64>,
    alpha: Option<f64>,
    rc: f64,
) -> Result<SimpleMapper<f64, f64>> {
    let alpha = lo_alpha(alpha, rc)?;
    let mut y: Option<f64> = None;
    let mut dy: Option<f64> = None;
    Ok(SimpleMapper::without_retroaction(source, move |x| {
        match (x, y) {
            (Some(x), Some(level)) => {
                let d = x - level;
                let smoothed = match dy {
                    None => d,
                    Some(dy) => dy + alpha * (d - dy),
                };
                dy = Some(smoothed);
                y = Some(level + smoothed);
            }
            _ => {
                y = x;
                dy = None;
            }
        }
        y
    }))
}

/// Simple high-pass RC filter.
pub fn hi_pass_mapper(
    source: &Stream<f64>,
    alpha: Option<f64>,
    rc: f64,
) -> Result<PrevAwareMapper<f64, f64>> {
    let alpha = hi_alpha(alpha, rc)?;
    let mut y: Option<f64> = None;
    Ok(PrevAwareMapper::without_retroaction(
        source,
        move |x, prev| {
            y = match (x, prev) {
                (Some(x), Some(prev)) => Some(match y {
                    None => 0.0,
                    Some(y) => alpha * (y + (x - prev)),
                }),
                _ => None,
            };
            y
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::Mapper;

    fn drain<M: Mapper>(mapper: &mut M) -> Vec<Option<M::Out>> {
        let mut out = Vec::new();
        while let Some(value) = mapper.next().unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn lo_pass_smooths() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let mut mapper = lo_pass_mapper(&source, Some(0.5), 10.0).unwrap();
        assert_eq!(
            drain(&mut mapper),
            vec![Some(1.0), Some(1.5), Some(2.25), Some(3.125)]
        );
    }

    #[test]
    fn lo_pass_resets_on_none() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), None, Some(5.0)]);
        let mut mapper = lo_pass_mapper(&source, Some(0.5), 10.0).unwrap();
        assert_eq!(drain(&mut mapper), vec![Some(1.0), None, Some(5.0)]);
    }

    #[test]
    fn lo_pass_rejects_bad_alpha() {
        let source: Stream<f64> = Stream::new();
        assert!(lo_pass_mapper(&source, Some(1.5), 10.0).is_err());
        assert!(lo_pass_mapper(&source, None, -1.0).is_err());
    }

    #[test]
    fn hi_pass_passes_changes() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(1.0), Some(1.0), Some(3.0), Some(3.0)]);
        let mut mapper = hi_pass_mapper(&source, Some(0.5), 10.0).unwrap();
        // first valid pair initialises at zero, then decaying response
        assert_eq!(
            drain(&mut mapper),
            vec![None, Some(0.0), Some(1.0), Some(0.5)]
        );
    }

    #[test]
    fn delta_mapper_works() {
        let source: Stream<f64> = Stream::new();
        source.extend([Some(2.0), Some(5.0), None, Some(1.0)]);
        let mut mapper = delta_mapper(&source, None);
        assert_eq!(drain(&mut mapper), vec![None, Some(3.0), None, None]);
    }

    #[test]
    fn day_bound_detects_date_change() {
        let source: Stream<NaiveDateTime> = Stream::new();
        let t = |s: &str| Some(s.parse::<NaiveDateTime>().unwrap());
        source.extend([
            t("2024-03-01T10:00:00"),
            t("2024-03-01T18:00:00"),
            t("2024-03-02T09:00:00"),
        ]);
        let mut mapper = day_bound_mapper(&source, None);
        assert_eq!(drain(&mut mapper), vec![None, Some(false), Some(true)]);
    }
}
