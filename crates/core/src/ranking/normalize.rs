/// Score given to missing metrics and to populations with no spread.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Min-max scales `values` onto 0..=100 relative to the non-missing values in the slice.
///
/// Missing and non-finite values score [`NEUTRAL_SCORE`]. When every present value is equal
/// they all score [`NEUTRAL_SCORE`]. With `invert`, present values are flipped (`100 - score`)
/// so that the smallest raw value scores highest.
pub fn normalize(values: &[Option<f64>], invert: bool) -> Vec<f64> {
    let present = values.iter().flatten().copied().filter(|v| v.is_finite());
    let bounds = present.fold(None, |acc: Option<(f64, f64)>, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    });

    values
        .iter()
        .map(|v| match (v.filter(|v| v.is_finite()), bounds) {
            (Some(v), Some((lo, hi))) if hi > lo => {
                let scaled = ((v - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0);
                if invert {
                    100.0 - scaled
                } else {
                    scaled
                }
            }
            _ => NEUTRAL_SCORE,
        })
        .collect()
}
