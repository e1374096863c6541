use serde::Deserialize;

const FRICTION_CURVE_SAMPLES: usize = 256;
const FRICTION_CURVE_SLIP_RANGE: f32 = 1.0;

/// Piecewise-linear curve keyed by `[x, y]` pairs.
///
/// Used for spring, damper and engine torque shapes. Inputs outside the key
/// range hold the first/last value. An empty curve is the identity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Vec<[f32; 2]>")]
pub struct ResponseCurve {
    keys: Vec<[f32; 2]>,
}

impl From<Vec<[f32; 2]>> for ResponseCurve {
    fn from(keys: Vec<[f32; 2]>) -> Self {
        Self::new(keys)
    }
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self::linear()
    }
}

impl ResponseCurve {
    pub fn new(mut keys: Vec<[f32; 2]>) -> Self {
        keys.retain(|[x, y]| x.is_finite() && y.is_finite());
        keys.sort_by(|a, b| a[0].total_cmp(&b[0]));
        Self { keys }
    }

    pub fn linear() -> Self {
        Self::new(vec![[0.0, 0.0], [1.0, 1.0]])
    }

    pub fn keys(&self) -> &[[f32; 2]] {
        &self.keys
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return if x.is_finite() { x } else { 0.0 };
        };
        if !x.is_finite() || x <= first[0] {
            return first[1];
        }

        for pair in self.keys.windows(2) {
            let [x0, y0] = pair[0];
            let [x1, y1] = pair[1];
            if x <= x1 {
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * ((x - x0) / span);
            }
        }

        self.keys.last().map_or(0.0, |last| last[1])
    }
}

/// Pacejka "magic formula" coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PacejkaParams {
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
}

impl PacejkaParams {
    pub const TARMAC: Self = Self {
        b: 10.0,
        c: 1.9,
        d: 1.0,
        e: 0.97,
    };
    pub const GRAVEL: Self = Self {
        b: 8.0,
        c: 1.4,
        d: 0.72,
        e: 0.9,
    };
    pub const GRASS: Self = Self {
        b: 7.0,
        c: 1.3,
        d: 0.55,
        e: 0.8,
    };
    pub const SNOW: Self = Self {
        b: 5.0,
        c: 2.0,
        d: 0.38,
        e: 1.0,
    };
    pub const ICE: Self = Self {
        b: 4.0,
        c: 2.0,
        d: 0.12,
        e: 1.0,
    };

    pub fn sample(&self, slip: f32) -> f32 {
        let bx = self.b * slip;
        self.d * (self.c * (bx - self.e * (bx - bx.atan())).atan()).sin()
    }
}

impl Default for PacejkaParams {
    fn default() -> Self {
        Self::TARMAC
    }
}

/// Slip to normalized force mapping with a cached peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrictionCurve {
    params: PacejkaParams,
    peak_slip: f32,
    peak_value: f32,
}

impl FrictionCurve {
    pub fn new(params: PacejkaParams) -> Self {
        let mut peak_slip = FRICTION_CURVE_SLIP_RANGE;
        let mut peak_value = 0.0_f32;
        for step in 1..=FRICTION_CURVE_SAMPLES {
            let slip = step as f32 / FRICTION_CURVE_SAMPLES as f32 * FRICTION_CURVE_SLIP_RANGE;
            let value = params.sample(slip);
            if value.is_finite() && value > peak_value {
                peak_value = value;
                peak_slip = slip;
            }
        }

        Self {
            params,
            peak_slip,
            peak_value,
        }
    }

    pub fn params(&self) -> PacejkaParams {
        self.params
    }

    /// Slip at which the curve reaches its maximum on `(0, 1]`.
    pub fn peak_slip(&self) -> f32 {
        self.peak_slip
    }

    pub fn peak_value(&self) -> f32 {
        self.peak_value
    }

    /// Normalized force for `|slip|`, always within `[0, peak_value]`.
    pub fn evaluate(&self, slip: f32) -> f32 {
        if !slip.is_finite() {
            return 0.0;
        }
        let value = self.params.sample(slip.abs());
        if value.is_finite() {
            value.clamp(0.0, self.peak_value)
        } else {
            0.0
        }
    }
}

impl Default for FrictionCurve {
    fn default() -> Self {
        Self::new(PacejkaParams::TARMAC)
    }
}

impl From<PacejkaParams> for FrictionCurve {
    fn from(params: PacejkaParams) -> Self {
        Self::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_curve_interpolates_and_holds_ends() {
        let curve = ResponseCurve::new(vec![[1.0, 10.0], [0.0, 0.0], [2.0, 10.0]]);
        assert_eq!(curve.evaluate(-1.0), 0.0);
        assert!((curve.evaluate(0.25) - 2.5).abs() < 1e-5);
        assert_eq!(curve.evaluate(1.5), 10.0);
        assert_eq!(curve.evaluate(5.0), 10.0);
    }

    #[test]
    fn empty_curve_is_identity_and_nan_safe() {
        let curve = ResponseCurve::new(Vec::new());
        assert_eq!(curve.evaluate(0.7), 0.7);
        assert_eq!(curve.evaluate(f32::NAN), 0.0);
        assert_eq!(ResponseCurve::linear().evaluate(f32::NAN), 0.0);
    }

    #[test]
    fn response_curve_deserializes_from_key_list() {
        #[derive(Deserialize)]
        struct Holder {
            curve: ResponseCurve,
        }
        let holder: Holder = toml::from_str("curve = [[0.0, 0.2], [1.0, 1.0]]").expect("parse");
        assert_eq!(holder.curve.keys(), &[[0.0, 0.2], [1.0, 1.0]]);
        assert!((holder.curve.evaluate(0.5) - 0.6).abs() < 1e-5);
    }

    #[test]
    fn tarmac_peak_is_found_near_small_slip() {
        let curve = FrictionCurve::default();
        assert!(curve.peak_slip() > 0.0 && curve.peak_slip() < 0.5);
        assert!(curve.peak_value() > 0.95 && curve.peak_value() <= 1.0);
    }

    #[test]
    fn evaluate_never_exceeds_peak() {
        for params in [
            PacejkaParams::TARMAC,
            PacejkaParams::GRAVEL,
            PacejkaParams::GRASS,
            PacejkaParams::SNOW,
            PacejkaParams::ICE,
        ] {
            let curve = FrictionCurve::new(params);
            for step in -40..=40 {
                let value = curve.evaluate(step as f32 * 0.05);
                assert!(value >= 0.0 && value <= curve.peak_value());
            }
        }
    }

    #[test]
    fn evaluate_is_symmetric_in_slip_sign() {
        let curve = FrictionCurve::new(PacejkaParams::GRAVEL);
        assert_eq!(curve.evaluate(0.08), curve.evaluate(-0.08));
    }
}
