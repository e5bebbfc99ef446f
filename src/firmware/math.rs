//! Clarke/Park transforms and space-vector modulation.
//!
//! Pure functions only — no hardware state, no IRQ context. Every quantity
//! is an ordinary `f32`; the fixed-point dance the rest of the firmware does
//! for counts and angles stops at this module's boundary.

/// `1/sqrt(3)`, used by the Clarke transform.
pub const ONE_BY_SQRT3: f32 = 0.577_350_26;
/// `sqrt(3)/2`, the SVM hexagon inradius used for the modulation cap.
pub const SQRT3_BY_2: f32 = 0.866_025_4;

/// Clarke transform: three-phase currents (with `Ia = -Ib - Ic`) to the
/// stationary αβ frame. Only `Ib`/`Ic` are measured (`spec.md` §4.2); `Ia`
/// is inferred, so the transform takes `(Ib, Ic)` directly rather than all
/// three phases.
pub fn clarke(i_b: f32, i_c: f32) -> (f32, f32) {
    let alpha = -i_b - i_c;
    let beta = ONE_BY_SQRT3 * (i_b - i_c);
    (alpha, beta)
}

/// Inverse Clarke: αβ back to (Ib, Ic), given `Ia = -Ib - Ic`. Used only by
/// the round-trip test in `spec.md` §8; the control path never needs it.
pub fn inverse_clarke(alpha: f32, beta: f32) -> (f32, f32) {
    // Ia = alpha, Ib = -alpha/2 + sqrt(3)/2 * beta, Ic = -alpha/2 - sqrt(3)/2 * beta
    let i_b = -0.5 * alpha + SQRT3_BY_2 * beta;
    let i_c = -0.5 * alpha - SQRT3_BY_2 * beta;
    (i_b, i_c)
}

/// Park transform: αβ (stationary) to dq (rotor-synchronous), given the
/// electrical phase's `(cos, sin)` pair.
pub fn park(alpha: f32, beta: f32, cos_phi: f32, sin_phi: f32) -> (f32, f32) {
    let d = cos_phi * alpha + sin_phi * beta;
    let q = cos_phi * beta - sin_phi * alpha;
    (d, q)
}

/// Inverse Park transform: dq back to αβ.
pub fn inverse_park(d: f32, q: f32, cos_phi: f32, sin_phi: f32) -> (f32, f32) {
    let alpha = cos_phi * d - sin_phi * q;
    let beta = cos_phi * q + sin_phi * d;
    (alpha, beta)
}

/// Seven-segment space-vector modulation. Takes a modulation vector
/// `(mod_alpha, mod_beta)` already normalised so that unity magnitude
/// corresponds to full DC bus utilisation, and returns the three duty
/// fractions `(tA, tB, tC) ∈ [0, 1]`.
///
/// This is the same construction `low_level.c`'s `SVM()` uses: project the
/// vector onto the nearest sector of the hexagon, compute the two active
/// vector on-times, then center the result by splitting the leftover time
/// between the two zero vectors.
pub fn svm(mod_alpha: f32, mod_beta: f32) -> (f32, f32, f32) {
    // Project onto the three 120-degree-spaced phase axes, pick the sector
    // those projections fall in, then derive the two active-vector on-times
    // for that sector.
    let sqrt3 = 1.732_050_8_f32;
    let va = mod_beta;
    let vb = (sqrt3 * mod_alpha - mod_beta) * 0.5;
    let vc = (-sqrt3 * mod_alpha - mod_beta) * 0.5;

    let sector = match (va > 0.0, vb > 0.0, vc > 0.0) {
        (true, false, true) => 1,
        (true, false, false) => 2,
        (true, true, false) => 3,
        (false, true, false) => 4,
        (false, true, true) => 5,
        (false, false, true) => 6,
        _ => 1,
    };

    // Active vector times, normalised to the carrier half period (Tz <= 1).
    let (t1, t2) = match sector {
        1 => (va, vb),
        2 => (-vc, -va),
        3 => (vb, vc),
        4 => (-va, -vb),
        5 => (vc, va),
        _ => (-vb, -vc),
    };

    let t0 = (1.0 - t1 - t2).max(0.0);
    let t_off = t0 * 0.5;

    let (ta, tb, tc) = match sector {
        1 => (t1 + t2 + t_off, t2 + t_off, t_off),
        2 => (t1 + t_off, t1 + t2 + t_off, t2 + t_off),
        3 => (t_off, t1 + t_off, t1 + t2 + t_off),
        4 => (t2 + t_off, t_off, t1 + t2 + t_off),
        5 => (t1 + t2 + t_off, t_off, t1 + t_off),
        _ => (t2 + t_off, t1 + t2 + t_off, t1 + t_off),
    };

    (ta.clamp(0.0, 1.0), tb.clamp(0.0, 1.0), tc.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn clarke_inverse_clarke_round_trip() {
        let (i_b, i_c) = (3.0_f32, -1.5_f32);
        let (alpha, beta) = clarke(i_b, i_c);
        let (rb, rc) = inverse_clarke(alpha, beta);
        assert!(approx(rb, i_b, 1e-3));
        assert!(approx(rc, i_c, 1e-3));
    }

    #[test]
    fn park_inverse_park_round_trip() {
        for deg in [0.0, 30.0, 90.0, 137.0, 270.0, 359.0] {
            let phi = deg * core::f32::consts::PI / 180.0;
            let (c, s) = (libm::cosf(phi), libm::sinf(phi));
            let (alpha, beta) = (0.8_f32, -0.3_f32);
            let (d, q) = park(alpha, beta, c, s);
            let (ra, rb) = inverse_park(d, q, c, s);
            assert!(approx(ra, alpha, 1e-3), "angle {deg}: alpha {ra} != {alpha}");
            assert!(approx(rb, beta, 1e-3), "angle {deg}: beta {rb} != {beta}");
        }
    }

    #[test]
    fn svm_zero_vector_centers_duties() {
        let (ta, tb, tc) = svm(0.0, 0.0);
        assert!(approx(ta, 0.5, 1e-3));
        assert!(approx(tb, 0.5, 1e-3));
        assert!(approx(tc, 0.5, 1e-3));
    }

    #[test]
    fn svm_duties_stay_in_range() {
        let mut alpha = -1.0_f32;
        while alpha <= 1.0 {
            let mut beta = -1.0_f32;
            while beta <= 1.0 {
                let (ta, tb, tc) = svm(alpha * 0.7, beta * 0.7);
                assert!((0.0..=1.0).contains(&ta));
                assert!((0.0..=1.0).contains(&tb));
                assert!((0.0..=1.0).contains(&tc));
                beta += 0.2;
            }
            alpha += 0.2;
        }
    }
}
