//! Linearly constrained trust-region subproblem.
//!
//! Minimizes the quadratic model inside the trust ball intersected with the
//! feasible polyhedron. The working machinery is a truncated conjugate
//! gradient iteration restricted to the null space of the active constraint
//! gradients; constraints are added when the line search runs into them,
//! dropped when their multiplier estimates have the wrong sign, and once the
//! trust boundary is reached the step is bent along it while it keeps
//! reducing the model.
//!
//! The active-set factorization `{QFAC, RFAC, IACT}` persists between calls
//! and is maintained by plane rotations.

use log::debug;
use nalgebra::{convert, DMatrix, DVector, Dyn, OMatrix, OVector};

use crate::core::RealField;
use crate::linalg::{self, plane_rotation};

/// Orthogonal factorization of the active constraint gradients.
///
/// The first `nact` columns of `QFAC` times the leading triangle of `RFAC`
/// reproduce the gradients of the constraints listed in `IACT`; the
/// remaining columns of `QFAC` span the null space the conjugate gradient
/// iteration works in.
#[derive(Debug, Clone)]
pub struct ActiveSet<T: RealField> {
    qfac: OMatrix<T, Dyn, Dyn>,
    rfac: OMatrix<T, Dyn, Dyn>,
    iact: Vec<usize>,
}

impl<T: RealField> ActiveSet<T> {
    /// Creates an empty active set in dimension `n`.
    pub fn new(n: usize) -> Self {
        Self {
            qfac: DMatrix::identity(n, n),
            rfac: DMatrix::zeros(n, n),
            iact: Vec::with_capacity(n),
        }
    }

    /// Number of active constraints.
    pub fn nact(&self) -> usize {
        self.iact.len()
    }

    /// Indices of the active constraints, in activation order.
    pub fn iact(&self) -> &[usize] {
        &self.iact
    }

    /// Whether the constraint is currently active.
    pub fn contains(&self, j: usize) -> bool {
        self.iact.contains(&j)
    }

    /// Drops every active constraint.
    pub fn clear(&mut self) {
        let n = self.qfac.nrows();
        self.qfac = DMatrix::identity(n, n);
        self.rfac.fill(T::zero());
        self.iact.clear();
    }

    /// Adds the constraint `j` with (unit) gradient `a`. Returns `false`
    /// when the gradient is numerically dependent on the active ones, in
    /// which case nothing changes.
    pub fn add(&mut self, j: usize, a: &OVector<T, Dyn>) -> bool {
        let n = self.qfac.nrows();
        let nact = self.nact();
        debug_assert!(nact < n);
        debug_assert!(!self.contains(j));

        let mut w = self.qfac.tr_mul(a);

        // Rotate the below-diagonal mass of w into row nact, carrying the
        // null-space columns of QFAC along.
        for i in (nact..n.saturating_sub(1)).rev() {
            if w[i + 1] != T::zero() {
                let (c, s, r) = plane_rotation(w[i], w[i + 1]);
                for row in 0..n {
                    let t = c * self.qfac[(row, i)] + s * self.qfac[(row, i + 1)];
                    self.qfac[(row, i + 1)] =
                        -s * self.qfac[(row, i)] + c * self.qfac[(row, i + 1)];
                    self.qfac[(row, i)] = t;
                }
                w[i] = r;
                w[i + 1] = T::zero();
            }
        }

        if w[nact].abs() <= T::EPSILON_SQRT {
            return false;
        }

        for i in 0..=nact {
            self.rfac[(i, nact)] = w[i];
        }
        self.iact.push(j);

        true
    }

    /// Removes the active constraint at position `pos` (an index into
    /// [`iact`](Self::iact)).
    pub fn delete(&mut self, pos: usize) {
        let n = self.qfac.nrows();
        let nact = self.nact();
        debug_assert!(pos < nact);

        for c in pos..nact - 1 {
            for r in 0..n {
                self.rfac[(r, c)] = self.rfac[(r, c + 1)];
            }
        }
        for r in 0..n {
            self.rfac[(r, nact - 1)] = T::zero();
        }

        // Restore the triangle; the same rotations keep QFAC consistent.
        for c in pos..nact - 1 {
            let below = self.rfac[(c + 1, c)];
            if below != T::zero() {
                let (cr, sr, r) = plane_rotation(self.rfac[(c, c)], below);
                for cc in c..nact - 1 {
                    let t1 = cr * self.rfac[(c, cc)] + sr * self.rfac[(c + 1, cc)];
                    let t2 = -sr * self.rfac[(c, cc)] + cr * self.rfac[(c + 1, cc)];
                    self.rfac[(c, cc)] = t1;
                    self.rfac[(c + 1, cc)] = t2;
                }
                self.rfac[(c, c)] = r;
                self.rfac[(c + 1, c)] = T::zero();

                for row in 0..n {
                    let t = cr * self.qfac[(row, c)] + sr * self.qfac[(row, c + 1)];
                    self.qfac[(row, c + 1)] =
                        -sr * self.qfac[(row, c)] + cr * self.qfac[(row, c + 1)];
                    self.qfac[(row, c)] = t;
                }
            }
        }

        self.iact.remove(pos);
    }

    /// Projects a vector onto the null space of the active gradients.
    pub fn project(&self, v: &OVector<T, Dyn>) -> OVector<T, Dyn> {
        let mut out = v.clone_owned();
        for c in 0..self.nact() {
            let qc = self.qfac.column(c);
            let t = qc.dot(v);
            out.axpy(-t, &qc, T::one());
        }
        out
    }

    /// Least-squares multipliers of `−g` against the active gradients,
    /// computed by back-substitution through `RFAC`.
    pub fn multipliers(&self, g: &OVector<T, Dyn>) -> OVector<T, Dyn> {
        let nact = self.nact();
        let mut mu = OVector::<T, Dyn>::zeros(nact);

        for i in 0..nact {
            mu[i] = -self.qfac.column(i).dot(g);
        }

        for i in (0..nact).rev() {
            let mut acc = mu[i];
            for c in (i + 1)..nact {
                acc -= self.rfac[(i, c)] * mu[c];
            }
            mu[i] = acc / self.rfac[(i, i)];
        }

        mu
    }
}

/// Result of the constrained subproblem.
#[derive(Debug, Clone)]
pub struct ConstrainedStep<T: RealField> {
    /// The computed step from `xopt`.
    pub step: OVector<T, Dyn>,
    /// Its norm.
    pub snorm: T,
    /// How many times the active set changed.
    pub ngetact: usize,
}

/// Approximately minimizes `gᵀd + ½ dᵀH d` subject to `‖d‖ ≤ Δ` and the
/// linear constraints encoded by `a` (unit-norm gradient columns) and the
/// sign-encoded residual vector `rescon`.
///
/// Constraints with `rescon[j] < 0` are guaranteed inactive inside the trust
/// region and are ignored outright. The active set is updated in place and
/// survives to the next call.
pub fn constrained_step<T, H>(
    gopt: &OVector<T, Dyn>,
    hess: H,
    a: &OMatrix<T, Dyn, Dyn>,
    rescon: &OVector<T, Dyn>,
    delta: T,
    actset: &mut ActiveSet<T>,
) -> ConstrainedStep<T>
where
    T: RealField,
    H: Fn(&OVector<T, Dyn>) -> OVector<T, Dyn>,
{
    let n = gopt.len();
    let m = a.ncols();
    let zero = T::zero();
    let one = T::one();

    let zero_step = ConstrainedStep {
        step: DVector::zeros(n),
        snorm: zero,
        ngetact: 0,
    };

    if !linalg::all_finite(gopt) || !delta.is_finite() || delta <= zero {
        return zero_step;
    }

    let gtol = T::EPSILON_SQRT * (one + gopt.norm());
    let resfloor = T::EPSILON_SQRT * delta;

    // Remaining slack per constraint along the step being built. `None`
    // marks constraints that cannot become active inside the trust region.
    let mut res: Vec<Option<T>> = (0..m)
        .map(|j| {
            if rescon[j] < zero {
                None
            } else {
                Some(rescon[j])
            }
        })
        .collect();

    // Stale active constraints (positive residual at xopt) are released
    // before the iteration starts.
    let mut pos = 0;
    while pos < actset.nact() {
        let j = actset.iact()[pos];
        if res[j].map_or(true, |r| r > resfloor) {
            actset.delete(pos);
        } else {
            res[j] = Some(zero);
            pos += 1;
        }
    }

    let mut step = OVector::<T, Dyn>::zeros(n);
    let mut g = gopt.clone_owned();
    let mut ngetact = 0;
    let mut on_boundary = false;

    'outer: for _ in 0..(3 * m + 3) {
        ngetact += 1;

        // Release active constraints whose multiplier estimate has the
        // wrong sign; most negative first.
        while let Some((pos, mumin)) = most_negative_multiplier(actset, &g) {
            if !(mumin < -T::EPSILON_SQRT) {
                break;
            }

            let j = actset.iact()[pos];
            debug!("dropping constraint {} (multiplier {})", j, mumin);
            actset.delete(pos);
            if let Some(r) = res[j].as_mut() {
                *r = (*r).max(resfloor);
            }
        }

        // Constraints that are tight at the current point and would be
        // violated by the projected descent direction go into the active
        // set before the line search, which could otherwise not move at
        // all.
        while actset.nact() < n {
            let gproj0 = actset.project(&g);
            let mut tight = None;
            for j in 0..m {
                if actset.contains(j) {
                    continue;
                }
                if let Some(r) = res[j] {
                    let ascent = -a.column(j).dot(&gproj0);
                    if r < resfloor && ascent > T::EPSILON_SQRT * gproj0.norm() {
                        tight = Some(j);
                        break;
                    }
                }
            }

            match tight {
                Some(j) => {
                    debug!("activating tight constraint {}", j);
                    if actset.add(j, &a.column(j).into_owned()) {
                        res[j] = Some(zero);
                    } else {
                        res[j] = None;
                    }
                }
                None => break,
            }
        }

        let mut gproj = actset.project(&g);
        if gproj.norm() <= gtol {
            break;
        }

        // Truncated conjugate gradients in the current null space.
        let mut d = -gproj.clone();
        let cg_cap = n - actset.nact();

        for _ in 0..cg_cap {
            let hd = hess(&d);
            let dgd = d.dot(&hd);
            let gd = g.dot(&d);
            let dsq = d.norm_squared();

            if gd >= zero || dsq == zero {
                break;
            }

            // The three step-length limits: trust boundary, model
            // minimizer, first inactive constraint to turn active.
            #[derive(Debug, Clone, Copy, PartialEq)]
            enum Limit {
                Trust,
                Quad,
                Constraint(usize),
            }

            let ssq = step.norm_squared();
            let sd = step.dot(&d);
            let discr = (sd * sd + dsq * (delta * delta - ssq)).max(zero).sqrt();

            let mut alpha = (discr - sd) / dsq;
            let mut limit = Limit::Trust;

            if dgd > zero {
                let alpha_q = -gd / dgd;
                if alpha_q <= alpha {
                    alpha = alpha_q;
                    limit = Limit::Quad;
                }
            }

            for j in 0..m {
                if actset.contains(j) {
                    continue;
                }
                if let Some(r) = res[j] {
                    let ad = a.column(j).dot(&d);
                    if ad > T::EPSILON * (one + ad.abs()) {
                        let ratio = r / ad;
                        if ratio < alpha {
                            alpha = ratio;
                            limit = Limit::Constraint(j);
                        }
                    }
                }
            }

            if !(alpha > zero) || !alpha.is_finite() {
                break;
            }

            step.axpy(alpha, &d, one);
            g.axpy(alpha, &hd, one);
            for j in 0..m {
                if let Some(r) = res[j].as_mut() {
                    let ad = a.column(j).dot(&d);
                    *r = (*r - alpha * ad).max(zero);
                }
            }

            match limit {
                Limit::Trust => {
                    on_boundary = true;
                    break 'outer;
                }
                Limit::Constraint(j) => {
                    debug!("activating constraint {}", j);
                    if actset.add(j, &a.column(j).into_owned()) {
                        res[j] = Some(zero);
                    } else {
                        // Dependent gradient; keep it out of the line
                        // search.
                        res[j] = None;
                    }
                    continue 'outer;
                }
                Limit::Quad => {}
            }

            // Interior CG step.
            let gproj_new = actset.project(&g);
            let gnew_sq = gproj_new.norm_squared();
            if gnew_sq.sqrt() <= gtol {
                break 'outer;
            }

            let beta = gnew_sq / gproj.norm_squared();
            d = -&gproj_new + &d * beta;
            gproj = gproj_new;
        }

        break;
    }

    // Bend the step along the trust boundary while the model keeps
    // improving.
    if on_boundary {
        bend_on_boundary(&mut step, &mut g, &hess, a, &mut res, delta, actset, &mut ngetact);
    }

    if !linalg::all_finite(&step) {
        return zero_step;
    }

    let snorm = step.norm();
    ConstrainedStep { step, snorm, ngetact }
}

/// Position and value of the most negative multiplier estimate, if any
/// constraint is active.
fn most_negative_multiplier<T: RealField>(
    actset: &ActiveSet<T>,
    g: &OVector<T, Dyn>,
) -> Option<(usize, T)> {
    if actset.nact() == 0 {
        return None;
    }

    let mu = actset.multipliers(g);
    mu.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(pos, &m)| (pos, m))
}

/// Arc search on the sphere `‖step‖ = Δ`: drop wrong-sign constraints, then
/// rotate the step towards the projected negative gradient in their common
/// tangent plane, keeping every tracked residual nonnegative.
#[allow(clippy::too_many_arguments)]
fn bend_on_boundary<T, H>(
    step: &mut OVector<T, Dyn>,
    g: &mut OVector<T, Dyn>,
    hess: &H,
    a: &OMatrix<T, Dyn, Dyn>,
    res: &mut [Option<T>],
    delta: T,
    actset: &mut ActiveSet<T>,
    ngetact: &mut usize,
) where
    T: RealField,
    H: Fn(&OVector<T, Dyn>) -> OVector<T, Dyn>,
{
    let m = a.ncols();
    let zero = T::zero();
    let one = T::one();
    let half: T = convert(0.5);

    let delsq = delta * delta;
    let nsamples = 20usize;
    let theta_max: T = convert(std::f64::consts::FRAC_PI_4);
    let feastol = T::EPSILON_SQRT * delta;

    for _ in 0..10 {
        // Wrong-sign multipliers are released before bending further.
        while let Some((pos, mumin)) = most_negative_multiplier(actset, g) {
            if !(mumin < -T::EPSILON_SQRT) {
                break;
            }
            let j = actset.iact()[pos];
            actset.delete(pos);
            *ngetact += 1;
            if let Some(r) = res[j].as_mut() {
                *r = (*r).max(T::EPSILON_SQRT * delta);
            }
        }

        // Tangential descent direction on the sphere.
        let mut u = actset.project(g);
        u.axpy(-u.dot(step) / delsq, step, one);
        let unorm = u.norm();
        if unorm <= T::EPSILON_SQRT * (one + g.norm()) {
            break;
        }

        let w = -&u * (delta / unorm);
        let hs = hess(step);
        let hw = hess(&w);

        // The model along the arc is trigonometric; sample it and keep the
        // best feasible angle.
        let mut best: Option<(T, T)> = None;
        for i in 1..=nsamples {
            let theta = theta_max * convert::<f64, T>(i as f64 / nsamples as f64);
            let (ct, st) = (theta.cos(), theta.sin());

            let mut feasible = true;
            for j in 0..m {
                if let Some(r) = res[j] {
                    let aj = a.column(j);
                    let change = (ct - one) * aj.dot(step) + st * aj.dot(&w);
                    if change > r + feastol {
                        feasible = false;
                        break;
                    }
                }
            }
            if !feasible {
                break;
            }

            // dx = (cosθ − 1)·step + sinθ·w, and H·dx follows linearly.
            let gdx = (ct - one) * g.dot(step) + st * g.dot(&w);
            let quad = {
                let c1 = ct - one;
                let dxhdx = c1 * c1 * step.dot(&hs)
                    + (one + one) * c1 * st * step.dot(&hw)
                    + st * st * w.dot(&hw);
                gdx + half * dxhdx
            };

            match best {
                Some((_, q)) if q <= quad => {}
                _ => best = Some((theta, quad)),
            }
        }

        let (theta, q) = match best {
            Some(pick) if pick.1 < -T::EPSILON * (one + g.norm() * delta) => pick,
            _ => break,
        };

        let (ct, st) = (theta.cos(), theta.sin());
        let mut dx = step.clone_owned() * (ct - one);
        dx.axpy(st, &w, one);

        debug!("bending along the boundary: angle {}, gain {}", theta, -q);

        *step += &dx;
        // Keep the iterate exactly on the sphere.
        let snorm = step.norm();
        if snorm > zero {
            *step *= delta / snorm;
        }

        let hdx = &hs * (ct - one) + &hw * st;
        *g += hdx;

        let mut hit = None;
        for j in 0..m {
            if let Some(r) = res[j].as_mut() {
                let change = a.column(j).dot(&dx);
                *r = (*r - change).max(zero);
                if *r <= feastol && !actset.contains(j) && hit.is_none() {
                    hit = Some(j);
                }
            }
        }

        if let Some(j) = hit {
            if actset.nact() < step.len() && actset.add(j, &a.column(j).into_owned()) {
                res[j] = Some(zero);
                *ngetact += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector, DMatrix, DVector};

    use super::*;

    fn ident_hess(_n: usize) -> impl Fn(&DVector<f64>) -> DVector<f64> {
        |v: &DVector<f64>| v.clone_owned()
    }

    #[test]
    fn active_set_add_and_delete_keep_factorization() {
        let mut actset: ActiveSet<f64> = ActiveSet::new(3);

        let a0 = dvector![1.0, 0.0, 0.0];
        let a1 = dvector![1.0 / 2.0_f64.sqrt(), 1.0 / 2.0_f64.sqrt(), 0.0];

        assert!(actset.add(0, &a0));
        assert!(actset.add(1, &a1));
        assert_eq!(actset.nact(), 2);

        // QFAC[:, :nact]·RFAC must reproduce the gradients.
        for (pos, aj) in [a0.clone(), a1.clone()].iter().enumerate() {
            let mut rec = DVector::zeros(3);
            for i in 0..actset.nact() {
                rec += actset.qfac.column(i) * actset.rfac[(i, pos)];
            }
            assert!((rec - aj).norm() <= 1e-12);
        }

        // A dependent gradient is refused.
        assert!(!actset.add(2, &a0.clone()));

        actset.delete(0);
        assert_eq!(actset.iact(), &[1]);

        let mut rec = DVector::zeros(3);
        for i in 0..actset.nact() {
            rec += actset.qfac.column(i) * actset.rfac[(i, 0)];
        }
        assert!((rec - a1).norm() <= 1e-12);

        // Projection annihilates the active gradient and nothing else.
        let p = actset.project(&a1);
        assert!(p.norm() <= 1e-12);
        let v = dvector![0.0, 0.0, 2.0];
        assert!((actset.project(&v) - v).norm() <= 1e-12);
    }

    #[test]
    fn unconstrained_problem_reduces_to_newton() {
        let g = dvector![1.0, -2.0];
        let a = DMatrix::zeros(2, 0);
        let rescon = DVector::zeros(0);
        let mut actset = ActiveSet::new(2);

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 10.0, &mut actset);

        // Minimizer of gᵀd + ½‖d‖² is −g.
        assert!((result.step[0] + 1.0).abs() <= 1e-8);
        assert!((result.step[1] - 2.0).abs() <= 1e-8);
        assert!(result.snorm <= 10.0);
    }

    #[test]
    fn trust_boundary_is_respected() {
        let g = dvector![3.0, 4.0];
        let a = DMatrix::zeros(2, 0);
        let rescon = DVector::zeros(0);
        let mut actset = ActiveSet::new(2);
        let delta = 1.0;

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, delta, &mut actset);

        assert!(result.snorm <= delta + 1e-9);
        // Quadratic still dominated by the linear term at this radius; the
        // step is close to the projected steepest descent.
        let q = g.dot(&result.step) + 0.5 * result.step.norm_squared();
        let cauchy = -&g * (delta / g.norm());
        let qc = g.dot(&cauchy) + 0.5 * cauchy.norm_squared();
        assert!(q <= qc + 1e-6);
    }

    #[test]
    fn constraint_becomes_active_and_step_slides() {
        // Minimize x + y with H = I inside ‖d‖ ≤ 2 subject to −d₀ ≤ 0.4
        // (i.e. the step cannot decrease x₀ by more than 0.4).
        let g = dvector![1.0, 1.0];
        let a = DMatrix::from_column_slice(2, 1, &[-1.0, 0.0]);
        let rescon = dvector![0.4];
        let mut actset = ActiveSet::new(2);

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 2.0, &mut actset);

        // Unconstrained minimizer is (−1, −1); the constraint stops the
        // first coordinate at −0.4 and the second goes to its minimizer.
        assert!((result.step[0] + 0.4).abs() <= 1e-6, "{:?}", result.step);
        assert!((result.step[1] + 1.0).abs() <= 1e-6, "{:?}", result.step);
        assert!(actset.contains(0));
        assert!(result.ngetact >= 2);
    }

    #[test]
    fn entry_active_constraint_is_not_violated() {
        // Constraint a = (0, 1) active at entry; the gradient pushes into
        // it, so the step must stay in the half-space d₁ ≤ 0.
        let g = dvector![0.5, -1.0];
        let a = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
        let rescon = dvector![0.0];
        let mut actset = ActiveSet::new(2);
        assert!(actset.add(0, &dvector![0.0, 1.0]));

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 1.0, &mut actset);

        let ad = a.column(0).dot(&result.step);
        assert!(ad <= 1e-8, "active constraint violated: {}", ad);
        // And the free coordinate still decreases the model.
        assert!(result.step[0] < 0.0);
    }

    #[test]
    fn wrong_sign_multiplier_gets_dropped() {
        // Constraint a = (0, 1) active at entry, but the gradient pulls
        // away from the boundary; keeping it active would block descent in
        // the second coordinate.
        let g = dvector![0.0, 1.0];
        let a = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
        let rescon = dvector![0.0];
        let mut actset = ActiveSet::new(2);
        assert!(actset.add(0, &dvector![0.0, 1.0]));

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 5.0, &mut actset);

        assert!(!actset.contains(0));
        assert!((result.step[1] + 1.0).abs() <= 1e-6, "{:?}", result.step);
    }

    #[test]
    fn guaranteed_inactive_constraints_are_ignored() {
        let g = dvector![1.0, 0.0];
        // Sign-encoded: rescon < 0 means the constraint cannot be reached
        // inside the trust region.
        let a = DMatrix::from_column_slice(2, 1, &[-1.0, 0.0]);
        let rescon = dvector![-5.0];
        let mut actset = ActiveSet::new(2);

        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 2.0, &mut actset);

        assert!((result.step[0] + 1.0).abs() <= 1e-6);
        assert_eq!(actset.nact(), 0);
    }

    #[test]
    fn zero_projected_gradient_returns_zero_step() {
        let g = dvector![0.0, 1.0];
        let a = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
        let rescon = dvector![0.0];
        let mut actset = ActiveSet::new(2);
        assert!(actset.add(0, &dvector![0.0, 1.0]));

        // g = a: the multiplier is +1 and the projected gradient vanishes.
        let g = -g;
        let result = constrained_step(&g, ident_hess(2), &a, &rescon, 1.0, &mut actset);

        assert_eq!(result.snorm, 0.0);
    }

    #[test]
    fn bend_continues_descent_on_the_boundary() {
        // Strongly linear model: CG hits the trust boundary immediately in
        // the gradient direction; the bend should then rotate towards the
        // better boundary point for the curved model.
        let h = dmatrix![1.0, 0.0; 0.0, 0.2];
        let hess = move |v: &DVector<f64>| &h * v;
        let g = dvector![1.0, -0.6];
        let a = DMatrix::zeros(2, 0);
        let rescon = DVector::zeros(0);
        let mut actset = ActiveSet::new(2);
        let delta = 1.0;

        let result = constrained_step(&g, hess, &a, &rescon, delta, &mut actset);

        assert!(result.snorm <= delta + 1e-9);

        let q = |d: &DVector<f64>| g.dot(d) + 0.5 * (dmatrix![1.0, 0.0; 0.0, 0.2] * d).dot(d);
        let steepest = -&g * (delta / g.norm());
        assert!(q(&result.step) <= q(&steepest) + 1e-9);
    }
}
