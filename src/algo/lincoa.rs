//! Derivative-free minimization under linear inequality constraints.
//!
//! The method maintains a quadratic interpolation model of the objective
//! over a moving sample set and alternates between two kinds of steps:
//! trust-region steps that reduce the model inside the feasible region, and
//! geometry steps that keep the sample set well conditioned. The trust
//! radius is bounded below by a second radius ρ that is only ever decreased,
//! which gives the characteristic coarse-to-fine convergence of this family
//! of methods.
//!
//! # References
//!
//! \[1\] [On fast trust region methods for quadratic models with linear
//! constraints](https://link.springer.com/article/10.1007/s12532-015-0084-4)
//!
//! \[2\] [Direct search algorithms for optimization
//! calculations](https://doi.org/10.1017/S0962492900002841)

use getset::{CopyGetters, Setters};
use log::debug;
use nalgebra::{convert, storage::StorageMut, DMatrix, DVector, Dyn, IsContiguous, OMatrix, OVector, Vector};
use nalgebra::{ComplexField as _, RealField as _};
use num_traits::{One as _, Zero as _};
use thiserror::Error;

use crate::core::{Domain, Function, Optimizer, Problem, RealField, VectorDomainExt};
use crate::linalg;
use crate::model::{InterpModel, ModelError};
use crate::subproblem::{constrained_step, geometry_step, trust_region_step, ActiveSet};

/// Reason the optimization stopped, with the stable integer codes of this
/// family of solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitStatus {
    /// The trust radius reached its lower limit (also covers plain
    /// trust-radius exhaustion).
    Normal = 0,
    /// The target objective value was reached at a feasible point.
    FTargetAchieved = 1,
    /// The evaluation budget is exhausted.
    MaxFunReached = 3,
    /// Rounding errors are damaging the interpolation beyond repair.
    DamagingRounding = 7,
    /// A trial point contained a non-finite coordinate.
    NanInputX = -1,
    /// The objective returned a non-finite value.
    NanObjective = -2,
    /// The model or its factorization became non-finite.
    NanModel = -3,
}

impl ExitStatus {
    /// The stable integer code of this status.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error returned from the [`Lincoa`] optimizer.
#[derive(Debug, Error)]
pub enum LincoaError {
    /// The options or the problem description are inconsistent.
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),
    /// The run has already terminated; the final status is attached.
    #[error("optimization already finished ({0:?})")]
    Finished(ExitStatus),
}

/// Options for the [`Lincoa`] optimizer.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct LincoaOptions<P: Problem> {
    /// Initial trust radius ρ_beg. Default: `1`.
    rho_beg: P::Field,
    /// Final trust radius ρ_end; the solver stops when ρ cannot be reduced
    /// further. Default: `1e-6`.
    rho_end: P::Field,
    /// Number of interpolation points, between `n + 2` and
    /// `(n + 1)(n + 2)/2`. Zero selects the usual `2n + 1`. Default: `0`.
    npt: usize,
    /// Ratio threshold below which a step is considered poor. Default:
    /// `0.1`.
    eta1: P::Field,
    /// Ratio threshold above which a step is considered very good. Default:
    /// `0.7`.
    eta2: P::Field,
    /// Trust-radius shrink factor. Default: `0.5`.
    gamma1: P::Field,
    /// Trust-radius growth factor. Default: `2`.
    gamma2: P::Field,
    /// Early exit once a feasible point with a value this low is seen.
    /// Default: `-inf`.
    ftarget: P::Field,
    /// Evaluation budget. Zero selects `max(500·n, npt + 1)`. Default: `0`.
    maxfun: usize,
    /// How many evaluation records to keep in the history. Default: `0`.
    maxhist: usize,
}

impl<P: Problem> Default for LincoaOptions<P> {
    fn default() -> Self {
        Self {
            rho_beg: convert(1.0),
            rho_end: convert(1e-6),
            npt: 0,
            eta1: convert(0.1),
            eta2: convert(0.7),
            gamma1: convert(0.5),
            gamma2: convert(2.0),
            ftarget: convert(f64::NEG_INFINITY),
            maxfun: 0,
            maxhist: 0,
        }
    }
}

/// Where the state machine resumes on the next cycle.
#[derive(Debug, Clone, Copy)]
enum Stage {
    /// Take a trust-region step.
    TrustStep,
    /// A geometry step for this sample is due.
    Geometry(usize),
    /// Decide whether the sample set needs a geometry step, another trust
    /// step, or a ρ reduction.
    MaybeGeometry,
    /// Reduce ρ or terminate.
    ReduceRho,
}

/// What kind of step is being evaluated.
#[derive(Debug, Clone, Copy)]
enum StepKind<T> {
    Trust { snorm: T },
    Geometry { knew: usize, ifeas: bool },
}

struct State<T: RealField> {
    model: InterpModel<T>,
    actset: ActiveSet<T>,
    /// Normalized constraint gradients (unit columns).
    anorm: OMatrix<T, Dyn, Dyn>,
    /// Normalized right-hand sides relative to the base point.
    bres: OVector<T, Dyn>,
    /// Sign-encoded constraint residuals at `xopt`.
    rescon: OVector<T, Dyn>,
    delta: T,
    rho: T,
    nf: usize,
    maxfun: usize,
    /// Best feasible point in absolute coordinates and its value.
    xsav: OVector<T, Dyn>,
    fopt: T,
    /// Value of `fopt` when the current ρ was installed.
    fsave: T,
    /// Trust radius at the start of the current cycle.
    delsav: T,
    stage: Stage,
    nvala: usize,
    nvalb: usize,
    itest: usize,
    imprv: bool,
    fhist: Vec<T>,
    chist: Vec<T>,
}

impl<T: RealField> State<T> {
    /// Recomputes the sign-encoded constraint residuals at the current best
    /// point.
    fn update_rescon(&mut self) {
        let xopt = self.model.xopt();

        for j in 0..self.anorm.ncols() {
            let resid = self.bres[j] - self.anorm.column(j).dot(&xopt);
            self.rescon[j] = rescon_entry(resid, self.delta);
        }
    }
}

/// Sign-encoding of one constraint residual: residuals within the trust
/// radius are stored as they are, larger ones negated so that their
/// magnitude certifies the constraint inactive inside the region.
fn rescon_entry<T: RealField>(resid: T, delta: T) -> T {
    if resid <= delta {
        resid.max(T::zero())
    } else {
        -resid
    }
}

/// LINCOA optimizer.
///
/// See [module](self) documentation for more details.
pub struct Lincoa<P: Problem> {
    options: LincoaOptions<P>,
    state: Option<State<P::Field>>,
    status: Option<ExitStatus>,
}

/// Final report of a [`Lincoa::minimize`] run.
#[derive(Debug, Clone)]
pub struct Minimum<T: RealField> {
    /// Best feasible point found.
    pub x: OVector<T, Dyn>,
    /// Its objective value.
    pub f: T,
    /// Its constraint violation, in the units the constraints were given
    /// in.
    pub cstrv: T,
    /// Number of objective evaluations spent.
    pub nf: usize,
    /// Why the run stopped.
    pub status: ExitStatus,
}

impl<P: Problem> Lincoa<P> {
    /// Initializes the optimizer with default options.
    pub fn new(p: &P, dom: &Domain<P::Field>) -> Self {
        Self::with_options(p, dom, LincoaOptions::default())
    }

    /// Initializes the optimizer with given options.
    pub fn with_options(_: &P, _: &Domain<P::Field>, options: LincoaOptions<P>) -> Self {
        Self {
            options,
            state: None,
            status: None,
        }
    }

    /// Resets the internal state so the next call starts a fresh run.
    pub fn reset(&mut self) {
        self.state = None;
        self.status = None;
    }

    /// The termination status, once the run has finished.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Number of objective evaluations spent so far.
    pub fn num_evaluations(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.nf)
    }

    /// Objective values of the recorded evaluations, in evaluation order.
    pub fn f_history(&self) -> &[P::Field] {
        self.state.as_ref().map_or(&[], |s| s.fhist.as_slice())
    }

    /// Constraint violations of the recorded evaluations, in evaluation
    /// order and in the caller's units.
    pub fn cstrv_history(&self) -> &[P::Field] {
        self.state.as_ref().map_or(&[], |s| s.chist.as_slice())
    }
}

impl<F: Function> Lincoa<F> {
    /// Runs the optimization from `x0` to termination.
    pub fn minimize(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x0: OVector<F::Field, Dyn>,
    ) -> Result<Minimum<F::Field>, LincoaError> {
        self.reset();
        self.initialize(f, dom, x0)?;

        while self.status.is_none() {
            self.advance(f, dom);
        }

        let state = self.state.as_ref().expect("state exists after init");
        Ok(Minimum {
            x: state.xsav.clone_owned(),
            f: state.fopt,
            cstrv: dom.violation(&state.xsav),
            nf: state.nf,
            status: self.status.expect("status is set"),
        })
    }

    /// Validates the configuration, evaluates the initial sample set and
    /// builds the model.
    fn initialize(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        mut x0: OVector<F::Field, Dyn>,
    ) -> Result<(), LincoaError> {
        let zero = F::Field::zero();
        let one = F::Field::one();

        let n = dom.dim();
        if x0.len() != n {
            return Err(LincoaError::InvalidArguments(
                "initial point dimension mismatch",
            ));
        }

        let rho = self.options.rho_beg;
        if !(rho.is_finite() && rho > self.options.rho_end && self.options.rho_end > zero) {
            return Err(LincoaError::InvalidArguments(
                "require rho_beg > rho_end > 0",
            ));
        }
        if !(self.options.eta1 >= zero
            && self.options.eta1 <= self.options.eta2
            && self.options.eta2 < one)
        {
            return Err(LincoaError::InvalidArguments(
                "require 0 <= eta1 <= eta2 < 1",
            ));
        }
        if !(self.options.gamma1 > zero && self.options.gamma1 < one && self.options.gamma2 > one)
        {
            return Err(LincoaError::InvalidArguments(
                "require 0 < gamma1 < 1 < gamma2",
            ));
        }

        let npt_max = (n + 1) * (n + 2) / 2;
        let npt = if self.options.npt == 0 {
            (2 * n + 1).min(npt_max)
        } else {
            self.options.npt
        };
        if npt < n + 2 || npt > npt_max {
            return Err(LincoaError::InvalidArguments("npt out of range"));
        }

        let maxfun = if self.options.maxfun == 0 {
            (500 * n).max(npt + 1)
        } else {
            self.options.maxfun
        };
        if maxfun <= npt {
            debug!("evaluation budget {} ends within initialization", maxfun);
        }

        // Normalize the constraints to unit gradients; zero gradients are
        // either trivial or contradictory.
        let mut cols = Vec::new();
        let mut rhs = Vec::new();
        for j in 0..dom.num_constraints() {
            let aj = dom.a().column(j);
            let norm = aj.norm();
            if norm > zero {
                cols.push(aj / norm);
                rhs.push(dom.b()[j] / norm);
            } else if dom.b()[j] < zero {
                return Err(LincoaError::InvalidArguments(
                    "constraint with zero gradient and negative bound",
                ));
            }
        }
        let anorm = if cols.is_empty() {
            DMatrix::zeros(n, 0)
        } else {
            OMatrix::from_columns(&cols)
        };
        let bnorm = OVector::<F::Field, Dyn>::from_vec(rhs);
        let m = anorm.ncols();

        // Moderate an infeasible start.
        x0.project(dom);
        if !linalg::all_finite(&x0) {
            return Err(LincoaError::InvalidArguments("initial point is not finite"));
        }

        let bres = &bnorm - anorm.tr_mul(&x0);
        let xpt = InterpModel::initial_points(n, npt, rho, &anorm, &bres);

        // Evaluate the initial samples.
        let feastol = F::Field::EPSILON_SQRT * (one + bnorm.norm());
        let mut fval = OVector::<F::Field, Dyn>::zeros(npt);
        let mut fhist = Vec::new();
        let mut chist = Vec::new();
        let mut nf = 0;

        let mut kbest = 0;
        let mut kopt: Option<usize> = None;
        let mut early: Option<ExitStatus> = None;

        for k in 0..npt {
            if nf >= maxfun {
                early = Some(ExitStatus::MaxFunReached);
                break;
            }

            let x = &x0 + xpt.column(k);
            if !linalg::all_finite(&x) {
                early = Some(ExitStatus::NanInputX);
                break;
            }

            let fraw = f.apply(&x);
            nf += 1;

            let cstrv = dom.violation(&x);
            record(&mut fhist, &mut chist, self.options.maxhist, fraw, cstrv);

            let fk = moderate(fraw);
            fval[k] = fk;

            if !fraw.is_finite() {
                early = Some(ExitStatus::NanObjective);
                break;
            }

            let mut viol = zero;
            for j in 0..m {
                viol = viol.max(anorm.column(j).dot(&x) - bnorm[j]);
            }
            let feasible = viol <= feastol;

            if fk < fval[kbest] {
                kbest = k;
            }
            if feasible && kopt.map_or(true, |ko| fk < fval[ko]) {
                kopt = Some(k);
            }

            if feasible && fk <= self.options.ftarget {
                early = Some(ExitStatus::FTargetAchieved);
                break;
            }
        }

        // Best feasible sample, falling back to the best overall.
        let kopt = kopt.unwrap_or(kbest);
        let fopt = fval[kopt];
        let xsav = &x0 + xpt.column(kopt);

        let model = InterpModel::build(x0, xpt, fval, kopt, rho)
            .map_err(|_| LincoaError::InvalidArguments("degenerate initial samples"))?;

        let mut state = State {
            model,
            actset: ActiveSet::new(n),
            anorm,
            bres,
            rescon: DVector::zeros(m),
            delta: rho,
            rho,
            nf,
            maxfun,
            xsav,
            fopt,
            fsave: fopt,
            delsav: rho,
            stage: Stage::TrustStep,
            nvala: 0,
            nvalb: 0,
            itest: 0,
            imprv: false,
            fhist,
            chist,
        };
        state.update_rescon();

        self.state = Some(state);
        self.status = early;

        Ok(())
    }

    /// Advances the state machine until one objective evaluation has been
    /// consumed or the run terminates.
    fn advance(&mut self, f: &F, dom: &Domain<F::Field>) {
        let status = match self.state.as_mut() {
            Some(state) => Self::run_cycle(&self.options, state, f, dom),
            None => Some(ExitStatus::DamagingRounding),
        };

        if status.is_some() {
            self.status = status;
        }
    }

    /// One cycle of the dispatcher; `Some` is a terminal status.
    fn run_cycle(
        options: &LincoaOptions<F>,
        state: &mut State<F::Field>,
        f: &F,
        dom: &Domain<F::Field>,
    ) -> Option<ExitStatus> {
        let zero = F::Field::zero();
        let half: F::Field = convert(0.5);
        let tenth: F::Field = convert(0.1);

        // The non-evaluating transitions are cheap and bounded by the
        // stalling counters; the cap is a backstop against cycles that
        // should be impossible.
        for _ in 0..1000 {
            match state.stage {
                Stage::TrustStep => {
                    // Keep the base near the best point to control
                    // cancellation.
                    let xoptsq = state.model.xopt().norm_squared();
                    if xoptsq >= convert::<f64, F::Field>(1e4) * state.delta * state.delta {
                        let xshift = state.model.xopt();
                        state.model.shift_base();
                        state.bres -= state.anorm.tr_mul(&xshift);
                    }

                    if state.model.validate().is_err() {
                        return Some(ExitStatus::NanModel);
                    }

                    state.update_rescon();
                    state.delsav = state.delta;

                    let (step, snorm, ngetact) = if state.anorm.ncols() == 0 {
                        // Without constraints the ball subproblem has an
                        // essentially exact solver.
                        let h = state.model.hess_dense();
                        let tol: F::Field = convert(1e-2);
                        let (d, _) =
                            trust_region_step(state.model.gopt(), &h, state.delta, tol);
                        let snorm = d.norm();
                        (d, snorm, 0)
                    } else {
                        let model = &state.model;
                        let result = constrained_step(
                            model.gopt(),
                            |v| model.hess_mul(v),
                            &state.anorm,
                            &state.rescon,
                            state.delta,
                            &mut state.actset,
                        );
                        (result.step, result.snorm, result.ngetact)
                    };

                    let thresh = if ngetact > 1 {
                        convert::<f64, F::Field>(0.1999) * state.delta
                    } else {
                        half * state.delta
                    };

                    if snorm <= thresh {
                        // The step is too short to be worth an evaluation.
                        state.delta = half * state.delta;
                        if state.delta <= convert::<f64, F::Field>(1.4) * state.rho {
                            state.delta = state.rho;
                        }
                        state.nvala += 1;
                        state.nvalb += 1;
                        let ratio = snorm / state.rho;
                        if ratio >= half {
                            state.nvala = 0;
                        }
                        if ratio >= tenth {
                            state.nvalb = 0;
                        }
                        debug!(
                            "short trust step ({} <= {}), delta -> {}",
                            snorm, thresh, state.delta
                        );
                        state.stage = if state.nvala < 5 && state.nvalb < 10 {
                            Stage::MaybeGeometry
                        } else {
                            Stage::ReduceRho
                        };
                        continue;
                    }

                    state.nvala = 0;
                    state.nvalb = 0;

                    let qred = -state.model.eval_quad(&step);
                    if !(qred > zero) {
                        // The model predicts no decrease; first time try to
                        // repair the geometry, second time in a row give up
                        // on this ρ.
                        debug!("trust step with nonpositive predicted reduction {}", qred);
                        state.stage = if state.imprv {
                            state.imprv = false;
                            Stage::ReduceRho
                        } else {
                            state.imprv = true;
                            Stage::MaybeGeometry
                        };
                        continue;
                    }
                    state.imprv = false;

                    return Self::evaluate_and_update(
                        options,
                        state,
                        f,
                        dom,
                        step,
                        qred,
                        StepKind::Trust { snorm },
                    );
                }

                Stage::Geometry(knew) => {
                    if state.model.validate().is_err() {
                        return Some(ExitStatus::NanModel);
                    }

                    state.update_rescon();

                    let radius = (tenth * state.delta).max(state.rho);
                    let geo = match geometry_step(
                        &state.model,
                        knew,
                        radius,
                        &state.anorm,
                        &state.rescon,
                        &state.actset,
                    ) {
                        Ok(geo) => geo,
                        Err(_) => return Some(ExitStatus::NanModel),
                    };

                    if geo.step.norm() <= tenth * state.rho {
                        // The constraint trimming collapsed the step;
                        // evaluating it would trip the displacement guard.
                        debug!("degenerate geometry step for sample {}", knew);
                        state.stage = Stage::ReduceRho;
                        continue;
                    }

                    let qred = -state.model.eval_quad(&geo.step);
                    return Self::evaluate_and_update(
                        options,
                        state,
                        f,
                        dom,
                        geo.step,
                        qred,
                        StepKind::Geometry {
                            knew,
                            ifeas: geo.ifeas,
                        },
                    );
                }

                Stage::MaybeGeometry => {
                    // Replace the sample that has drifted farthest from the
                    // current best point, if any is far enough.
                    let distsq_cap = (state.delta * state.delta)
                        .max(convert::<f64, F::Field>(4.0) * state.rho * state.rho);

                    let xopt = state.model.xopt();
                    let mut kfar = None;
                    let mut distmax = distsq_cap;
                    for k in 0..state.model.npt() {
                        if k == state.model.kopt() {
                            continue;
                        }
                        let distsq = (state.model.xpt().column(k) - &xopt).norm_squared();
                        if distsq > distmax {
                            distmax = distsq;
                            kfar = Some(k);
                        }
                    }

                    state.stage = match kfar {
                        Some(k) => {
                            debug!("geometry step due for sample {} (dist² = {})", k, distmax);
                            Stage::Geometry(k)
                        }
                        None if state.fopt < state.fsave || state.delsav > state.rho => {
                            Stage::TrustStep
                        }
                        None => Stage::ReduceRho,
                    };
                }

                Stage::ReduceRho => {
                    if state.rho <= options.rho_end {
                        return Some(ExitStatus::Normal);
                    }

                    state.delta = half * state.rho;
                    let ratio = state.rho / options.rho_end;
                    if ratio > convert(250.0) {
                        state.rho *= tenth;
                    } else if ratio <= convert(16.0) {
                        state.rho = options.rho_end;
                    } else {
                        state.rho = (state.rho * options.rho_end).sqrt();
                    }
                    state.delta = state.delta.max(state.rho);
                    state.fsave = state.fopt;
                    state.nvala = 0;
                    state.nvalb = 0;
                    state.imprv = false;
                    debug!("reducing rho to {} (delta {})", state.rho, state.delta);

                    state.stage = Stage::TrustStep;
                }
            }
        }

        debug!("state machine failed to make progress");
        Some(ExitStatus::DamagingRounding)
    }

    /// Performs the single objective evaluation of a cycle and folds the
    /// result into the model and the trust-region bookkeeping. `Some` is a
    /// terminal status.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_and_update(
        options: &LincoaOptions<F>,
        state: &mut State<F::Field>,
        f: &F,
        dom: &Domain<F::Field>,
        step: OVector<F::Field, Dyn>,
        qred: F::Field,
        kind: StepKind<F::Field>,
    ) -> Option<ExitStatus> {
        let zero = F::Field::zero();
        let one = F::Field::one();
        let two: F::Field = convert(2.0);
        let tenth: F::Field = convert(0.1);

        if state.nf >= state.maxfun {
            return Some(ExitStatus::MaxFunReached);
        }

        let x = state.model.xbase() + state.model.xopt() + &step;
        if !linalg::all_finite(&x) {
            return Some(ExitStatus::NanInputX);
        }

        // Guard against evaluating on top of the best point or absurdly far
        // from it; both mean the interpolation arithmetic has broken down.
        let xdiff = (&x - &state.xsav).norm();
        if !(xdiff > tenth * state.rho && xdiff < two * state.delta) {
            debug!(
                "trial point at damaged distance {} (rho {}, delta {})",
                xdiff, state.rho, state.delta
            );
            return Some(ExitStatus::DamagingRounding);
        }

        let fraw = f.apply(&x);
        state.nf += 1;

        let cstrv = dom.violation(&x);
        record(
            &mut state.fhist,
            &mut state.chist,
            options.maxhist,
            fraw,
            cstrv,
        );

        if !fraw.is_finite() {
            return Some(ExitStatus::NanObjective);
        }
        let fnew = moderate(fraw);

        // Feasibility of the trial point in the normalized metric.
        let ifeas = match kind {
            StepKind::Geometry { ifeas, .. } => ifeas,
            StepKind::Trust { .. } => {
                let feastol = F::Field::EPSILON_SQRT * (one + state.delta);
                let xopt = state.model.xopt();
                let mut viol = zero;
                for j in 0..state.anorm.ncols() {
                    let aj = state.anorm.column(j);
                    viol = viol.max(aj.dot(&xopt) + aj.dot(&step) - state.bres[j]);
                }
                viol <= feastol
            }
        };

        if ifeas && fnew <= options.ftarget {
            if fnew < state.fopt {
                state.fopt = fnew;
                state.xsav = x;
            }
            return Some(ExitStatus::FTargetAchieved);
        }

        let diff = fnew - state.fopt + qred;

        // Compare against the minimum-Frobenius interpolant of the current
        // values; persistent preference for it triggers a model rebuild.
        if ifeas && state.itest < 3 {
            let dffalt = fnew - state.fopt - state.model.min_frobenius_change(&step);
            if dffalt.abs() >= tenth * diff.abs() {
                state.itest = 0;
            } else {
                state.itest += 1;
            }
        }

        // Trust-radius update from the achieved-to-predicted ratio.
        let mut ratio = zero;
        if let StepKind::Trust { snorm } = kind {
            ratio = (state.fopt - fnew) / qred;

            if ratio <= options.eta1 {
                state.delta *= options.gamma1;
            } else if ratio <= options.eta2 {
                state.delta = (options.gamma1 * state.delta).max(snorm);
            } else {
                let grown = (options.gamma1 * state.delta).max(options.gamma2 * snorm);
                let cap = convert::<f64, F::Field>(std::f64::consts::SQRT_2) * state.delta;
                state.delta = grown.min(cap);
            }
            if state.delta <= convert::<f64, F::Field>(1.4) * state.rho {
                state.delta = state.rho;
            }
        }

        // Fold the new value into the model.
        let knew_hint = match kind {
            StepKind::Geometry { knew, .. } => Some(knew),
            StepKind::Trust { .. } => None,
        };
        let knew = match state.model.update(knew_hint, &step, fnew, diff) {
            Ok(knew) => knew,
            Err(ModelError::DegenerateDenominator) => {
                return Some(ExitStatus::DamagingRounding);
            }
            Err(ModelError::ModelCorrupt) => return Some(ExitStatus::NanModel),
        };

        if state.itest >= 3 {
            state.model.rebuild_min_frobenius();
            state.itest = 0;
        }

        // Promote the trial point when it is a feasible improvement.
        if ifeas && fnew < state.fopt {
            state.model.promote(knew);
            state.fopt = fnew;
            state.xsav = x;
            state.update_rescon();
            debug!("new best value {} (cstrv {})", fnew, cstrv);
        }

        // Route the next cycle.
        state.stage = match kind {
            StepKind::Geometry { .. } => Stage::TrustStep,
            StepKind::Trust { .. } => {
                if ratio >= options.eta1 {
                    Stage::TrustStep
                } else {
                    Stage::MaybeGeometry
                }
            }
        };

        None
    }
}

/// Non-finite objective values are pushed to a huge finite value so a single
/// rogue evaluation cannot poison the interpolation before the run winds
/// down.
fn moderate<T: RealField>(f: T) -> T {
    let huge = T::max_value().map_or_else(T::one, |m| m * convert(0.5));
    if f.is_finite() {
        f.min(huge)
    } else {
        huge
    }
}

fn record<T: RealField>(fhist: &mut Vec<T>, chist: &mut Vec<T>, maxhist: usize, f: T, cstrv: T) {
    if fhist.len() < maxhist {
        fhist.push(f);
        chist.push(cstrv);
    }
}

impl<F: Function> Optimizer<F> for Lincoa<F> {
    const NAME: &'static str = "LINCOA";

    type Error = LincoaError;

    fn opt_next<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
    ) -> Result<F::Field, Self::Error>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        if let Some(status) = self.status {
            return Err(LincoaError::Finished(status));
        }

        if self.state.is_none() {
            self.initialize(f, dom, x.clone_owned())?;
        } else {
            self.advance(f, dom);
        }

        let state = self.state.as_ref().expect("state exists after init");
        x.copy_from(&state.xsav);
        Ok(state.fopt)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::dvector;

    use super::*;
    use crate::testing::*;

    fn options_for<P: Problem<Field = f64>>() -> LincoaOptions<P> {
        LincoaOptions::default()
    }

    #[test]
    fn shifted_sphere_converges() {
        let f = Sphere::with_center(dvector![1.0, 2.0]);
        let dom = f.domain();

        let mut options = options_for();
        options.set_npt(5);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);

        let result = lincoa.minimize(&f, &dom, dvector![0.0, 0.0]).unwrap();

        assert_eq!(result.status, ExitStatus::Normal);
        assert!(result.f <= 1e-8, "f = {}", result.f);
        assert!((result.x[0] - 1.0).abs() <= 1e-3);
        assert!((result.x[1] - 2.0).abs() <= 1e-3);
        assert_eq!(result.cstrv, 0.0);
    }

    #[test]
    fn rosenbrock_valley_is_traversed() {
        let f = Rosenbrock;
        let dom = f.domain();

        let mut options = options_for();
        options.set_npt(5).set_rho_end(1e-8).set_maxfun(3000);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);

        let result = lincoa.minimize(&f, &dom, dvector![-1.2, 1.0]).unwrap();

        assert!(result.f <= 1e-4, "f = {}", result.f);
        assert!((result.x[0] - 1.0).abs() <= 0.05, "x = {:?}", result.x);
        assert!((result.x[1] - 1.0).abs() <= 0.1, "x = {:?}", result.x);
    }

    #[test]
    fn linear_objective_respects_feasibility() {
        let f = LinearSum;
        let dom = f.domain();

        let mut options = options_for();
        options.set_maxhist(2000);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);

        let result = lincoa.minimize(&f, &dom, dvector![2.0, 2.0]).unwrap();

        assert!((result.f - 1.0).abs() <= 1e-4, "f = {}", result.f);
        assert!(result.cstrv <= 1e-6);

        // The recorded path never strays far into infeasibility: trial
        // points honor the constraints up to the geometry-step slack.
        for &c in lincoa.cstrv_history() {
            assert!(c <= 0.21, "violation {} on the path", c);
        }
    }

    #[test]
    fn equality_encoded_as_opposing_inequalities() {
        let f = SphereOnPlane;
        let dom = f.domain();

        let mut lincoa = Lincoa::new(&f, &dom);
        let result = lincoa.minimize(&f, &dom, dvector![1.0, 0.0, 0.0]).unwrap();

        assert!((result.f - 1.0 / 3.0).abs() <= 1e-4, "f = {}", result.f);
        for i in 0..3 {
            assert!((result.x[i] - 1.0 / 3.0).abs() <= 1e-2, "x = {:?}", result.x);
        }
        assert!(result.cstrv <= 1e-6);
    }

    #[test]
    fn arctan_ridge_terminates() {
        // Historical infinite-loop case: the objective decreases forever
        // while flattening out.
        let f = ArctanRidge;
        let dom = f.domain();

        let mut lincoa = Lincoa::new(&f, &dom);
        let result = lincoa.minimize(&f, &dom, dvector![-99.0]).unwrap();

        assert!(result.x[0] <= -99.0 + 1e-6, "x = {:?}", result.x);
        assert!(result.nf <= 500);
    }

    #[test]
    fn maxfun_equal_to_npt_stops_after_initialization() {
        let f = Sphere::with_center(dvector![1.0, 2.0]);
        let dom = f.domain();

        let npt = 5;
        let mut options = options_for();
        options.set_npt(npt).set_maxfun(npt);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);

        let result = lincoa.minimize(&f, &dom, dvector![0.0, 0.0]).unwrap();

        assert_eq!(result.nf, npt);
        assert_eq!(result.status, ExitStatus::MaxFunReached);

        // The best of the five samples: the initial set is built from
        // coordinate steps of length ρ_beg around the origin.
        assert!(result.f <= 5.0 + 1e-12);
    }

    #[test]
    fn ftarget_stops_early() {
        let f = Sphere::new(2);
        let dom = f.domain();

        let mut options = options_for();
        options.set_ftarget(1e-3);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);

        let result = lincoa.minimize(&f, &dom, dvector![3.0, -1.0]).unwrap();

        assert_eq!(result.status, ExitStatus::FTargetAchieved);
        assert!(result.f <= 1e-3);
    }

    #[test]
    fn nan_objective_is_terminal_but_returns_best() {
        struct Trap;

        impl Problem for Trap {
            type Field = f64;

            fn domain(&self) -> Domain<Self::Field> {
                Domain::unconstrained(2)
            }
        }

        impl Function for Trap {
            fn apply<Sx>(&self, x: &nalgebra::Vector<Self::Field, Dyn, Sx>) -> Self::Field
            where
                Sx: nalgebra::storage::Storage<Self::Field, Dyn> + IsContiguous,
            {
                // Valid around the start, NaN once the iterates move out.
                if x.norm() > 2.5 {
                    f64::NAN
                } else {
                    x.norm_squared()
                }
            }
        }

        let f = Trap;
        let dom = f.domain();

        let mut lincoa = Lincoa::new(&f, &dom);
        let result = lincoa.minimize(&f, &dom, dvector![2.0, 0.0]).unwrap();

        assert_eq!(result.status, ExitStatus::NanObjective);
        assert!(result.f.is_finite());
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let f = Sphere::new(2);
        let dom = f.domain();

        let mut options = options_for();
        options.set_npt(20);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);
        assert!(matches!(
            lincoa.minimize(&f, &dom, dvector![0.0, 0.0]),
            Err(LincoaError::InvalidArguments(_)),
        ));

        let mut options = options_for();
        options.set_rho_end(2.0);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);
        assert!(matches!(
            lincoa.minimize(&f, &dom, dvector![0.0, 0.0]),
            Err(LincoaError::InvalidArguments(_)),
        ));
    }

    #[test]
    fn rho_is_monotone_and_bottoms_out() {
        let f = Sphere::with_center(dvector![0.3, -0.2]);
        let dom = f.domain();

        let mut options = options_for();
        options.set_rho_end(1e-4).set_maxhist(10_000);
        let mut lincoa = Lincoa::with_options(&f, &dom, options);
        let result = lincoa.minimize(&f, &dom, dvector![0.0, 0.0]).unwrap();

        assert_eq!(result.status, ExitStatus::Normal);
        // Termination under the Normal code requires ρ to have reached its
        // floor, which bounds the final accuracy.
        assert!(result.f <= 1e-6);
    }

    #[test]
    fn optimizer_trait_steps_one_evaluation_at_a_time() {
        let f = Sphere::with_center(dvector![1.0, 2.0]);
        let dom = f.domain();

        let mut lincoa = Lincoa::new(&f, &dom);
        let mut x = dvector![0.0, 0.0];

        // First call pays the initialization, later calls one evaluation
        // each.
        lincoa.opt_next(&f, &dom, &mut x).unwrap();
        let after_init = lincoa.num_evaluations();
        assert_eq!(after_init, 5);

        lincoa.opt_next(&f, &dom, &mut x).unwrap();
        assert_eq!(lincoa.num_evaluations(), after_init + 1);

        // Drive to termination; the driver then gets an error carrying the
        // status.
        let mut fx = f64::INFINITY;
        for _ in 0..2000 {
            match lincoa.opt_next(&f, &dom, &mut x) {
                Ok(value) => fx = value,
                Err(LincoaError::Finished(status)) => {
                    assert_eq!(status, ExitStatus::Normal);
                    assert!(fx <= 1e-8);
                    return;
                }
                Err(error) => panic!("{:?}", error),
            }
        }

        panic!("optimizer did not terminate");
    }

    #[test]
    fn rescon_encoding_invariants() {
        let delta = 0.5;

        // Inside the trust radius the residual is stored as is.
        assert_eq!(rescon_entry(0.3, delta), 0.3);
        assert_eq!(rescon_entry(0.0, delta), 0.0);
        // Slightly infeasible points clamp to an active residual.
        assert_eq!(rescon_entry(-0.1, delta), 0.0);

        // Beyond the radius the sign flips and the magnitude certifies the
        // distance: |rescon| >= delta and |rescon| <= residual.
        let r = rescon_entry(1.7, delta);
        assert!(r < 0.0);
        assert!(-r >= delta);
        assert!(-r <= 1.7);
    }

    #[test]
    fn rerun_from_minimizer_is_idempotent() {
        let f = Sphere::with_center(dvector![1.0, 2.0]);
        let dom = f.domain();

        let mut lincoa = Lincoa::new(&f, &dom);
        let first = lincoa.minimize(&f, &dom, dvector![0.0, 0.0]).unwrap();

        let mut lincoa = Lincoa::new(&f, &dom);
        let second = lincoa.minimize(&f, &dom, first.x.clone()).unwrap();

        let tau = 1e-6;
        assert!(
            (second.f - first.f).abs() <= tau * (1.0 + first.f.abs()),
            "{} vs {}",
            first.f,
            second.f,
        );
    }

    #[test]
    fn testing_driver_works_with_lincoa() {
        let f = Sphere::with_center(dvector![0.5, -0.5]);
        let dom = f.domain();

        for x in f.initials() {
            let optimizer = Lincoa::new(&f, &dom);
            let x = optimize(&f, &dom, optimizer, x, 0.0, 1000, 1e-6).unwrap();
            assert!(f.is_optimum(&x, 1e-5));
        }
    }
}
