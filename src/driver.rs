//! High-level API for optimization.
//!
//! This module contains a "driver" that encapsulates all internal state and
//! provides a simple API to run the iterative optimization process.
//!
//! The simplest way of using the driver is to initialize it with the
//! defaults:
//!
//! ```rust
//! use lincoa::OptimizerDriver;
//! # use lincoa::{Domain, Problem};
//! #
//! # struct MyFunction;
//! #
//! # impl MyFunction {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//!
//! let f = MyFunction::new();
//!
//! let mut optimizer = OptimizerDriver::new(&f);
//! ```
//!
//! If you need to specify additional settings, use the builder:
//!
//! ```rust
//! use lincoa::OptimizerDriver;
//! # use lincoa::{Domain, Problem};
//! #
//! # struct MyFunction;
//! #
//! # impl MyFunction {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//!
//! let f = MyFunction::new();
//!
//! let mut optimizer = OptimizerDriver::builder(&f)
//!     .with_initial(vec![10.0, -10.0])
//!     .build();
//! ```
//!
//! Once you have the driver, you can use it to find the minimum:
//!
//! ```rust
//! # use lincoa::nalgebra as na;
//! # use lincoa::{Domain, Function, OptimizerDriver, Problem};
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct MyFunction;
//! #
//! # impl MyFunction {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyFunction {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         x.norm_squared()
//! #     }
//! # }
//! #
//! # let f = MyFunction::new();
//! #
//! # let mut optimizer = OptimizerDriver::new(&f);
//! #
//! // Minimum or optimizer error.
//! let result = optimizer.find(|state| state.fx() <= 1e-6 || state.iter() >= 100);
//! ```
//!
//! If you need more control over the iteration process, you can do the
//! iterations manually:
//!
//! ```rust
//! # use lincoa::nalgebra as na;
//! # use lincoa::{Domain, Function, OptimizerDriver, Problem};
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct MyFunction;
//! #
//! # impl MyFunction {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyFunction {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyFunction {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         x.norm_squared()
//! #     }
//! # }
//! #
//! # let f = MyFunction::new();
//! #
//! # let mut optimizer = OptimizerDriver::new(&f);
//! #
//! loop {
//!     // Current point or optimizer error.
//!     let result = optimizer.next();
//!     // ...
//! #   break;
//! }
//! ```

use nalgebra::{convert, DVector, Dyn, OVector};

use crate::{algo::Lincoa, Domain, Function, Optimizer, Problem};

struct Builder<'a, P: Problem, A> {
    p: &'a P,
    dom: Domain<P::Field>,
    algo: A,
    x0: OVector<P::Field, Dyn>,
}

impl<'a, P: Problem> Builder<'a, P, Lincoa<P>> {
    fn new(p: &'a P) -> Self {
        let dom = p.domain();
        let algo = Lincoa::new(p, &dom);
        let x0 = DVector::from_element(dom.dim(), convert(0.0));

        Self { p, dom, algo, x0 }
    }
}

impl<'a, P: Problem, A> Builder<'a, P, A> {
    fn with_initial(mut self, x0: Vec<P::Field>) -> Self {
        self.x0 = DVector::from_vec(x0);
        self
    }

    fn with_algo<A2, FA>(self, factory: FA) -> Builder<'a, P, A2>
    where
        FA: FnOnce(&P, &Domain<P::Field>) -> A2,
    {
        let algo = factory(self.p, &self.dom);

        Builder {
            p: self.p,
            dom: self.dom,
            algo,
            x0: self.x0,
        }
    }
}

/// Builder for the [`OptimizerDriver`].
pub struct OptimizerBuilder<'a, F: Problem, A>(Builder<'a, F, A>);

impl<'a, F: Problem, A> OptimizerBuilder<'a, F, A> {
    /// Sets the initial point from which the iterative process starts.
    pub fn with_initial(self, x0: Vec<F::Field>) -> Self {
        Self(self.0.with_initial(x0))
    }

    /// Sets specific algorithm to be used.
    ///
    /// This builder method accepts a closure that takes the reference to the
    /// problem and its domain. For algorithms in lincoa, you can simply pass
    /// the `new` constructor directly (e.g., `Lincoa::new`).
    pub fn with_algo<A2, FA>(self, factory: FA) -> OptimizerBuilder<'a, F, A2>
    where
        FA: FnOnce(&F, &Domain<F::Field>) -> A2,
    {
        OptimizerBuilder(self.0.with_algo(factory))
    }

    /// Builds the [`OptimizerDriver`].
    pub fn build(self) -> OptimizerDriver<'a, F, A> {
        let Builder { p: f, dom, algo, x0 } = self.0;

        OptimizerDriver {
            f,
            dom,
            algo,
            x: x0,
            fx: convert(f64::INFINITY),
        }
    }
}

/// The driver for the process of optimizing a function.
///
/// For default settings, use [`OptimizerDriver::new`]. For more flexibility,
/// use [`OptimizerDriver::builder`]. For the usage of the driver, see
/// [module](self) documentation.
pub struct OptimizerDriver<'a, F: Problem, A> {
    f: &'a F,
    dom: Domain<F::Field>,
    algo: A,
    x: OVector<F::Field, Dyn>,
    fx: F::Field,
}

impl<'a, F: Problem> OptimizerDriver<'a, F, Lincoa<F>> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(f: &'a F) -> OptimizerBuilder<'a, F, Lincoa<F>> {
        OptimizerBuilder(Builder::new(f))
    }

    /// Initializes the driver with the default settings.
    pub fn new(f: &'a F) -> Self {
        OptimizerDriver::builder(f).build()
    }
}

impl<'a, F: Problem, A> OptimizerDriver<'a, F, A> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[F::Field] {
        self.x.as_slice()
    }

    /// Returns the current function value.
    pub fn fx(&self) -> F::Field {
        self.fx
    }
}

impl<'a, F: Function, A: Optimizer<F>> OptimizerDriver<'a, F, A> {
    /// Performs one iteration of the process, returning the current point
    /// and function value in case of no error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<(&[F::Field], F::Field), A::Error> {
        self.algo
            .opt_next(self.f, &self.dom, &mut self.x)
            .map(|fx| {
                self.fx = fx;
                (self.x.as_slice(), fx)
            })
    }

    /// Runs the iterative process until given stopping criterion is
    /// satisfied.
    pub fn find<C>(&mut self, stop: C) -> Result<(&[F::Field], F::Field), A::Error>
    where
        C: Fn(OptimizerIterState<'_, F>) -> bool,
    {
        let mut iter = 0;

        loop {
            self.fx = self.next()?.1;

            let state = OptimizerIterState {
                x: &self.x,
                fx: self.fx,
                iter,
            };

            if stop(state) {
                return Ok((self.x.as_slice(), self.fx));
            }

            iter += 1;
        }
    }

    /// Returns the name of the optimizer.
    pub fn name(&self) -> &str {
        A::NAME
    }
}

/// State of the current iteration of the optimization process.
pub struct OptimizerIterState<'a, F: Problem> {
    x: &'a OVector<F::Field, Dyn>,
    fx: F::Field,
    iter: usize,
}

impl<'a, F: Problem> OptimizerIterState<'a, F> {
    /// Returns reference to the current point.
    pub fn x(&self) -> &[F::Field] {
        self.x.as_slice()
    }

    /// Returns the current function value.
    pub fn fx(&self) -> F::Field {
        self.fx
    }

    /// Returns the current iteration number.
    pub fn iter(&self) -> usize {
        self.iter
    }
}
