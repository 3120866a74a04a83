use super::domain::Domain;

/// Extension of [`nalgebra::RealField`] with constants that are used
/// throughout the crate.
pub trait RealField: nalgebra::RealField + Copy {
    /// Machine epsilon.
    const EPSILON: Self;
    /// Square root of machine epsilon.
    const EPSILON_SQRT: Self;
    /// Cubic root of machine epsilon.
    const EPSILON_CBRT: Self;
}

impl RealField for f32 {
    const EPSILON: Self = f32::EPSILON;
    const EPSILON_SQRT: Self = 0.000345266983;
    const EPSILON_CBRT: Self = 0.00492156661;
}

impl RealField for f64 {
    const EPSILON: Self = f64::EPSILON;
    const EPSILON_SQRT: Self = 1.4901161193847656e-8;
    const EPSILON_CBRT: Self = 6.055454452393343e-6;
}

/// The base trait for [`Function`](super::function::Function).
pub trait Problem {
    /// Type of the scalar, usually [`f64`].
    type Field: RealField;

    /// Get the domain of the problem, that is, its dimension and the linear
    /// inequality constraints restricting the variables (if any).
    fn domain(&self) -> Domain<Self::Field>;
}
