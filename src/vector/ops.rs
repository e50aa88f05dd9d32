//! Operator overloads for `StateVector`.
//!
//! Addition and subtraction are fallible (dimension must agree) and so are
//! exposed as `try_add`/`try_sub` rather than `Add`/`Sub`, since those traits
//! have no fallible form. Scalar scaling can never fail and does implement
//! `Mul`/`Div`.

use super::{DimensionMismatch, StateVector};
use std::ops::{Div, Mul, Neg};

impl StateVector {
    pub fn try_add(&self, rhs: &StateVector) -> Result<StateVector, DimensionMismatch> {
        self.check_dim(rhs)?;
        Ok(StateVector(
            self.0.iter().zip(&rhs.0).map(|(a, b)| a + b).collect(),
        ))
    }

    pub fn try_sub(&self, rhs: &StateVector) -> Result<StateVector, DimensionMismatch> {
        self.check_dim(rhs)?;
        Ok(StateVector(
            self.0.iter().zip(&rhs.0).map(|(a, b)| a - b).collect(),
        ))
    }
}

impl Mul<f64> for &StateVector {
    type Output = StateVector;
    fn mul(self, rhs: f64) -> StateVector {
        StateVector(self.0.iter().map(|x| x * rhs).collect())
    }
}

impl Mul<f64> for StateVector {
    type Output = StateVector;
    fn mul(self, rhs: f64) -> StateVector {
        &self * rhs
    }
}

impl Div<f64> for &StateVector {
    type Output = StateVector;
    fn div(self, rhs: f64) -> StateVector {
        let inv = rhs.recip();
        StateVector(self.0.iter().map(|x| x * inv).collect())
    }
}

impl Neg for &StateVector {
    type Output = StateVector;
    fn neg(self) -> StateVector {
        StateVector(self.0.iter().map(|x| -x).collect())
    }
}
