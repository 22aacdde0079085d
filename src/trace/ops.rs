//! `std::ops` implementations for [`Var`].

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::opcode::OpCode;

use super::lower::TensorOp;
use super::var::{Operand, Var};

impl Neg for Var {
    type Output = Var;
    #[inline]
    fn neg(self) -> Var {
        Var::apply(TensorOp::Unary(OpCode::Neg), &[self.into()])
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $code:expr) => {
        impl $trait<Var> for Var {
            type Output = Var;
            #[inline]
            fn $method(self, rhs: Var) -> Var {
                Var::apply(TensorOp::Binary($code), &[self.into(), rhs.into()])
            }
        }

        impl $assign_trait<Var> for Var {
            #[inline]
            fn $assign_method(&mut self, rhs: Var) {
                *self = $trait::$method(*self, rhs);
            }
        }

        binary_op!(@scalar $trait, $method, $assign_trait, $assign_method, $code, f64);
        binary_op!(@scalar $trait, $method, $assign_trait, $assign_method, $code, i64);
        binary_op!(@scalar $trait, $method, $assign_trait, $assign_method, $code, i32);
    };
    (@scalar $trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident,
     $code:expr, $t:ty) => {
        impl $trait<$t> for Var {
            type Output = Var;
            #[inline]
            fn $method(self, rhs: $t) -> Var {
                Var::apply(TensorOp::Binary($code), &[self.into(), Operand::from(rhs)])
            }
        }

        impl $trait<Var> for $t {
            type Output = Var;
            #[inline]
            fn $method(self, rhs: Var) -> Var {
                Var::apply(TensorOp::Binary($code), &[Operand::from(self), rhs.into()])
            }
        }

        impl $assign_trait<$t> for Var {
            #[inline]
            fn $assign_method(&mut self, rhs: $t) {
                *self = $trait::$method(*self, rhs);
            }
        }
    };
}

binary_op!(Add, add, AddAssign, add_assign, OpCode::Add);
binary_op!(Sub, sub, SubAssign, sub_assign, OpCode::Sub);
binary_op!(Mul, mul, MulAssign, mul_assign, OpCode::Mul);
binary_op!(Div, div, DivAssign, div_assign, OpCode::Div);
