//! Arrays, abstract arrays and the primitive kernels.
//!
//! Arrays are dense and immutable. Their buffers are reference counted so
//! that copying a value into a continuation or a handler frame never copies
//! element data.
//!
//! Binary primitives accept operands of equal shape, or a rank-0 operand
//! that is broadcast against the other one.

use std::fmt;
use std::rc::Rc;

use crate::error::{EffectError, Result};

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Booleans.
    Bool,
    /// 32-bit signed integers.
    I32,
    /// 32-bit floats.
    F32,
}

impl DType {
    /// Short name used in abstract value signatures.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I32 => "i32",
            DType::F32 => "f32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The abstract value of an array: its shape and dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapedArray {
    shape: Vec<usize>,
    dtype: DType,
}

impl ShapedArray {
    /// Create an abstract array.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Create a rank-0 abstract array.
    pub fn scalar(dtype: DType) -> Self {
        Self::new(Vec::new(), dtype)
    }

    /// Dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Same shape, different dtype.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self::new(self.shape.clone(), dtype)
    }
}

impl fmt::Display for ShapedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Buffer {
    Bool(Rc<[bool]>),
    I32(Rc<[i32]>),
    F32(Rc<[f32]>),
}

impl Buffer {
    fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::I32(_) => DType::I32,
            Buffer::F32(_) => DType::F32,
        }
    }

    fn len(&self) -> usize {
        match self {
            Buffer::Bool(data) => data.len(),
            Buffer::I32(data) => data.len(),
            Buffer::F32(data) => data.len(),
        }
    }
}

/// A dense, immutable array value.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Rc<[usize]>,
    buffer: Buffer,
}

impl Array {
    fn from_buffer(shape: Vec<usize>, buffer: Buffer) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != buffer.len() {
            return Err(EffectError::MalformedArray {
                message: format!(
                    "shape {:?} needs {expected} element(s), buffer holds {}",
                    shape,
                    buffer.len()
                ),
            });
        }
        Ok(Self {
            shape: shape.into(),
            buffer,
        })
    }

    /// Build an `i32` array from a shape and row-major data.
    pub fn from_i32(shape: impl Into<Vec<usize>>, data: Vec<i32>) -> Result<Self> {
        Self::from_buffer(shape.into(), Buffer::I32(data.into()))
    }

    /// Build an `f32` array from a shape and row-major data.
    pub fn from_f32(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        Self::from_buffer(shape.into(), Buffer::F32(data.into()))
    }

    /// Build a `bool` array from a shape and row-major data.
    pub fn from_bool(shape: impl Into<Vec<usize>>, data: Vec<bool>) -> Result<Self> {
        Self::from_buffer(shape.into(), Buffer::Bool(data.into()))
    }

    /// An array of zeros (or `false`) with the given abstract value.
    pub fn zeros(aval: &ShapedArray) -> Self {
        let n = aval.size();
        let buffer = match aval.dtype() {
            DType::Bool => Buffer::Bool(vec![false; n].into()),
            DType::I32 => Buffer::I32(vec![0; n].into()),
            DType::F32 => Buffer::F32(vec![0.0; n].into()),
        };
        Self {
            shape: aval.shape().into(),
            buffer,
        }
    }

    /// Dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    /// The abstract value of this array.
    pub fn aval(&self) -> ShapedArray {
        ShapedArray::new(self.shape.to_vec(), self.dtype())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single element of a rank-0 `i32` array.
    pub fn as_i32(&self) -> Option<i32> {
        match &self.buffer {
            Buffer::I32(data) if self.shape.is_empty() => data.first().copied(),
            _ => None,
        }
    }

    /// The single element of a rank-0 `f32` array.
    pub fn as_f32(&self) -> Option<f32> {
        match &self.buffer {
            Buffer::F32(data) if self.shape.is_empty() => data.first().copied(),
            _ => None,
        }
    }

    /// The single element of a rank-0 `bool` array.
    pub fn as_bool(&self) -> Option<bool> {
        match &self.buffer {
            Buffer::Bool(data) if self.shape.is_empty() => data.first().copied(),
            _ => None,
        }
    }

    /// Row-major `i32` elements, if this is an `i32` array.
    pub fn i32_data(&self) -> Option<&[i32]> {
        match &self.buffer {
            Buffer::I32(data) => Some(data),
            _ => None,
        }
    }

    /// Row-major `f32` elements, if this is an `f32` array.
    pub fn f32_data(&self) -> Option<&[f32]> {
        match &self.buffer {
            Buffer::F32(data) => Some(data),
            _ => None,
        }
    }
}

impl From<i32> for Array {
    fn from(value: i32) -> Self {
        Self {
            shape: Rc::from(Vec::new()),
            buffer: Buffer::I32(Rc::from(vec![value])),
        }
    }
}

impl From<f32> for Array {
    fn from(value: f32) -> Self {
        Self {
            shape: Rc::from(Vec::new()),
            buffer: Buffer::F32(Rc::from(vec![value])),
        }
    }
}

impl From<bool> for Array {
    fn from(value: bool) -> Self {
        Self {
            shape: Rc::from(Vec::new()),
            buffer: Buffer::Bool(Rc::from(vec![value])),
        }
    }
}

fn write_elements<T: fmt::Display>(f: &mut fmt::Formatter<'_>, data: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, x) in data.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{x}")?;
    }
    f.write_str("]")
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            return match &self.buffer {
                Buffer::Bool(data) => write!(f, "{}", data[0]),
                Buffer::I32(data) => write!(f, "{}", data[0]),
                Buffer::F32(data) => write!(f, "{}", data[0]),
            };
        }
        if self.shape.len() > 1 {
            write!(f, "{} ", self.aval())?;
        }
        match &self.buffer {
            Buffer::Bool(data) => write_elements(f, data),
            Buffer::I32(data) => write_elements(f, data),
            Buffer::F32(data) => write_elements(f, data),
        }
    }
}

/// Result shape of a broadcasting binary primitive.
fn broadcast(op: &'static str, lhs: &ShapedArray, rhs: &ShapedArray) -> Result<Vec<usize>> {
    if lhs.shape() == rhs.shape() || rhs.rank() == 0 {
        Ok(lhs.shape().to_vec())
    } else if lhs.rank() == 0 {
        Ok(rhs.shape().to_vec())
    } else {
        Err(EffectError::shape_mismatch(
            format!("operands of `{op}`"),
            lhs,
            rhs,
        ))
    }
}

fn zip_with<T: Copy, U>(lhs: &[T], rhs: &[T], f: impl Fn(T, T) -> U) -> Vec<U> {
    if lhs.len() == rhs.len() {
        lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    } else if lhs.len() == 1 {
        rhs.iter().map(|&b| f(lhs[0], b)).collect()
    } else {
        lhs.iter().map(|&a| f(a, rhs[0])).collect()
    }
}

fn try_zip_with<T: Copy, U>(
    lhs: &[T],
    rhs: &[T],
    f: impl Fn(T, T) -> Result<U>,
) -> Result<Vec<U>> {
    if lhs.len() == rhs.len() {
        lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    } else if lhs.len() == 1 {
        rhs.iter().map(|&b| f(lhs[0], b)).collect()
    } else {
        lhs.iter().map(|&a| f(a, rhs[0])).collect()
    }
}

/// Element-wise binary primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Sum; wraps on `i32`.
    Add,
    /// Difference; wraps on `i32`.
    Sub,
    /// Product; wraps on `i32`.
    Mul,
    /// Quotient; integer division truncates and rejects a zero divisor.
    Div,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
    /// Less-than; yields `bool`.
    Lt,
    /// Equality; yields `bool`.
    Eq,
}

impl BinaryOp {
    /// Name used in dumps and errors.
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Lt => "lt",
            BinaryOp::Eq => "eq",
        }
    }

    fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Lt | BinaryOp::Eq)
    }

    /// Result abstract value for the given operand abstract values.
    pub fn abstract_eval(self, lhs: &ShapedArray, rhs: &ShapedArray) -> Result<ShapedArray> {
        if lhs.dtype() != rhs.dtype() {
            return Err(EffectError::shape_mismatch(
                format!("operands of `{}`", self.name()),
                lhs,
                rhs,
            ));
        }
        if lhs.dtype() == DType::Bool && !self.is_comparison() {
            return Err(EffectError::UnsupportedDType {
                op: self.name(),
                dtype: DType::Bool,
            });
        }
        let shape = broadcast(self.name(), lhs, rhs)?;
        let dtype = if self.is_comparison() {
            DType::Bool
        } else {
            lhs.dtype()
        };
        Ok(ShapedArray::new(shape, dtype))
    }

    /// Apply the primitive to concrete arrays.
    pub fn apply(self, lhs: &Array, rhs: &Array) -> Result<Array> {
        let out = self.abstract_eval(&lhs.aval(), &rhs.aval())?;
        let buffer = match (&lhs.buffer, &rhs.buffer) {
            (Buffer::I32(a), Buffer::I32(b)) => match self {
                BinaryOp::Add => Buffer::I32(zip_with(a, b, i32::wrapping_add).into()),
                BinaryOp::Sub => Buffer::I32(zip_with(a, b, i32::wrapping_sub).into()),
                BinaryOp::Mul => Buffer::I32(zip_with(a, b, i32::wrapping_mul).into()),
                BinaryOp::Div => Buffer::I32(
                    try_zip_with(a, b, |x, y| {
                        if y == 0 {
                            Err(EffectError::DivisionByZero)
                        } else {
                            Ok(x.wrapping_div(y))
                        }
                    })?
                    .into(),
                ),
                BinaryOp::Max => Buffer::I32(zip_with(a, b, i32::max).into()),
                BinaryOp::Min => Buffer::I32(zip_with(a, b, i32::min).into()),
                BinaryOp::Lt => Buffer::Bool(zip_with(a, b, |x, y| x < y).into()),
                BinaryOp::Eq => Buffer::Bool(zip_with(a, b, |x, y| x == y).into()),
            },
            (Buffer::F32(a), Buffer::F32(b)) => match self {
                BinaryOp::Add => Buffer::F32(zip_with(a, b, |x, y| x + y).into()),
                BinaryOp::Sub => Buffer::F32(zip_with(a, b, |x, y| x - y).into()),
                BinaryOp::Mul => Buffer::F32(zip_with(a, b, |x, y| x * y).into()),
                BinaryOp::Div => Buffer::F32(zip_with(a, b, |x, y| x / y).into()),
                BinaryOp::Max => Buffer::F32(zip_with(a, b, f32::max).into()),
                BinaryOp::Min => Buffer::F32(zip_with(a, b, f32::min).into()),
                BinaryOp::Lt => Buffer::Bool(zip_with(a, b, |x, y| x < y).into()),
                BinaryOp::Eq => Buffer::Bool(zip_with(a, b, |x, y| x == y).into()),
            },
            (Buffer::Bool(a), Buffer::Bool(b)) => match self {
                BinaryOp::Lt => Buffer::Bool(zip_with(a, b, |x, y| !x & y).into()),
                BinaryOp::Eq => Buffer::Bool(zip_with(a, b, |x, y| x == y).into()),
                _ => {
                    return Err(EffectError::UnsupportedDType {
                        op: self.name(),
                        dtype: DType::Bool,
                    })
                }
            },
            _ => {
                return Err(EffectError::internal(format!(
                    "`{}` applied to mixed dtypes",
                    self.name()
                )))
            }
        };
        Array::from_buffer(out.shape().to_vec(), buffer)
    }
}

/// Element-wise unary primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not on `bool`, bitwise not on `i32`.
    Not,
}

impl UnaryOp {
    /// Name used in dumps and errors.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }

    /// Result abstract value, or an error if the dtype is unsupported.
    pub fn abstract_eval(self, operand: &ShapedArray) -> Result<ShapedArray> {
        match (self, operand.dtype()) {
            (UnaryOp::Neg, DType::Bool) | (UnaryOp::Not, DType::F32) => {
                Err(EffectError::UnsupportedDType {
                    op: self.name(),
                    dtype: operand.dtype(),
                })
            }
            _ => Ok(operand.clone()),
        }
    }

    /// Apply elementwise.
    pub fn apply(self, operand: &Array) -> Result<Array> {
        self.abstract_eval(&operand.aval())?;
        let buffer = match (&operand.buffer, self) {
            (Buffer::I32(a), UnaryOp::Neg) => Buffer::I32(a.iter().map(|x| x.wrapping_neg()).collect()),
            (Buffer::I32(a), UnaryOp::Not) => Buffer::I32(a.iter().map(|x| !x).collect()),
            (Buffer::F32(a), UnaryOp::Neg) => Buffer::F32(a.iter().map(|x| -x).collect()),
            (Buffer::Bool(a), UnaryOp::Not) => Buffer::Bool(a.iter().map(|x| !x).collect()),
            _ => {
                return Err(EffectError::UnsupportedDType {
                    op: self.name(),
                    dtype: operand.dtype(),
                })
            }
        };
        Array::from_buffer(operand.shape().to_vec(), buffer)
    }
}

/// Abstract evaluation of `select(pred, on_true, on_false)`.
pub(crate) fn select_abstract_eval(
    pred: &ShapedArray,
    on_true: &ShapedArray,
    on_false: &ShapedArray,
) -> Result<ShapedArray> {
    if pred.dtype() != DType::Bool {
        return Err(EffectError::shape_mismatch(
            "predicate of `select`",
            &pred.with_dtype(DType::Bool),
            pred,
        ));
    }
    if on_true != on_false {
        return Err(EffectError::shape_mismatch(
            "branches of `select`",
            on_true,
            on_false,
        ));
    }
    if pred.rank() != 0 && pred.shape() != on_true.shape() {
        return Err(EffectError::shape_mismatch(
            "predicate of `select`",
            &on_true.with_dtype(DType::Bool),
            pred,
        ));
    }
    Ok(on_true.clone())
}

/// Element-wise `select`; a rank-0 predicate picks a whole branch.
pub(crate) fn select(pred: &Array, on_true: &Array, on_false: &Array) -> Result<Array> {
    select_abstract_eval(&pred.aval(), &on_true.aval(), &on_false.aval())?;
    let Buffer::Bool(p) = &pred.buffer else {
        return Err(EffectError::internal("select predicate is not bool"));
    };
    if pred.shape.is_empty() {
        return Ok(if p[0] { on_true.clone() } else { on_false.clone() });
    }
    fn pick<T: Copy>(p: &[bool], a: &[T], b: &[T]) -> Vec<T> {
        p.iter()
            .zip(a.iter().zip(b))
            .map(|(&c, (&x, &y))| if c { x } else { y })
            .collect()
    }
    let buffer = match (&on_true.buffer, &on_false.buffer) {
        (Buffer::Bool(a), Buffer::Bool(b)) => Buffer::Bool(pick(p, a, b).into()),
        (Buffer::I32(a), Buffer::I32(b)) => Buffer::I32(pick(p, a, b).into()),
        (Buffer::F32(a), Buffer::F32(b)) => Buffer::F32(pick(p, a, b).into()),
        _ => return Err(EffectError::internal("select branches differ in dtype")),
    };
    Array::from_buffer(on_true.shape().to_vec(), buffer)
}

/// Convert an array to another dtype. Floats truncate toward zero.
pub(crate) fn convert(operand: &Array, dtype: DType) -> Result<Array> {
    let buffer = match (&operand.buffer, dtype) {
        (buffer, target) if buffer.dtype() == target => buffer.clone(),
        (Buffer::I32(a), DType::F32) => Buffer::F32(a.iter().map(|&x| x as f32).collect()),
        (Buffer::I32(a), DType::Bool) => Buffer::Bool(a.iter().map(|&x| x != 0).collect()),
        (Buffer::F32(a), DType::I32) => Buffer::I32(a.iter().map(|&x| x as i32).collect()),
        (Buffer::F32(a), DType::Bool) => Buffer::Bool(a.iter().map(|&x| x != 0.0).collect()),
        (Buffer::Bool(a), DType::I32) => Buffer::I32(a.iter().map(|&x| i32::from(x)).collect()),
        (Buffer::Bool(a), DType::F32) => {
            Buffer::F32(a.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect())
        }
        _ => {
            return Err(EffectError::internal(format!(
                "unreachable conversion to {dtype}"
            )))
        }
    };
    Array::from_buffer(operand.shape().to_vec(), buffer)
}

/// Abstract evaluation of `stack`: operands of one abstract value become the
/// rows of a new leading axis.
pub(crate) fn stack_abstract_eval(operands: &[ShapedArray]) -> Result<ShapedArray> {
    let Some(first) = operands.first() else {
        return Err(EffectError::Arity {
            name: "stack".to_string(),
            expected: 1,
            found: 0,
        });
    };
    if let Some(other) = operands.iter().find(|a| *a != first) {
        return Err(EffectError::shape_mismatch("operands of `stack`", first, other));
    }
    let mut shape = Vec::with_capacity(first.rank() + 1);
    shape.push(operands.len());
    shape.extend_from_slice(first.shape());
    Ok(ShapedArray::new(shape, first.dtype()))
}

/// Stack arrays of one abstract value along a new leading axis.
pub(crate) fn stack(operands: &[Array]) -> Result<Array> {
    let avals: Vec<_> = operands.iter().map(Array::aval).collect();
    let out = stack_abstract_eval(&avals)?;
    fn concat<T: Copy>(parts: impl Iterator<Item = Option<Rc<[T]>>>) -> Result<Rc<[T]>> {
        let mut data = Vec::new();
        for part in parts {
            let part = part.ok_or_else(|| EffectError::internal("stack operands differ in dtype"))?;
            data.extend_from_slice(&part);
        }
        Ok(data.into())
    }
    let buffer = match out.dtype() {
        DType::Bool => Buffer::Bool(concat(operands.iter().map(|a| match &a.buffer {
            Buffer::Bool(d) => Some(Rc::clone(d)),
            _ => None,
        }))?),
        DType::I32 => Buffer::I32(concat(operands.iter().map(|a| match &a.buffer {
            Buffer::I32(d) => Some(Rc::clone(d)),
            _ => None,
        }))?),
        DType::F32 => Buffer::F32(concat(operands.iter().map(|a| match &a.buffer {
            Buffer::F32(d) => Some(Rc::clone(d)),
            _ => None,
        }))?),
    };
    Array::from_buffer(out.shape().to_vec(), buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shaped_array_display() {
        assert_eq!(ShapedArray::scalar(DType::I32).to_string(), "i32[]");
        assert_eq!(ShapedArray::new(vec![2, 3], DType::F32).to_string(), "f32[2,3]");
    }

    #[test]
    fn test_scalar_broadcast() {
        let v = Array::from_i32(vec![3], vec![1, 2, 3]).unwrap();
        let out = BinaryOp::Mul.apply(&v, &Array::from(2)).unwrap();
        assert_eq!(out.i32_data(), Some(&[2, 4, 6][..]));
        let out = BinaryOp::Sub.apply(&Array::from(10), &v).unwrap();
        assert_eq!(out.i32_data(), Some(&[9, 8, 7][..]));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = ShapedArray::new(vec![2], DType::I32);
        let b = ShapedArray::new(vec![3], DType::I32);
        let err = BinaryOp::Add.abstract_eval(&a, &b).unwrap_err();
        assert!(matches!(err, EffectError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_dtype_mismatch_rejected() {
        let err = BinaryOp::Add
            .apply(&Array::from(1), &Array::from(1.0f32))
            .unwrap_err();
        assert!(matches!(err, EffectError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_comparison_yields_bool() {
        let out = BinaryOp::Lt.apply(&Array::from(1), &Array::from(2)).unwrap();
        assert_eq!(out.as_bool(), Some(true));
        assert_eq!(out.dtype(), DType::Bool);
    }

    #[test]
    fn test_integer_division_by_zero() {
        let err = BinaryOp::Div
            .apply(&Array::from(1), &Array::from(0))
            .unwrap_err();
        assert!(matches!(err, EffectError::DivisionByZero));
    }

    #[test]
    fn test_bool_arithmetic_rejected() {
        let err = BinaryOp::Add
            .apply(&Array::from(true), &Array::from(false))
            .unwrap_err();
        assert!(matches!(err, EffectError::UnsupportedDType { .. }));
    }

    #[test]
    fn test_malformed_array() {
        assert!(Array::from_i32(vec![2, 2], vec![1, 2, 3]).is_err());
    }

    #[test]
    fn test_select_and_convert() {
        let pred = Array::from_bool(vec![2], vec![true, false]).unwrap();
        let a = Array::from_i32(vec![2], vec![1, 2]).unwrap();
        let b = Array::from_i32(vec![2], vec![10, 20]).unwrap();
        let out = select(&pred, &a, &b).unwrap();
        assert_eq!(out.i32_data(), Some(&[1, 20][..]));

        let f = convert(&out, DType::F32).unwrap();
        assert_eq!(f.f32_data(), Some(&[1.0, 20.0][..]));
    }

    #[test]
    fn test_stack() {
        let out = stack(&[Array::from(20), Array::from(11)]).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.i32_data(), Some(&[20, 11][..]));

        let err = stack_abstract_eval(&[
            ShapedArray::scalar(DType::I32),
            ShapedArray::scalar(DType::F32),
        ])
        .unwrap_err();
        assert!(matches!(err, EffectError::ShapeMismatch { .. }));
        assert!(stack(&[]).is_err());
    }

    #[test]
    fn test_array_display() {
        assert_eq!(Array::from(20).to_string(), "20");
        assert_eq!(
            Array::from_i32(vec![3], vec![1, 2, 3]).unwrap().to_string(),
            "[1, 2, 3]"
        );
    }
}
