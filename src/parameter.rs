//! Symbolic integer parameters.
//!
//! A [`MappedParameter`] evaluates an integer expression over a namespace of
//! named bindings. Attached to a loop it marks the repetition count as
//! volatile, i.e. changeable after compilation by updating the constants in
//! the namespace. Expressions are kept as written; no simplification.

use std::{
    fmt,
    ops::{Mul, Sub},
    sync::Arc,
};

use hashbrown::HashMap;

use crate::error::{Error, Result};

/// Named bindings an expression is evaluated against.
pub type Namespace = HashMap<Arc<str>, Binding>;

/// Integer-valued expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Constant(i64),
    Variable(Arc<str>),
    Mul(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
}

/// A namespace entry: either a plain constant or a nested parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Constant(i64),
    Parameter(MappedParameter),
}

/// An integer expression bound to a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedParameter {
    expression: Expression,
    namespace: Namespace,
}

const PARENT_REPETITION_COUNT: &str = "parent_repetition_count";
const CHILD_REPETITION_COUNT: &str = "child_repetition_count";

impl Expression {
    #[must_use]
    pub const fn constant(value: i64) -> Self {
        Self::Constant(value)
    }

    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Variable(name.into())
    }

    /// Evaluates the expression against `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable has no binding.
    pub fn evaluate(&self, namespace: &Namespace) -> Result<i64> {
        match self {
            Self::Constant(value) => Ok(*value),
            Self::Variable(name) => namespace
                .get(name)
                .ok_or_else(|| Error::UnknownParameter(name.to_string()))?
                .value(),
            Self::Mul(lhs, rhs) => Ok(lhs.evaluate(namespace)? * rhs.evaluate(namespace)?),
            Self::Sub(lhs, rhs) => Ok(lhs.evaluate(namespace)? - rhs.evaluate(namespace)?),
        }
    }

    fn is_atom(&self) -> bool {
        matches!(self, Self::Constant(_) | Self::Variable(_))
    }
}

impl Mul for Expression {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl Mul<i64> for Expression {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        self * Self::Constant(rhs)
    }
}

impl Sub<i64> for Expression {
    type Output = Self;

    fn sub(self, rhs: i64) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(Self::Constant(rhs)))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn operand(f: &mut fmt::Formatter<'_>, e: &Expression) -> fmt::Result {
            if e.is_atom() {
                write!(f, "{e}")
            } else {
                write!(f, "({e})")
            }
        }
        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::Mul(lhs, rhs) => {
                operand(f, lhs)?;
                write!(f, " * ")?;
                operand(f, rhs)
            }
            Self::Sub(lhs, rhs) => {
                operand(f, lhs)?;
                write!(f, " - ")?;
                operand(f, rhs)
            }
        }
    }
}

impl Binding {
    fn value(&self) -> Result<i64> {
        match self {
            Self::Constant(value) => Ok(*value),
            Self::Parameter(parameter) => parameter.get_value(),
        }
    }
}

impl MappedParameter {
    #[must_use]
    pub fn new(expression: Expression, namespace: Namespace) -> Self {
        Self {
            expression,
            namespace,
        }
    }

    /// A parameter that is a single named constant.
    pub fn named_constant(name: impl Into<Arc<str>>, value: i64) -> Self {
        let name = name.into();
        let mut namespace = Namespace::new();
        namespace.insert(Arc::clone(&name), Binding::Constant(value));
        Self::new(Expression::Variable(name), namespace)
    }

    /// Evaluates the parameter to its current integer value.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression references an unbound variable.
    pub fn get_value(&self) -> Result<i64> {
        self.expression.evaluate(&self.namespace)
    }

    /// Replaces matching constants in the namespace and in all nested
    /// parameters.
    pub fn update_constants(&mut self, values: &HashMap<Arc<str>, i64>) {
        for binding in self.namespace.values_mut() {
            if let Binding::Parameter(parameter) = binding {
                parameter.update_constants(values);
            }
        }
        for (name, value) in values {
            if let Some(Binding::Constant(constant)) = self.namespace.get_mut(name) {
                *constant = *value;
            }
        }
    }

    /// The symbolic product with an integer factor, in the same namespace.
    #[must_use]
    pub fn scaled(&self, factor: i64) -> Self {
        Self::new(self.expression.clone() * factor, self.namespace.clone())
    }

    /// The expression decremented by one, in the same namespace.
    #[must_use]
    pub fn decremented(&self) -> Self {
        Self::new(self.expression.clone() - 1, self.namespace.clone())
    }

    /// The symbolic product of two parameters.
    ///
    /// The result binds `parent_repetition_count` and
    /// `child_repetition_count` to the operands, so both stay independently
    /// updatable.
    #[must_use]
    pub fn product(parent: &Self, child: &Self) -> Self {
        let expression =
            Expression::var(PARENT_REPETITION_COUNT) * Expression::var(CHILD_REPETITION_COUNT);
        let mut namespace = Namespace::new();
        namespace.insert(
            Arc::from(PARENT_REPETITION_COUNT),
            Binding::Parameter(parent.clone()),
        );
        namespace.insert(
            Arc::from(CHILD_REPETITION_COUNT),
            Binding::Parameter(child.clone()),
        );
        Self::new(expression, namespace)
    }

    #[must_use]
    pub const fn expression(&self) -> &Expression {
        &self.expression
    }

    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl fmt::Display for MappedParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expression.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(values: &[(&str, i64)]) -> HashMap<Arc<str>, i64> {
        values.iter().map(|&(k, v)| (Arc::from(k), v)).collect()
    }

    #[test]
    fn evaluate_named_constant() {
        let p = MappedParameter::named_constant("n", 5);
        assert_eq!(p.get_value(), Ok(5));
    }

    #[test]
    fn unknown_variable() {
        let p = MappedParameter::new(Expression::var("missing"), Namespace::new());
        assert_eq!(p.get_value(), Err(Error::UnknownParameter("missing".into())));
    }

    #[test]
    fn scaled_and_decremented() {
        let p = MappedParameter::named_constant("n", 5);
        assert_eq!(p.scaled(3).get_value(), Ok(15));
        assert_eq!(p.decremented().get_value(), Ok(4));
        assert_eq!(p.decremented().to_string(), "n - 1");
        assert_eq!(p.scaled(3).to_string(), "n * 3");
    }

    #[test]
    fn product_binds_both_operands() {
        let parent = MappedParameter::named_constant("outer", 2);
        let child = MappedParameter::named_constant("inner", 3);
        let product = MappedParameter::product(&parent, &child);
        assert_eq!(product.get_value(), Ok(6));
        assert_eq!(
            product.to_string(),
            "parent_repetition_count * child_repetition_count"
        );
    }

    #[test]
    fn update_constants_reaches_nested_parameters() {
        let parent = MappedParameter::named_constant("outer", 2);
        let child = MappedParameter::named_constant("inner", 3);
        let mut product = MappedParameter::product(&parent, &child);

        product.update_constants(&constants(&[("inner", 7)]));
        assert_eq!(product.get_value(), Ok(14));

        product.update_constants(&constants(&[("outer", 1), ("inner", 1)]));
        assert_eq!(product.get_value(), Ok(1));
    }

    #[test]
    fn update_constants_ignores_unrelated_names() {
        let mut p = MappedParameter::named_constant("n", 5);
        p.update_constants(&constants(&[("other", 9)]));
        assert_eq!(p.get_value(), Ok(5));
    }

    #[test]
    fn display_parenthesizes_compound_operands() {
        let e = (Expression::var("a") - 1) * 2;
        assert_eq!(e.to_string(), "(a - 1) * 2");
    }
}
