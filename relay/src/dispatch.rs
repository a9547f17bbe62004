// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Dispatch classification
//!
//! A callable's calling convention is deduced once, from its declared shape, and
//! never at call time. An explicit override always wins. Otherwise:
//!
//! 1. A future-shaped return is [DispatchType::Future]
//! 2. No result callbacks and no error callbacks is [DispatchType::Synchronous]
//! 3. Exactly one error callback (result callbacks optional) is [DispatchType::Consumer]
//! 4. Anything else is a registration-time error

use std::fmt::Display;

use crate::RelayErr;

/// The calling convention of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchType {
    /// The caller waits until a value or error is available
    Synchronous,
    /// The caller receives a handle which resolves later. Callbacks, if any, are
    /// invoked in addition to resolving the handle.
    Future,
    /// The outcome is delivered to a required error callback and an optional result
    /// callback. Any returned handle is only a completion signal.
    Consumer,
}

impl Display for DispatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synchronous => write!(f, "SYNCHRONOUS"),
            Self::Future => write!(f, "FUTURE"),
            Self::Consumer => write!(f, "CONSUMER"),
        }
    }
}

/// One declared parameter of a callable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// A transportable value, named by its type
    Value(String),
    /// A callback receiving the successful result
    ResultCallback,
    /// A callback receiving the failure
    ErrorCallback,
}

impl ParamKind {
    /// A value parameter of the given type name
    pub fn value<T: Into<String>>(type_name: T) -> Self {
        Self::Value(type_name.into())
    }

    /// The transportable type name, if this is a value parameter
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Value(name) => Some(name),
            _ => None,
        }
    }
}

/// The declared return shape of a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// Nothing is returned
    Unit,
    /// A plain, transportable value
    Value,
    /// A future-typed handle
    Future,
}

/// Why a callable's shape could not be classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyErr {
    /// Result callbacks are declared without any error callback
    MissingErrorCallback {
        /// The number of result callbacks declared
        result_callbacks: usize,
    },
    /// More than one error callback is declared
    AmbiguousErrorCallbacks {
        /// The number of error callbacks declared
        error_callbacks: usize,
    },
}

impl std::error::Error for ClassifyErr {}

impl Display for ClassifyErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingErrorCallback { result_callbacks } => write!(
                f,
                "{result_callbacks} result callback(s) declared without an error callback"
            ),
            Self::AmbiguousErrorCallbacks { error_callbacks } => write!(
                f,
                "{error_callbacks} error callbacks declared, at most one is allowed"
            ),
        }
    }
}

impl From<ClassifyErr> for RelayErr {
    fn from(value: ClassifyErr) -> Self {
        RelayErr::configuration(value.to_string())
    }
}

/// Deduce the calling convention of a callable. Pure and total over its inputs.
///
/// * `returns`: The declared return shape
/// * `params`: The declared parameters, in order
/// * `explicit`: An explicit override, which always wins
pub fn classify(
    returns: ReturnShape,
    params: &[ParamKind],
    explicit: Option<DispatchType>,
) -> Result<DispatchType, ClassifyErr> {
    if let Some(dispatch) = explicit {
        return Ok(dispatch);
    }

    if returns == ReturnShape::Future {
        return Ok(DispatchType::Future);
    }

    let result_callbacks = params
        .iter()
        .filter(|p| matches!(p, ParamKind::ResultCallback))
        .count();
    let error_callbacks = params
        .iter()
        .filter(|p| matches!(p, ParamKind::ErrorCallback))
        .count();

    match (result_callbacks, error_callbacks) {
        (0, 0) => Ok(DispatchType::Synchronous),
        (_, 1) => Ok(DispatchType::Consumer),
        (result_callbacks, 0) => Err(ClassifyErr::MissingErrorCallback { result_callbacks }),
        (_, error_callbacks) => Err(ClassifyErr::AmbiguousErrorCallbacks { error_callbacks }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_return_is_future() {
        assert_eq!(
            Ok(DispatchType::Future),
            classify(ReturnShape::Future, &[ParamKind::value("i32")], None)
        );
        // a future return wins over callbacks
        assert_eq!(
            Ok(DispatchType::Future),
            classify(
                ReturnShape::Future,
                &[ParamKind::ResultCallback, ParamKind::ErrorCallback],
                None
            )
        );
    }

    #[test]
    fn plain_return_without_callbacks_is_synchronous() {
        assert_eq!(
            Ok(DispatchType::Synchronous),
            classify(ReturnShape::Value, &[ParamKind::value("String")], None)
        );
        assert_eq!(
            Ok(DispatchType::Synchronous),
            classify(ReturnShape::Unit, &[], None)
        );
    }

    #[test]
    fn one_error_callback_is_consumer() {
        assert_eq!(
            Ok(DispatchType::Consumer),
            classify(ReturnShape::Unit, &[ParamKind::ErrorCallback], None)
        );
        assert_eq!(
            Ok(DispatchType::Consumer),
            classify(
                ReturnShape::Value,
                &[
                    ParamKind::value("u64"),
                    ParamKind::ResultCallback,
                    ParamKind::ErrorCallback
                ],
                None
            )
        );
    }

    #[test]
    fn ambiguous_shapes_fail() {
        assert_eq!(
            Err(ClassifyErr::AmbiguousErrorCallbacks { error_callbacks: 2 }),
            classify(
                ReturnShape::Unit,
                &[ParamKind::ErrorCallback, ParamKind::ErrorCallback],
                None
            )
        );
        assert_eq!(
            Err(ClassifyErr::MissingErrorCallback {
                result_callbacks: 1
            }),
            classify(ReturnShape::Unit, &[ParamKind::ResultCallback], None)
        );
    }

    #[test]
    fn explicit_override_wins() {
        assert_eq!(
            Ok(DispatchType::Synchronous),
            classify(ReturnShape::Future, &[], Some(DispatchType::Synchronous))
        );
        assert_eq!(
            Ok(DispatchType::Future),
            classify(
                ReturnShape::Unit,
                &[ParamKind::ErrorCallback, ParamKind::ErrorCallback],
                Some(DispatchType::Future)
            )
        );
    }
}
