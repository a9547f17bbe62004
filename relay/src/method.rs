// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Registration-time method table
//!
//! Every callable is registered once with its declared [MethodSignature] and
//! [RoutingStrategy]. The [MethodTableBuilder] classifies each one (see
//! [crate::dispatch::classify]) and fails the whole build on the first callable which
//! can't be classified, so an ambiguous shape is fatal to startup rather than to a call.
//! After that, lookups are by plain [MethodKey].

use std::collections::HashMap;
use std::fmt::Display;

use crate::dispatch::{classify, ParamKind, ReturnShape};
use crate::invocation::Invocation;
use crate::routing::RoutingStrategy;
use crate::{DispatchType, RelayErr};

/// The identity of a callable: the hosting type plus the method name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// The hosting type
    pub type_name: String,
    /// The method name
    pub method: String,
}

impl MethodKey {
    /// Create a new key
    pub fn new<T: Into<String>, M: Into<String>>(type_name: T, method: M) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.type_name, self.method)
    }
}

/// The declared shape of a callable
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    key: MethodKey,
    name: String,
    params: Vec<ParamKind>,
    returns: ReturnShape,
    explicit: Option<DispatchType>,
}

impl MethodSignature {
    /// Start a signature with no parameters and a unit return
    pub fn new<T: Into<String>, M: Into<String>>(type_name: T, method: M) -> Self {
        Self {
            key: MethodKey::new(type_name, method),
            name: String::new(),
            params: Vec::new(),
            returns: ReturnShape::Unit,
            explicit: None,
        }
    }

    /// Address a named service of the type
    pub fn named<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Append a parameter
    pub fn param(mut self, param: ParamKind) -> Self {
        self.params.push(param);
        self
    }

    /// Set the return shape
    pub fn returns(mut self, returns: ReturnShape) -> Self {
        self.returns = returns;
        self
    }

    /// Explicitly declare the calling convention, bypassing deduction
    pub fn dispatch(mut self, dispatch: DispatchType) -> Self {
        self.explicit = Some(dispatch);
        self
    }

    /// The callable's key
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// The declared parameters
    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }
}

/// A registered, validated callable
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    signature: MethodSignature,
    dispatch: DispatchType,
    strategy: RoutingStrategy,
}

impl MethodDescriptor {
    /// The callable's key
    pub fn key(&self) -> &MethodKey {
        &self.signature.key
    }

    /// The classified calling convention
    pub fn dispatch(&self) -> DispatchType {
        self.dispatch
    }

    /// The routing strategy
    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// The type names of the value parameters, in order
    pub fn parameter_types(&self) -> Vec<String> {
        self.signature
            .params
            .iter()
            .filter_map(|p| p.type_name().map(String::from))
            .collect()
    }

    /// The number of result callbacks the signature declares
    pub fn result_callbacks(&self) -> u32 {
        self.signature
            .params
            .iter()
            .filter(|p| matches!(p, ParamKind::ResultCallback))
            .count() as u32
    }

    /// Build an invocation of this callable
    ///
    /// * `arguments`: One serialized argument per value parameter, in order
    pub fn invocation(&self, arguments: Vec<Vec<u8>>) -> Result<Invocation, RelayErr> {
        let parameters = self.parameter_types();
        if parameters.len() != arguments.len() {
            return Err(RelayErr::configuration(format!(
                "{} expects {} argument(s), got {}",
                self.signature.key,
                parameters.len(),
                arguments.len()
            )));
        }
        Ok(Invocation {
            type_name: self.signature.key.type_name.clone(),
            name: self.signature.name.clone(),
            method: self.signature.key.method.clone(),
            parameters,
            arguments,
            dispatch: self.dispatch,
            strategy: self.strategy,
            result_consumers: self.result_callbacks(),
        })
    }
}

/// The validated set of registered callables
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<MethodKey, MethodDescriptor>,
}

impl MethodTable {
    /// Start registering callables
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    /// Look up a registered callable
    pub fn lookup(&self, type_name: &str, method: &str) -> Option<&MethodDescriptor> {
        self.get(&MethodKey::new(type_name, method))
    }

    /// Look up a registered callable by key
    pub fn get(&self, key: &MethodKey) -> Option<&MethodDescriptor> {
        self.methods.get(key)
    }

    /// The number of registered callables
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterate the registered callables
    pub fn iter(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }
}

/// Collects registrations and validates them all at once
#[derive(Debug, Default)]
pub struct MethodTableBuilder {
    registrations: Vec<(MethodSignature, RoutingStrategy)>,
}

impl MethodTableBuilder {
    /// Register a callable
    pub fn register(mut self, signature: MethodSignature, strategy: RoutingStrategy) -> Self {
        self.registrations.push((signature, strategy));
        self
    }

    /// Classify and validate every registration. The first failure aborts the build
    /// with a [crate::ErrorKind::Configuration] error naming the callable.
    pub fn build(self) -> Result<MethodTable, RelayErr> {
        let mut methods = HashMap::with_capacity(self.registrations.len());
        for (signature, strategy) in self.registrations {
            let dispatch = classify(signature.returns, &signature.params, signature.explicit)
                .map_err(|err| {
                    RelayErr::configuration(format!("{}: {err}", signature.key))
                })?;
            let key = signature.key.clone();
            if methods.contains_key(&key) {
                return Err(RelayErr::configuration(format!(
                    "{key} is registered more than once"
                )));
            }
            log::debug!("Registered {key} as {dispatch} / {strategy}");
            methods.insert(
                key,
                MethodDescriptor {
                    signature,
                    dispatch,
                    strategy,
                },
            );
        }
        Ok(MethodTable { methods })
    }
}
