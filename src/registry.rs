//! Helper functions a runner makes callable from every kernel it builds.

use std::collections::BTreeMap;

use crate::error::{ArgumentError, Result};
use crate::function::{Function, ValueType};

/// A registered helper with its declared signature.
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub function: Function,
    pub param_types: Vec<ValueType>,
    pub return_type: ValueType,
}

/// Name → helper map owned by a runner. Names are unique; re-adding a name
/// replaces the earlier definition for kernels built afterwards.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function`.
    ///
    /// Parameter types default to [`ValueType::Number`] for each of the
    /// function's parameters, the return type to `Number`.
    pub fn add(
        &mut self,
        function: Function,
        param_types: Option<Vec<ValueType>>,
        return_type: Option<ValueType>,
    ) -> Result<()> {
        let param_types = param_types.unwrap_or_else(|| vec![ValueType::Number; function.arity()]);
        if param_types.len() != function.arity() {
            return Err(ArgumentError::ParamTypeCount {
                name: function.name().to_owned(),
                expected: function.arity(),
                got: param_types.len(),
            }
            .into());
        }

        log::debug!("registering helper `{}`", function.name());
        self.functions.insert(
            function.name().to_owned(),
            RegisteredFunction {
                function,
                param_types,
                return_type: return_type.unwrap_or_default(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered helpers in name order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFunction> {
        self.functions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_default_per_parameter() {
        let mut registry = FunctionRegistry::new();
        registry
            .add(Function::new("mad", 3, |a| a[0] * a[1] + a[2]), None, None)
            .unwrap();
        let entry = registry.get("mad").unwrap();
        assert_eq!(entry.param_types, vec![ValueType::Number; 3]);
        assert_eq!(entry.return_type, ValueType::Number);
    }

    #[test]
    fn wrong_type_count_is_rejected() {
        let mut registry = FunctionRegistry::new();
        let err = registry
            .add(
                Function::new("neg", 1, |a| -a[0]),
                Some(vec![ValueType::Number, ValueType::Integer]),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Argument(ArgumentError::ParamTypeCount { .. })
        ));
        assert!(registry.is_empty());
    }
}
