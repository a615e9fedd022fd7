// Copyright (c) The Crate Authors
// SPDX-License-Identifier: Apache-2.0

//! The provider-function bridge: registers user-callable functions sourced
//! from provider schemas, with a placeholder stub substituted during
//! validation (§4.4, §4.5).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::EvalError;
use crate::value::marks::{MarkTable, Path};
use crate::value::{MarkedValue, Type, Value};

use super::{FunctionCallError, Provider};

#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: String,
    pub ty: Type,
    pub allow_null: bool,
    pub allow_unknown: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub params: Vec<FunctionParam>,
    pub variadic_param: Option<FunctionParam>,
    pub return_type: Type,
}

/// Names for which the provider boundary is allowed to re-mark the *result*
/// as sensitive even though arguments were stripped of marks before the
/// call — e.g. an `echo` function that is supposed to round-trip a sensitive
/// value transparently (§4.5, concrete scenario 5).
const RESULT_REMARK_WHITELIST: &[&str] = &["echo"];

/// Wraps a provider's declared functions into callables usable from the
/// expression evaluator. During validation, unresolved providers get a
/// dynamic placeholder instead of a real dispatch (§4.4).
pub struct FunctionBridge {
    provider: Option<Arc<dyn Provider>>,
    specs: BTreeMap<String, FunctionSpec>,
}

impl FunctionBridge {
    pub fn placeholder() -> Self {
        FunctionBridge {
            provider: None,
            specs: BTreeMap::new(),
        }
    }

    pub fn for_provider(provider: Arc<dyn Provider>, specs: BTreeMap<String, FunctionSpec>) -> Self {
        FunctionBridge {
            provider: Some(provider),
            specs,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.provider.is_none()
    }

    /// Calls `name(args)`. In placeholder mode, any arguments are accepted
    /// and an `unknown(dynamic)` is always returned (§4.4) without ever
    /// reaching `CallFunction`.
    pub async fn call(
        &self,
        name: &str,
        args: Vec<MarkedValue>,
    ) -> Result<MarkedValue, EvalError> {
        if self.is_placeholder() {
            return Ok(MarkedValue::unmarked(Value::Unknown(Type::Dynamic)));
        }
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| EvalError::FunctionNotFoundInProvider(name.to_string()))?;

        let remarks_result = RESULT_REMARK_WHITELIST.contains(&name);

        let mut bare_args = Vec::with_capacity(args.len());
        let mut combined_marks = MarkTable::new();
        for (index, arg) in args.into_iter().enumerate() {
            if !remarks_result {
                if let Err(path) = arg.marks_for_provider_boundary() {
                    return Err(EvalError::FunctionArgument {
                        name: name.to_string(),
                        index,
                        message: format!("sensitive value at {path} may not cross the provider boundary"),
                    });
                }
            }
            if let Some(param) = spec.params.get(index).or(spec.variadic_param.as_ref()) {
                if arg.value.is_null() && !param.allow_null {
                    return Err(EvalError::FunctionArgument {
                        name: name.to_string(),
                        index,
                        message: format!("parameter \"{}\" does not allow a null value", param.name),
                    });
                }
                if matches!(arg.value, Value::Unknown(_)) && !param.allow_unknown {
                    return Err(EvalError::FunctionArgument {
                        name: name.to_string(),
                        index,
                        message: format!("parameter \"{}\" does not allow an unknown value", param.name),
                    });
                }
            }
            let (value, marks) = arg.unmark_deep();
            combined_marks.extend(marks);
            bare_args.push(value);
        }

        let provider = self.provider.as_ref().expect("checked above");
        let result = provider
            .call_function(name, bare_args)
            .await
            .map_err(|e: FunctionCallError| EvalError::FunctionArgument {
                name: name.to_string(),
                index: e.argument_index.unwrap_or(usize::MAX),
                message: e.message,
            })?;

        if remarks_result {
            Ok(MarkedValue::mark_with_paths(result, combined_marks))
        } else {
            Ok(MarkedValue::unmarked(result))
        }
    }
}

/// Whether a mark table is empty at the given path — helper retained for
/// callers that only need to check the root path without building a full
/// `MarkedValue`.
pub fn is_marked_at(marks: &MarkTable, path: &Path) -> bool {
    marks.get(path).is_some_and(|set| !set.is_empty())
}
