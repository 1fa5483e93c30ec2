use log::debug;

use crate::{
    error::{ArgViolation, ViolationReason},
    types::{Arguments, ToolDef, json_type_name},
};

/// Check an argument map against a tool's declared parameters.
///
/// Every violation is collected: missing required parameters and type
/// mismatches in schema order first, then unexpected names in key order.
/// An explicit `null` counts as a value, so it fails the type check instead
/// of passing as "omitted".
pub fn validate(def: &ToolDef, args: &Arguments) -> Result<(), Vec<ArgViolation>> {
    let mut violations = Vec::new();

    for param in &def.params {
        match args.get(&param.name) {
            None if param.required => violations.push(ArgViolation {
                field: param.name.clone(),
                reason: ViolationReason::Missing,
            }),
            None => {}
            Some(value) if !param.ty.accepts(value) => violations.push(ArgViolation {
                field: param.name.clone(),
                reason: ViolationReason::WrongType {
                    expected: param.ty,
                    found: json_type_name(value).to_string(),
                },
            }),
            Some(_) => {}
        }
    }

    for key in args.keys() {
        if def.param(key).is_none() {
            violations.push(ArgViolation {
                field: key.clone(),
                reason: ViolationReason::Unexpected,
            });
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        debug!("{}: {} invalid argument(s)", def.name, violations.len());
        Err(violations)
    }
}
