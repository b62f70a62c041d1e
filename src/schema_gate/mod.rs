//! JSON Schema (Draft-07) validation gate for plan documents. Used at the
//! entry of Create and after Merge — never before Merge, since a merge may
//! legitimately introduce a required field that was absent from the partial
//! update on its own.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// The fixed plan-document schema. Required top-level fields and the
/// nested shapes mirror the index mapping declared in §4.6.
pub fn plan_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "PlanDocument",
        "type": "object",
        "required": ["planCostShares", "linkedPlanServices", "_org", "objectId", "objectType", "planType", "creationDate"],
        "properties": {
            "objectId": { "type": "string" },
            "objectType": { "type": "string" },
            "_org": { "type": "string" },
            "planType": { "type": "string" },
            "creationDate": { "type": "string" },
            "planCostShares": {
                "type": "object",
                "required": ["objectId", "objectType", "_org", "deductible", "copay"],
                "properties": {
                    "objectId": { "type": "string" },
                    "objectType": { "type": "string" },
                    "_org": { "type": "string" },
                    "deductible": { "type": "integer" },
                    "copay": { "type": "integer" }
                }
            },
            "linkedPlanServices": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["objectId", "objectType", "_org", "linkedService", "planserviceCostShares"],
                    "properties": {
                        "objectId": { "type": "string" },
                        "objectType": { "type": "string" },
                        "_org": { "type": "string" },
                        "linkedService": {
                            "type": "object",
                            "required": ["objectId", "objectType", "_org", "name"],
                            "properties": {
                                "objectId": { "type": "string" },
                                "objectType": { "type": "string" },
                                "_org": { "type": "string" },
                                "name": { "type": "string" }
                            }
                        },
                        "planserviceCostShares": {
                            "type": "object",
                            "required": ["objectId", "objectType", "_org", "deductible", "copay"],
                            "properties": {
                                "objectId": { "type": "string" },
                                "objectType": { "type": "string" },
                                "_org": { "type": "string" },
                                "deductible": { "type": "integer" },
                                "copay": { "type": "integer" }
                            }
                        }
                    }
                }
            }
        }
    })
}

static COMPILED: Lazy<JSONSchema> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .compile(&PLAN_SCHEMA_VALUE)
        .expect("the fixed plan schema is valid Draft-07")
});

static PLAN_SCHEMA_VALUE: Lazy<Value> = Lazy::new(plan_schema);

/// Validates `document` against the fixed plan schema, returning a
/// `SchemaValidation` error describing every violation found.
pub fn validate(document: &Value) -> Result<()> {
    let result = COMPILED.validate(document);
    if let Err(errors) = result {
        let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(Error::SchemaValidation { message });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_plan() -> Value {
        json!({
            "objectId": "p1",
            "objectType": "plan",
            "_org": "o",
            "planType": "g",
            "creationDate": "2026-01-01",
            "planCostShares": { "objectId": "cs1", "objectType": "ms", "_org": "o", "deductible": 0, "copay": 0 },
            "linkedPlanServices": []
        })
    }

    #[test]
    fn accepts_a_valid_document() {
        assert!(validate(&valid_plan()).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut doc = valid_plan();
        doc.as_object_mut().unwrap().remove("creationDate");
        assert!(validate(&doc).is_err());
    }
}
