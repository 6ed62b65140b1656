//! JSON envelopes for the `json` and `rest-json` protocols.

use serde_json::{json, Value};

use crate::fault::Fault;

pub(super) fn success(result: &Value) -> anyhow::Result<Vec<u8>> {
    let body = match result {
        Value::Null => b"{}".to_vec(),
        other => serde_json::to_vec(other)?,
    };
    Ok(body)
}

pub(super) fn json_fault(fault: &Fault) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&json!({
        "__type": fault.code,
        "message": fault.message,
    }))?)
}

pub(super) fn rest_fault(fault: &Fault) -> anyhow::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&json!({ "message": fault.message }))?)
}
