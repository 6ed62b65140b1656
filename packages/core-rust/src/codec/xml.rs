//! XML envelopes for the `query` and `ec2` protocols.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::Value;

use super::EnvelopeMeta;
use crate::fault::Fault;

type XmlWriter = Writer<Vec<u8>>;

fn open(writer: &mut XmlWriter, name: &str, xmlns: Option<&str>) -> anyhow::Result<()> {
    let mut start = BytesStart::new(name);
    if let Some(ns) = xmlns {
        start.push_attribute(("xmlns", ns));
    }
    writer.write_event(Event::Start(start))?;
    Ok(())
}

fn close(writer: &mut XmlWriter, name: &str) -> anyhow::Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> anyhow::Result<()> {
    open(writer, name, None)?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    close(writer, name)
}

/// Writes the children of a value: object fields become elements, list items
/// become `<{list_item}>` elements, scalars become text.
fn write_value(writer: &mut XmlWriter, value: &Value, list_item: &str) -> anyhow::Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Bool(b) => {
            writer.write_event(Event::Text(BytesText::new(if *b { "true" } else { "false" })))?;
            Ok(())
        }
        Value::Number(n) => {
            writer.write_event(Event::Text(BytesText::new(&n.to_string())))?;
            Ok(())
        }
        Value::String(s) => {
            writer.write_event(Event::Text(BytesText::new(s)))?;
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                open(writer, list_item, None)?;
                write_value(writer, item, list_item)?;
                close(writer, list_item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (name, child) in map {
                if child.is_null() {
                    continue;
                }
                open(writer, name, None)?;
                write_value(writer, child, list_item)?;
                close(writer, name)?;
            }
            Ok(())
        }
    }
}

pub(super) fn query_success(
    operation: &str,
    result: &Value,
    meta: &EnvelopeMeta,
) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    let root = format!("{operation}Response");
    open(&mut writer, &root, meta.xmlns.as_deref())?;
    if !result.is_null() {
        let wrapper = format!("{operation}Result");
        open(&mut writer, &wrapper, None)?;
        write_value(&mut writer, result, "member")?;
        close(&mut writer, &wrapper)?;
    }
    open(&mut writer, "ResponseMetadata", None)?;
    text_element(&mut writer, "RequestId", &meta.request_id)?;
    close(&mut writer, "ResponseMetadata")?;
    close(&mut writer, &root)?;
    Ok(writer.into_inner())
}

pub(super) fn query_fault(fault: &Fault, meta: &EnvelopeMeta) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    open(&mut writer, "ErrorResponse", meta.xmlns.as_deref())?;
    open(&mut writer, "Error", None)?;
    let kind = if fault.is_sender_fault() { "Sender" } else { "Receiver" };
    text_element(&mut writer, "Type", kind)?;
    text_element(&mut writer, "Code", &fault.code)?;
    text_element(&mut writer, "Message", &fault.message)?;
    close(&mut writer, "Error")?;
    text_element(&mut writer, "RequestId", &meta.request_id)?;
    close(&mut writer, "ErrorResponse")?;
    Ok(writer.into_inner())
}

pub(super) fn ec2_success(
    operation: &str,
    result: &Value,
    meta: &EnvelopeMeta,
) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    let root = format!("{operation}Response");
    open(&mut writer, &root, meta.xmlns.as_deref())?;
    text_element(&mut writer, "requestId", &meta.request_id)?;
    write_value(&mut writer, result, "item")?;
    close(&mut writer, &root)?;
    Ok(writer.into_inner())
}

pub(super) fn ec2_fault(fault: &Fault, meta: &EnvelopeMeta) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    open(&mut writer, "Response", None)?;
    open(&mut writer, "Errors", None)?;
    open(&mut writer, "Error", None)?;
    text_element(&mut writer, "Code", &fault.code)?;
    text_element(&mut writer, "Message", &fault.message)?;
    close(&mut writer, "Error")?;
    close(&mut writer, "Errors")?;
    text_element(&mut writer, "RequestID", &meta.request_id)?;
    close(&mut writer, "Response")?;
    Ok(writer.into_inner())
}
