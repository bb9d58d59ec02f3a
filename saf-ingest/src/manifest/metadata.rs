//! Metadata XML codec (`dublin_core.xml`, `metadata_<schema>.xml`)

use crate::error::{IngestError, IngestResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::escape::escape;
use quick_xml::Reader;
use saf_common::model::{MetadataValue, DEFAULT_SCHEMA};
use std::path::{Path, PathBuf};

use super::DUBLIN_CORE_FILE;

const LOCAL_SCHEMA_PREFIX: &str = "metadata_";
const XML_SUFFIX: &str = ".xml";

/// Whether a file name is a local-schema metadata file
pub fn is_schema_file(name: &str) -> bool {
    name.starts_with(LOCAL_SCHEMA_PREFIX) && name.ends_with(XML_SUFFIX)
}

/// File a schema's values are written to
pub fn metadata_file_name(schema: &str) -> String {
    if schema == DEFAULT_SCHEMA {
        DUBLIN_CORE_FILE.to_string()
    } else {
        format!("{}{}{}", LOCAL_SCHEMA_PREFIX, schema, XML_SUFFIX)
    }
}

/// Metadata files of an item folder: `dublin_core.xml` first, then local
/// schema files in name order
pub fn metadata_files(item_dir: &Path) -> IngestResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let dublin_core = item_dir.join(DUBLIN_CORE_FILE);
    if dublin_core.is_file() {
        files.push(dublin_core);
    }

    let mut local = Vec::new();
    for entry in std::fs::read_dir(item_dir)? {
        let entry = entry?;
        if is_schema_file(&entry.file_name().to_string_lossy()) && entry.path().is_file() {
            local.push(entry.path());
        }
    }
    local.sort();
    files.extend(local);
    Ok(files)
}

/// All metadata values declared in an item folder
pub fn parse_metadata(item_dir: &Path) -> IngestResult<Vec<MetadataValue>> {
    let mut values = Vec::new();
    for file in metadata_files(item_dir)? {
        values.extend(parse_metadata_file(&file)?);
    }
    Ok(values)
}

pub fn parse_metadata_file(path: &Path) -> IngestResult<Vec<MetadataValue>> {
    let content = std::fs::read_to_string(path)?;
    parse_metadata_xml(&content).map_err(|reason| IngestError::manifest(path, reason))
}

struct OpenValue {
    element: String,
    qualifier: Option<String>,
    language: Option<String>,
    text: String,
}

/// Parse one `<dublin_core schema="..">` document
pub fn parse_metadata_xml(xml: &str) -> Result<Vec<MetadataValue>, String> {
    let mut reader = Reader::from_str(xml);
    let mut schema = DEFAULT_SCHEMA.to_string();
    let mut open: Option<OpenValue> = None;
    let mut values = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"dublin_core" => {
                if let Some(s) = attribute(&e, b"schema")?.filter(|s| !s.is_empty()) {
                    schema = s;
                }
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"dcvalue" => {
                open = Some(open_value(&e)?);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"dcvalue" => {
                let value = open_value(&e)?;
                values.push(close_value(&schema, value));
            }
            Ok(Event::Text(t)) => {
                if let Some(value) = open.as_mut() {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    value.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(value) = open.as_mut() {
                    value.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"dcvalue" => {
                if let Some(value) = open.take() {
                    values.push(close_value(&schema, value));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    Ok(values)
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    match e.try_get_attribute(name).map_err(|e| e.to_string())? {
        Some(attr) => Ok(Some(
            attr.unescape_value().map_err(|e| e.to_string())?.into_owned(),
        )),
        None => Ok(None),
    }
}

fn open_value(e: &BytesStart<'_>) -> Result<OpenValue, String> {
    let element = attribute(e, b"element")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "dcvalue without element attribute".to_string())?;
    let qualifier = attribute(e, b"qualifier")?.filter(|q| !q.is_empty() && q != "none");
    let language = attribute(e, b"language")?
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());

    Ok(OpenValue {
        element,
        qualifier,
        language,
        text: String::new(),
    })
}

fn close_value(schema: &str, value: OpenValue) -> MetadataValue {
    MetadataValue {
        schema: schema.to_string(),
        element: value.element,
        qualifier: value.qualifier,
        language: value.language,
        value: value.text.trim().to_string(),
    }
}

/// Render the values of one schema as a metadata document
pub fn write_metadata_xml(schema: &str, values: &[&MetadataValue]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\"?>\n");
    out.push_str(&format!("<dublin_core schema=\"{}\">\n", escape(schema)));
    for value in values {
        out.push_str(&format!(
            "  <dcvalue element=\"{}\" qualifier=\"{}\"",
            escape(value.element.as_str()),
            escape(value.qualifier.as_deref().unwrap_or("none"))
        ));
        if let Some(language) = &value.language {
            out.push_str(&format!(" language=\"{}\"", escape(language.as_str())));
        }
        out.push_str(&format!(">{}</dcvalue>\n", escape(value.value.as_str())));
    }
    out.push_str("</dublin_core>\n");
    out
}
