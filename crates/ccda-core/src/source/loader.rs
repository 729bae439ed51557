//! XML loading into a [`SourceTree`]

use super::tree::{Attribute, QName, SourceTree, TreeBuilder};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Failure to turn raw bytes into a source tree
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("document has no root element")]
    Empty,

    #[error("invalid element structure: {0}")]
    Structure(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceTree {
    /// Parse an XML document held in memory
    pub fn parse_str(xml: &str) -> Result<Self, SourceError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut builder = TreeBuilder::new();
        loop {
            let position = reader.buffer_position() as u64;
            let (namespace, event) = reader
                .read_resolved_event()
                .map_err(|e| malformed(position, e))?;
            let namespace = owned_namespace(namespace, position)?;

            match event {
                Event::Start(start) => {
                    let (name, attributes) = element(&reader, &start, namespace, position)?;
                    builder.open(name, attributes)?;
                }
                Event::Empty(start) => {
                    let (name, attributes) = element(&reader, &start, namespace, position)?;
                    builder.open(name, attributes)?;
                    builder.close()?;
                }
                Event::End(_) => builder.close()?,
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| malformed(position, e))?;
                    builder.text(&text);
                }
                Event::CData(data) => {
                    builder.text(&String::from_utf8_lossy(&data.into_inner()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let tree = builder.finish()?;
        debug!("Parsed source tree with {} elements", tree.len());
        Ok(tree)
    }

    /// Read and parse an XML document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }
}

fn malformed(position: u64, error: impl std::fmt::Display) -> SourceError {
    SourceError::Malformed {
        position,
        message: error.to_string(),
    }
}

fn owned_namespace(result: ResolveResult<'_>, position: u64) -> Result<Option<String>, SourceError> {
    match result {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.as_ref()).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(SourceError::Malformed {
            position,
            message: format!(
                "undeclared namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            ),
        }),
    }
}

fn element(
    reader: &NsReader<&[u8]>,
    start: &BytesStart<'_>,
    namespace: Option<String>,
    position: u64,
) -> Result<(QName, Vec<Attribute>), SourceError> {
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let name = QName { namespace, local };

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(position, e))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = owned_namespace(resolved, position)?;
        let value = attr.unescape_value().map_err(|e| malformed(position, e))?;
        attributes.push(Attribute {
            name: QName {
                namespace,
                local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            },
            value: value.into_owned(),
        });
    }

    Ok((name, attributes))
}
