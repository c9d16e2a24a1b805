use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BLOB_PATHS: &str = "blobPaths";
const SIGNED_URL_MAPPINGS: &str = "signedUrlMappings";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "blobPaths")]
struct BlobPaths {
    #[serde(rename = "blobPath", default)]
    entries: Vec<BlobPathEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobPathEntry {
    #[serde(rename = "@contentType", default)]
    content_type: String,
    #[serde(rename = "$text", default)]
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "signedUrlMappings")]
struct SignedUrlMappings {
    #[serde(rename = "signedUrlMapping", default)]
    entries: Vec<SignedUrlMapping>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedUrlMapping {
    #[serde(rename = "blobPath", default)]
    blob_path: String,
    #[serde(rename = "signedUrl", default)]
    signed_url: String,
}

/// Name of the document element, or `None` when the input is not XML.
fn root_element(data: &str) -> Option<String> {
    let mut reader = Reader::from_str(data);
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) | Ok(Event::Empty(start)) => {
                return Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Blob path → content type pairs of an upload authorization request.
/// Anything that is not a well-formed `<blobPaths>` document reads as empty.
pub fn read_blob_paths(data: &str) -> BTreeMap<String, String> {
    if root_element(data).as_deref() != Some(BLOB_PATHS) {
        return BTreeMap::new();
    }

    match quick_xml::de::from_str::<BlobPaths>(data) {
        Ok(paths) => paths
            .entries
            .into_iter()
            .filter(|entry| !entry.name.trim().is_empty())
            .map(|entry| (entry.name.trim().to_string(), entry.content_type))
            .collect(),
        Err(err) => {
            log::debug!("Ignoring malformed blob paths document: {err}");
            BTreeMap::new()
        }
    }
}

pub fn write_blob_paths(blob_paths: &BTreeMap<String, String>) -> String {
    let document = BlobPaths {
        entries: blob_paths
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, content_type)| BlobPathEntry {
                content_type: content_type.clone(),
                name: name.clone(),
            })
            .collect(),
    };
    quick_xml::se::to_string(&document).unwrap_or_else(|_| format!("<{BLOB_PATHS}/>"))
}

/// Blob path → signed URL pairs of an authorization response. Malformed
/// documents read as an empty mapping.
pub fn read_signed_url_mapping(data: &str) -> BTreeMap<String, String> {
    if root_element(data).as_deref() != Some(SIGNED_URL_MAPPINGS) {
        return BTreeMap::new();
    }

    match quick_xml::de::from_str::<SignedUrlMappings>(data) {
        Ok(mappings) => mappings
            .entries
            .into_iter()
            .map(|entry| (entry.blob_path.trim().to_string(), entry.signed_url.trim().to_string()))
            .collect(),
        Err(err) => {
            log::debug!("Ignoring malformed signed URL mapping: {err}");
            BTreeMap::new()
        }
    }
}

pub fn write_signed_url_mapping(data: &BTreeMap<String, String>) -> String {
    let document = SignedUrlMappings {
        entries: data
            .iter()
            .map(|(blob_path, signed_url)| SignedUrlMapping {
                blob_path: blob_path.clone(),
                signed_url: signed_url.clone(),
            })
            .collect(),
    };
    quick_xml::se::to_string(&document).unwrap_or_else(|_| format!("<{SIGNED_URL_MAPPINGS}/>"))
}
