//! Signed duotone image URLs for group results.
//!
//! The table is computed once at startup from the secret salt and the
//! configured color pairs, and is only read afterwards.

use crate::config::DuotoneConfig;
use crate::response::QueryResponse;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const SMALL_SIZE: &str = "rx500x500";
const LARGE_SIZE: &str = "rx1100x800";

/// Signed URL roots for one color pair; a photo id completes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuotoneRoots {
    pub small: String,
    pub large: String,
}

#[derive(Debug, Default)]
pub struct DuotoneTable {
    roots: HashMap<String, DuotoneRoots>,
}

impl DuotoneTable {
    pub fn new(salt: &str, base_url: &Url, pairs: &[(String, String)]) -> Self {
        let base = base_url.as_str().trim_end_matches('/');

        let roots = pairs
            .iter()
            .map(|(light, dark)| {
                let reference = duotone_ref(light, dark);
                let signature = sign(salt, &reference);
                let root = |size: &str| format!("{base}/{size}/{reference}/sg{signature}");
                let roots = DuotoneRoots {
                    small: root(SMALL_SIZE),
                    large: root(LARGE_SIZE),
                };
                (reference, roots)
            })
            .collect();

        Self { roots }
    }

    pub fn from_config(config: &DuotoneConfig) -> Self {
        Self::new(&config.salt, &config.base_url, &config.pairs)
    }

    pub fn get(&self, reference: &str) -> Option<&DuotoneRoots> {
        self.roots.get(reference)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// `("#FF0000", "00ff00")` -> `dheff0000x00ff00`
pub fn duotone_ref(light: &str, dark: &str) -> String {
    format!(
        "dhe{}x{}",
        light.trim_start_matches('#').to_ascii_lowercase(),
        dark.trim_start_matches('#').to_ascii_lowercase()
    )
}

fn sign(salt: &str, reference: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC can take key of any size");
    mac.update(reference.as_bytes());
    let mut signature = hex::encode(mac.finalize().into_bytes());
    signature.truncate(10);
    signature
}

/// Decorates successful group-shaped results with duotone URLs.
#[derive(Clone)]
pub struct ResponseAugmenter {
    table: Arc<DuotoneTable>,
}

impl ResponseAugmenter {
    pub fn new(table: Arc<DuotoneTable>) -> Self {
        Self { table }
    }

    pub fn augment(&self, response: &mut QueryResponse) {
        if !response.is_success() {
            return;
        }

        match response.r#type.as_str() {
            "group" => match &mut response.value {
                Value::Array(groups) => {
                    for group in groups.iter_mut().filter_map(Value::as_object_mut) {
                        self.augment_group(group);
                    }
                }
                Value::Object(group) => self.augment_group(group),
                _ => {}
            },
            "home" => {
                let rows = response
                    .value
                    .get_mut("rows")
                    .and_then(Value::as_array_mut)
                    .into_iter()
                    .flatten();
                for row in rows {
                    let items = row
                        .get_mut("items")
                        .and_then(Value::as_array_mut)
                        .into_iter()
                        .flatten()
                        .filter_map(Value::as_object_mut)
                        .filter(|item| item.get("type").and_then(Value::as_str) == Some("group"));
                    for item in items {
                        self.augment_group(item);
                    }
                }
            }
            _ => {}
        }
    }

    fn augment_group(&self, group: &mut Map<String, Value>) {
        let Some(photo_id) = ["key_photo", "photo"]
            .iter()
            .find_map(|field| group.get(*field)?.get("id").and_then(photo_id))
        else {
            return;
        };

        let Some(gradient) = group.get("photo_gradient") else {
            return;
        };
        let (Some(light), Some(dark)) = (
            gradient.get("light_color").and_then(Value::as_str),
            gradient.get("dark_color").and_then(Value::as_str),
        ) else {
            return;
        };

        let Some(roots) = self.table.get(&duotone_ref(light, dark)) else {
            return;
        };

        let urls = json!({
            "small": format!("{}/{photo_id}.jpeg", roots.small),
            "large": format!("{}/{photo_id}.jpeg", roots.large),
        });
        group.insert("duotoneUrl".to_string(), urls);
    }
}

fn photo_id(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
