//! Device configuration files of one manufacturer folder.

use crate::error::{DedupError, Result};
use crate::jsonc::{self, Comments};
use colored::Colorize;
use globset::GlobSet;
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

pub const PARAMS: &str = "paramInformation";
pub const IMPORT: &str = "$import";
pub const PARAM_NO: &str = "#";

/// Top-level keys in the order device files are written with.
const KEY_ORDER: &[&str] = &[
    "manufacturer",
    "manufacturerId",
    "label",
    "description",
    "devices",
    "firmwareVersion",
    "endpoints",
    "associations",
    PARAMS,
    "proprietary",
    "compat",
    "metadata",
];

#[derive(Debug, Clone)]
pub struct Device {
    pub path: PathBuf,
    pub doc: Value,
    pub comments: Comments,
    /// Set once a parameter was rewritten; only changed devices are written back.
    pub changed: bool,
}

impl Device {
    pub fn new(path: impl Into<PathBuf>, doc: Value) -> Self {
        Self {
            path: path.into(),
            doc,
            comments: Comments::default(),
            changed: false,
        }
    }

    pub fn with_comments(mut self, comments: Comments) -> Self {
        self.comments = comments;
        self
    }

    pub fn label(&self) -> &str {
        self.doc.get("label").and_then(Value::as_str).unwrap_or("<unnamed>")
    }

    pub fn has_params(&self) -> bool {
        matches!(self.doc.get(PARAMS), Some(Value::Object(_)) | Some(Value::Array(_)))
    }

    /// Parameter keys in document order. In array form the key is the `#` member.
    pub fn param_keys(&self) -> Vec<String> {
        match self.doc.get(PARAMS) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(entries)) => entries.iter().filter_map(array_key).collect(),
            _ => Vec::new(),
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        match self.doc.get(PARAMS)? {
            Value::Object(map) => map.get(key),
            Value::Array(entries) => entries
                .iter()
                .find(|entry| array_key(entry).as_deref() == Some(key)),
            _ => None,
        }
    }

    /// Replace a parameter in place, keeping its position.
    pub fn set_param(&mut self, key: &str, value: Value) {
        let slot = match self.doc.get_mut(PARAMS) {
            Some(Value::Object(map)) => map.get_mut(key),
            Some(Value::Array(entries)) => entries
                .iter_mut()
                .find(|entry| array_key(entry).as_deref() == Some(key)),
            _ => None,
        };
        if let Some(slot) = slot {
            *slot = value;
            self.changed = true;
        }
    }
}

fn array_key(entry: &Value) -> Option<String> {
    match entry.get(PARAM_NO)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn is_import(param: &Value) -> bool {
    param.get(IMPORT).is_some()
}

/// The value that replaces a templated parameter. Array entries keep their `#`.
pub fn import_ref(existing: &Value, reference: &str) -> Value {
    let mut map = Map::new();
    if let Some(no) = existing.get(PARAM_NO) {
        map.insert(PARAM_NO.to_string(), no.clone());
    }
    map.insert(IMPORT.to_string(), Value::String(reference.to_string()));
    Value::Object(map)
}

/// A parameter definition as it is stored in a template: without its `#`.
pub fn template_body(param: &Value) -> Value {
    let mut body = param.clone();
    if let Some(map) = body.as_object_mut() {
        map.shift_remove(PARAM_NO);
    }
    body
}

/// Split a parameter key like `3[0xff00]` into number and bitmask.
pub fn parse_param_key(key: &str) -> Option<(u32, Option<u32>)> {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_RE.get_or_init(|| {
        Regex::new(r"^(\d+)(?:\[0x([0-9a-fA-F]+)\])?$").expect("parameter key pattern")
    });

    let caps = re.captures(key.trim())?;
    let number = caps.get(1)?.as_str().parse().ok()?;
    let mask = match caps.get(2) {
        Some(m) => Some(u32::from_str_radix(m.as_str(), 16).ok()?),
        None => None,
    };
    Some((number, mask))
}

fn param_order(key: Option<&str>) -> (u32, u32, u32) {
    match key.and_then(parse_param_key) {
        Some((number, mask)) => (0, number, mask.unwrap_or(0)),
        None => (1, 0, 0),
    }
}

/// Canonical key order for a device document; parameters sorted by number and mask.
pub fn normalize(doc: &Value) -> Value {
    let Some(obj) = doc.as_object() else {
        return doc.clone();
    };

    let mut out = Map::new();
    for key in KEY_ORDER {
        if let Some(value) = obj.get(*key) {
            out.insert((*key).to_string(), value.clone());
        }
    }
    for (key, value) in obj {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }

    if let Some(params) = out.get_mut(PARAMS) {
        match params {
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> =
                    std::mem::take(map).into_iter().collect();
                entries.sort_by_key(|(key, _)| param_order(Some(key.as_str())));
                map.extend(entries);
            }
            Value::Array(entries) => {
                entries.sort_by_key(|entry| param_order(array_key(entry).as_deref()));
            }
            _ => {}
        }
    }

    Value::Object(out)
}

/// All parameterized devices of one manufacturer folder.
#[derive(Debug)]
pub struct DeviceSet {
    pub dir: PathBuf,
    pub template_name: String,
    pub devices: Vec<Device>,
    pub failed: usize,
    pub template_comments: Comments,
}

impl DeviceSet {
    pub fn load(dir: &Path, template_name: &str, excludes: &GlobSet) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DedupError::MissingFolder(dir.to_path_buf()));
        }

        let templates_dir = dir.join("templates");
        let mut builder = WalkBuilder::new(dir);
        builder.hidden(true).git_ignore(true).git_global(true);

        let mut paths: Vec<PathBuf> = builder
            .build()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter(|path| !path.starts_with(&templates_dir))
            .filter(|path| {
                let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
                !excludes.is_match(rel)
            })
            .collect();
        paths.sort();

        let mut devices = Vec::new();
        let mut failed = 0;
        for path in paths {
            match jsonc::read_document(&path) {
                Ok((doc, comments)) => devices.push(Device::new(path, doc).with_comments(comments)),
                Err(e) => {
                    println!("{} {} - {}", "Error processing:".red(), path.display(), e);
                    failed += 1;
                }
            }
        }

        let total = devices.len();
        devices.retain(|device| {
            let keep = device.has_params();
            if !keep {
                debug!(path = %device.path.display(), "no parameters, skipping");
            }
            keep
        });
        let commented = devices.iter().filter(|device| !device.comments.is_empty()).count();
        info!(
            folder = %dir.display(),
            parsed = total,
            with_params = devices.len(),
            commented,
            failed,
            "loaded device files"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            template_name: template_name.to_string(),
            devices,
            failed,
            template_comments: Comments::default(),
        })
    }

    pub fn template_path(&self) -> PathBuf {
        self.dir.join("templates").join(&self.template_name)
    }

    /// The `$import` value pointing at an entry of the manufacturer template.
    pub fn template_reference(&self, name: &str) -> String {
        format!("templates/{}#{}", self.template_name, name)
    }

    /// Load the manufacturer template, or start an empty one.
    pub fn load_template(&mut self) -> Result<Map<String, Value>> {
        let path = self.template_path();
        if !path.exists() {
            return Ok(Map::new());
        }
        match jsonc::read_document(&path)? {
            (Value::Object(map), comments) => {
                self.template_comments = comments;
                Ok(map)
            }
            _ => Err(DedupError::TemplateNotObject(path)),
        }
    }

    /// Write the manufacturer template and every changed device file.
    ///
    /// Changed devices are normalized on the way out. Comments stay in front
    /// of the members they were written for.
    pub fn write(&self, template: &Map<String, Value>) -> Result<()> {
        fs::create_dir_all(self.dir.join("templates"))?;
        jsonc::write(
            &self.template_path(),
            &Value::Object(template.clone()),
            &self.template_comments,
        )?;

        let mut written = 0;
        for device in self.devices.iter().filter(|device| device.changed) {
            jsonc::write(&device.path, &normalize(&device.doc), &device.comments)?;
            written += 1;
        }
        debug!(written, unchanged = self.devices.len() - written, "wrote device files");
        Ok(())
    }
}
