//! The templating pass: walks every parameter, offers similar ones for
//! review and rewrites accepted ones into `$import` references.

use crate::device::{import_ref, is_import, template_body, DeviceSet};
use crate::error::{DedupError, Result};
use crate::jsonc;
use crate::review::{Candidate, Decision, Reviewer};
use crate::similarity::{classify, find_master_entry, values_equal, SignatureIndex};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Shared template of generic parameter definitions.
#[derive(Debug, Clone)]
pub struct MasterTemplate {
    /// Import path prefix, e.g. `~/templates/master_template.json`.
    pub reference: String,
    pub entries: Map<String, Value>,
}

impl MasterTemplate {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = match jsonc::read(path)? {
            Value::Object(map) => map,
            _ => return Err(DedupError::TemplateNotObject(path.to_path_buf())),
        };
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            reference: format!("~/templates/{}", file_name),
            entries,
        })
    }

    pub fn reference_for(&self, name: &str) -> String {
        format!("{}#{}", self.reference, name)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub file: String,
    pub device: String,
    pub param: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Default)]
pub struct Outcome {
    /// Parameter groups that ended up sharing one reference.
    pub groups: usize,
    /// Parameters rewritten to `$import`, base parameters included.
    pub replaced: usize,
    pub master_refs: usize,
    pub follow_ups: Vec<FollowUp>,
    pub quit_early: bool,
}

pub struct TemplateSession {
    pub set: DeviceSet,
    pub template: Map<String, Value>,
    master: Option<MasterTemplate>,
    fuzzy: Option<f64>,
}

impl TemplateSession {
    pub fn new(
        set: DeviceSet,
        template: Map<String, Value>,
        master: Option<MasterTemplate>,
        fuzzy: Option<f64>,
    ) -> Self {
        Self { set, template, master, fuzzy }
    }

    pub fn run<R: Reviewer>(&mut self, reviewer: &mut R) -> Result<Outcome> {
        let index = SignatureIndex::build(&self.set.devices);
        if index.is_empty() {
            debug!("no parameters left to compare");
        } else {
            debug!(buckets = index.len(), "built signature index");
        }

        let mut outcome = Outcome::default();
        let mut group_num = 0;

        for d in 0..self.set.devices.len() {
            for key in self.set.devices[d].param_keys() {
                let base = match self.set.devices[d].param(&key) {
                    Some(param) if !is_import(param) => param.clone(),
                    _ => continue,
                };

                let mut reference: Option<String> = None;
                for loc in index.candidates(&base) {
                    if loc.device == d {
                        continue;
                    }

                    let decision = {
                        let base_dev = &self.set.devices[d];
                        let test_dev = &self.set.devices[loc.device];
                        let Some(test) = test_dev.param(&loc.key) else { continue };
                        if is_import(test) {
                            continue;
                        }
                        let Some(similarity) = classify(&key, &base, &loc.key, test, self.fuzzy)
                        else {
                            continue;
                        };

                        reviewer.review_match(&Candidate {
                            base_label: base_dev.label(),
                            base_path: &base_dev.path,
                            base_key: &key,
                            base: &base,
                            test_label: test_dev.label(),
                            test_path: &test_dev.path,
                            test_key: &loc.key,
                            test,
                            similarity,
                        })?
                    };

                    match decision {
                        Decision::Accept => {}
                        Decision::Reject => continue,
                        Decision::FollowUp => {
                            let item = self.follow_up(loc.device, &loc.key);
                            let known = outcome
                                .follow_ups
                                .iter()
                                .any(|f| f.file == item.file && f.param == item.param);
                            if !known {
                                outcome.follow_ups.push(item);
                            }
                            continue;
                        }
                        Decision::SaveAndQuit => {
                            outcome.quit_early = true;
                            break;
                        }
                    }

                    if reference.is_none() {
                        reference = self.establish_reference(&base, reviewer, &mut outcome)?;
                        if reference.is_none() {
                            outcome.quit_early = true;
                            break;
                        }
                    }
                    if let Some(target) = reference.as_deref() {
                        self.replace(loc.device, &loc.key, target);
                        outcome.replaced += 1;
                    }
                }

                debug!(group = group_num, "finished group");
                if let Some(reference) = reference {
                    self.replace(d, &key, &reference);
                    outcome.replaced += 1;
                    outcome.groups += 1;
                }
                group_num += 1;

                // candidates accepted before a quit still form a group
                if outcome.quit_early {
                    return Ok(outcome);
                }
            }
            info!(device = self.set.devices[d].label(), "device complete");
        }

        Ok(outcome)
    }

    /// Pick the `$import` target for a freshly accepted group.
    /// `None` when the reviewer stopped instead of naming the entry.
    fn establish_reference<R: Reviewer>(
        &mut self,
        base: &Value,
        reviewer: &mut R,
        outcome: &mut Outcome,
    ) -> Result<Option<String>> {
        if let Some(master) = &self.master {
            if let Some(name) = find_master_entry(&master.entries, base) {
                if reviewer.use_master_entry(name)? {
                    outcome.master_refs += 1;
                    return Ok(Some(master.reference_for(name)));
                }
            }
        }

        let Some(name) = reviewer.import_name(base, &self.template)? else {
            return Ok(None);
        };
        let body = template_body(base);
        if let Some(existing) = self.template.get(&name) {
            if !values_equal(existing, &body) {
                warn!(name = %name, "replacing template entry with a different definition");
            }
        }
        self.template.insert(name.clone(), body);
        Ok(Some(self.set.template_reference(&name)))
    }

    fn replace(&mut self, device: usize, key: &str, reference: &str) {
        let entry = &mut self.set.devices[device];
        if let Some(existing) = entry.param(key) {
            let replacement = import_ref(existing, reference);
            entry.set_param(key, replacement);
        }
    }

    fn follow_up(&self, device: usize, key: &str) -> FollowUp {
        let entry = &self.set.devices[device];
        FollowUp {
            file: entry.path.display().to_string(),
            device: entry.label().to_string(),
            param: key.to_string(),
            label: entry
                .param(key)
                .and_then(|p| p.get("label"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Write the manufacturer template and every device file.
    pub fn write(&self) -> Result<()> {
        self.set.write(&self.template)
    }
}
