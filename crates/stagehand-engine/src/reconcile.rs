use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use stagehand_contracts::media::{DesiredImage, FitTransform};
use stagehand_contracts::session_log::{LogPayload, SessionLog};

use crate::remote::RemoteCall;
use crate::snapshot;

/// What happened to one desired image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerAction {
    /// A new file-backed object was created and placed.
    CreatedNew,
    /// An existing object with the same name and file was placed.
    AttachedExisting,
    /// The scene already has a member with this name.
    SkippedPresent,
    /// Another member of the scene already shows this file.
    SkippedSameFile,
    /// The name belongs to an unrelated object; left untouched.
    SkippedNameTaken,
}

impl LayerAction {
    pub fn counts_as_created(self) -> bool {
        matches!(self, LayerAction::CreatedNew | LayerAction::AttachedExisting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutcome {
    pub file_name: String,
    pub action: LayerAction,
}

impl LayerOutcome {
    pub fn describe(&self) -> String {
        match self.action {
            LayerAction::CreatedNew => format!("Added layer {}", self.file_name),
            LayerAction::AttachedExisting => {
                format!("Attached existing source {}", self.file_name)
            }
            LayerAction::SkippedPresent => {
                format!("Skipping {}: already in the scene", self.file_name)
            }
            LayerAction::SkippedSameFile => format!(
                "Skipping {}: the scene already shows this file",
                self.file_name
            ),
            LayerAction::SkippedNameTaken => format!(
                "Skipping {}: name is taken by an unrelated object",
                self.file_name
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created: usize,
    pub skipped: usize,
    pub outcomes: Vec<LayerOutcome>,
}

/// One read of remote state, mutated in memory as the pass proceeds so
/// later images observe earlier placements. Never re-queried mid-pass.
struct WorkingSet {
    members: BTreeSet<String>,
    member_paths: BTreeSet<String>,
    global_names: BTreeSet<String>,
    paths_by_name: BTreeMap<String, String>,
}

impl WorkingSet {
    fn gather(remote: &mut dyn RemoteCall, scene: &str) -> Result<Self> {
        let members = snapshot::container_members(remote, scene)?;
        let global_names = snapshot::all_object_names(remote)?;
        let paths_by_name = snapshot::file_backed_paths(remote, &global_names);
        let member_paths = members
            .iter()
            .filter_map(|name| paths_by_name.get(name).cloned())
            .collect();
        Ok(Self {
            members,
            member_paths,
            global_names,
            paths_by_name,
        })
    }

    fn decide(&self, image: &DesiredImage) -> LayerAction {
        if self.members.contains(&image.file_name) {
            return LayerAction::SkippedPresent;
        }
        if self.member_paths.contains(&image.absolute_path) {
            return LayerAction::SkippedSameFile;
        }
        if self.global_names.contains(&image.file_name) {
            return match self.paths_by_name.get(&image.file_name) {
                Some(path) if *path == image.absolute_path => LayerAction::AttachedExisting,
                _ => LayerAction::SkippedNameTaken,
            };
        }
        LayerAction::CreatedNew
    }

    fn record_attached(&mut self, image: &DesiredImage) {
        self.members.insert(image.file_name.clone());
        self.member_paths.insert(image.absolute_path.clone());
    }

    fn record_created(&mut self, image: &DesiredImage) {
        self.record_attached(image);
        self.global_names.insert(image.file_name.clone());
        self.paths_by_name
            .insert(image.file_name.clone(), image.absolute_path.clone());
    }
}

/// Bring `scene` to a state where every desired image is represented
/// exactly once as a visible layer. One pass, in input order; any
/// remote failure stops the pass with the counts reached so far in
/// the error context.
pub fn reconcile_images(
    remote: &mut dyn RemoteCall,
    log: &SessionLog,
    images: &[DesiredImage],
    scene: &str,
) -> Result<ReconcileSummary> {
    let mut working = WorkingSet::gather(remote, scene)?;
    let (canvas_width, canvas_height) = snapshot::canvas_size(remote)?;
    let fit = FitTransform::for_canvas(canvas_width, canvas_height);

    let mut summary = ReconcileSummary {
        created: 0,
        skipped: 0,
        outcomes: Vec::with_capacity(images.len()),
    };

    for image in images {
        let action = working.decide(image);
        match action {
            LayerAction::CreatedNew => {
                create_layer(remote, scene, image, fit).with_context(|| {
                    format!(
                        "stopped after {} created, {} skipped",
                        summary.created, summary.skipped
                    )
                })?;
                working.record_created(image);
                summary.created += 1;
            }
            LayerAction::AttachedExisting => {
                attach_layer(remote, scene, &image.file_name, fit).with_context(|| {
                    format!(
                        "stopped after {} created, {} skipped",
                        summary.created, summary.skipped
                    )
                })?;
                working.record_attached(image);
                summary.created += 1;
            }
            LayerAction::SkippedPresent
            | LayerAction::SkippedSameFile
            | LayerAction::SkippedNameTaken => {
                summary.skipped += 1;
            }
        }

        let outcome = LayerOutcome {
            file_name: image.file_name.clone(),
            action,
        };
        let mut payload = LogPayload::new();
        payload.insert("file".to_string(), json!(image.absolute_path));
        payload.insert("scene".to_string(), json!(scene));
        payload.insert("detail".to_string(), json!(outcome.describe()));
        let event = if action.counts_as_created() {
            "layer_placed"
        } else {
            "layer_skipped"
        };
        let _ = log.emit(event, payload);
        summary.outcomes.push(outcome);
    }

    Ok(summary)
}

fn create_layer(
    remote: &mut dyn RemoteCall,
    scene: &str,
    image: &DesiredImage,
    fit: FitTransform,
) -> Result<()> {
    let mut data = Map::new();
    data.insert("sceneName".to_string(), json!(scene));
    data.insert("inputName".to_string(), json!(image.file_name));
    data.insert("inputKind".to_string(), json!("image_source"));
    data.insert(
        "inputSettings".to_string(),
        json!({"file": image.absolute_path}),
    );
    data.insert("sceneItemEnabled".to_string(), json!(true));
    let response = remote
        .call("CreateInput", Some(data))
        .with_context(|| format!("failed to create layer {}", image.file_name))?;
    let item_id = response
        .get("sceneItemId")
        .and_then(Value::as_i64)
        .with_context(|| format!("no item id returned for {}", image.file_name))?;
    apply_fit(remote, scene, item_id, fit)
}

fn attach_layer(
    remote: &mut dyn RemoteCall,
    scene: &str,
    source: &str,
    fit: FitTransform,
) -> Result<()> {
    let mut data = Map::new();
    data.insert("sceneName".to_string(), json!(scene));
    data.insert("sourceName".to_string(), json!(source));
    data.insert("sceneItemEnabled".to_string(), json!(true));
    let response = remote
        .call("CreateSceneItem", Some(data))
        .with_context(|| format!("failed to attach source {source}"))?;
    let item_id = response
        .get("sceneItemId")
        .and_then(Value::as_i64)
        .with_context(|| format!("no item id returned for {source}"))?;
    apply_fit(remote, scene, item_id, fit)
}

fn apply_fit(
    remote: &mut dyn RemoteCall,
    scene: &str,
    item_id: i64,
    fit: FitTransform,
) -> Result<()> {
    let mut data = Map::new();
    data.insert("sceneName".to_string(), json!(scene));
    data.insert("sceneItemId".to_string(), json!(item_id));
    data.insert(
        "sceneItemTransform".to_string(),
        Value::Object(fit.to_request_data()),
    );
    remote
        .call("SetSceneItemTransform", Some(data))
        .map(|_| ())
        .with_context(|| format!("failed to place item {item_id} in {scene}"))
}
