use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::remote::RemoteCall;

fn one_arg(key: &str, value: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(key.to_string(), Value::String(value.to_string()));
    data
}

fn named_entries(response: &Value, list_key: &str, name_key: &str) -> Vec<String> {
    response
        .get(list_key)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get(name_key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Scene names in the remote's own order.
pub fn scene_names(remote: &mut dyn RemoteCall) -> Result<Vec<String>> {
    let response = remote.call("GetSceneList", None)?;
    Ok(named_entries(&response, "scenes", "sceneName"))
}

/// Name of the scene currently on program output.
pub fn current_scene(remote: &mut dyn RemoteCall) -> Result<String> {
    let response = remote.call("GetSceneList", None)?;
    response
        .get("currentProgramSceneName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("scene list carries no current scene")
}

/// Names of every object placed in the given scene, deduplicated.
pub fn container_members(remote: &mut dyn RemoteCall, scene: &str) -> Result<BTreeSet<String>> {
    let response = remote
        .call("GetSceneItemList", Some(one_arg("sceneName", scene)))
        .with_context(|| format!("failed to list items of scene {scene}"))?;
    Ok(named_entries(&response, "sceneItems", "sourceName")
        .into_iter()
        .collect())
}

/// Every creatable object name in the remote system. Inputs and scenes
/// share one global namespace, so both count.
pub fn all_object_names(remote: &mut dyn RemoteCall) -> Result<BTreeSet<String>> {
    let mut names: BTreeSet<String> = {
        let response = remote.call("GetInputList", None)?;
        named_entries(&response, "inputs", "inputName")
            .into_iter()
            .collect()
    };
    names.extend(scene_names(remote)?);
    Ok(names)
}

/// Backing file path for each named object that has one. Objects
/// without a `file` setting, and names the settings query rejects
/// outright (scenes, nested containers), are silently excluded.
pub fn file_backed_paths(
    remote: &mut dyn RemoteCall,
    names: &BTreeSet<String>,
) -> BTreeMap<String, String> {
    let mut paths = BTreeMap::new();
    for name in names {
        let Ok(response) = remote.call("GetInputSettings", Some(one_arg("inputName", name)))
        else {
            continue;
        };
        let file = response
            .get("inputSettings")
            .and_then(|settings| settings.get("file"))
            .and_then(Value::as_str);
        if let Some(file) = file {
            paths.insert(name.clone(), file.to_string());
        }
    }
    paths
}

/// Canvas dimensions of the remote's video output.
pub fn canvas_size(remote: &mut dyn RemoteCall) -> Result<(u32, u32)> {
    let response = remote.call("GetVideoSettings", None)?;
    let width = response
        .get("baseWidth")
        .and_then(Value::as_u64)
        .context("video settings carry no canvas width")?;
    let height = response
        .get("baseHeight")
        .and_then(Value::as_u64)
        .context("video settings carry no canvas height")?;
    Ok((width as u32, height as u32))
}

/// Render remote state as descriptive text for the translator.
///
/// Every section is best-effort: a failing read drops that section
/// and the rest still renders. The result is never an error.
pub fn describe_state(remote: &mut dyn RemoteCall) -> String {
    let mut text = String::new();

    if let Ok(response) = remote.call("GetSceneList", None) {
        let current = response
            .get("currentProgramSceneName")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let mut members: IndexMap<String, Vec<String>> = IndexMap::new();
        for scene in named_entries(&response, "scenes", "sceneName") {
            let items = remote
                .call("GetSceneItemList", Some(one_arg("sceneName", &scene)))
                .map(|items| named_entries(&items, "sceneItems", "sourceName"))
                .unwrap_or_default();
            members.insert(scene, items);
        }
        let _ = writeln!(text, "Scenes (current: {current}):");
        for (scene, items) in &members {
            if items.is_empty() {
                let _ = writeln!(text, "- {scene}: (empty)");
            } else {
                let _ = writeln!(text, "- {scene}: {}", items.join(", "));
            }
        }
    }

    if let Ok(response) = remote.call("GetInputList", None) {
        if let Some(inputs) = response.get("inputs").and_then(Value::as_array) {
            let _ = writeln!(text, "Inputs:");
            for input in inputs {
                let name = input
                    .get("inputName")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let kind = input
                    .get("inputKind")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let _ = writeln!(text, "- {name} ({kind})");
            }
        }
    }

    if let Ok(response) = remote.call("GetStreamStatus", None) {
        if let Some(active) = response.get("outputActive").and_then(Value::as_bool) {
            let _ = writeln!(
                text,
                "Streaming: {}",
                if active { "active" } else { "inactive" }
            );
        }
    }
    if let Ok(response) = remote.call("GetRecordStatus", None) {
        if let Some(active) = response.get("outputActive").and_then(Value::as_bool) {
            let _ = writeln!(
                text,
                "Recording: {}",
                if active { "active" } else { "inactive" }
            );
        }
    }

    if text.is_empty() {
        text.push_str("(remote state unavailable)\n");
    }
    text
}
