use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use stagehand_contracts::session_log::{LogPayload, SessionLog};

use crate::remote::RemoteCall;
use crate::snapshot;

/// Capture-capable object kinds, most preferred first.
const CAPTURE_KIND_PREFERENCE: &[&str] = &[
    "av_capture_input_v2",
    "av_capture_input",
    "dshow_input",
    "v4l2_input",
];

/// Property keys that may hold the device list, probed in order.
const DEVICE_PROPERTY_CANDIDATES: &[&str] = &["video_device_id", "device_id", "device"];

/// Device display-name substrings, most preferred first.
const DEVICE_NAME_PREFERENCE: &[&str] =
    &["iphone camera", "studio display camera", "facetime hd camera"];

const CHROMA_KEY_FILTER_KIND: &str = "chroma_key_filter_v2";
const COLOR_CORRECTION_FILTER_KIND: &str = "color_correction_filter_v2";

#[derive(Debug, Clone, PartialEq)]
pub struct WebcamConfig {
    pub base_name: String,
    pub kind: Option<String>,
    pub device_hint: Option<String>,
    pub chroma_key: bool,
    pub color_correction: bool,
    pub saturation: f64,
    pub contrast: f64,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            base_name: "Webcam".to_string(),
            kind: None,
            device_hint: None,
            chroma_key: false,
            color_correction: false,
            saturation: 1.0,
            contrast: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSummary {
    pub object_name: String,
    pub kind_used: String,
    pub device_chosen: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    NoCaptureKindFound,
    NoCaptureDevicesFound { object_name: String },
    InvalidNumericParameter { parameter: &'static str },
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionError::NoCaptureKindFound => {
                write!(f, "no capture-capable input kind is available")
            }
            ProvisionError::NoCaptureDevicesFound { object_name } => write!(
                f,
                "no capture devices found; the unconfigured object {object_name} was left in place"
            ),
            ProvisionError::InvalidNumericParameter { parameter } => {
                write!(f, "{parameter} is not a finite number")
            }
        }
    }
}

impl std::error::Error for ProvisionError {}

/// One enumerated capture device on a freshly created object.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceChoice {
    property_key: String,
    display_name: String,
    device_value: String,
}

/// Create and configure a webcam object in the active scene.
///
/// Steps run in dependency order; a failing step aborts the rest and
/// an already-created object is not rolled back. Nothing guards
/// against a concurrent actor renaming or deleting the object between
/// creation and device enumeration; the remote side offers no lock to
/// take.
pub fn provision_webcam(
    remote: &mut dyn RemoteCall,
    log: &SessionLog,
    config: &WebcamConfig,
) -> Result<ProvisionSummary> {
    if config.color_correction {
        if !config.saturation.is_finite() {
            return Err(ProvisionError::InvalidNumericParameter {
                parameter: "saturation",
            }
            .into());
        }
        if !config.contrast.is_finite() {
            return Err(ProvisionError::InvalidNumericParameter {
                parameter: "contrast",
            }
            .into());
        }
    }

    let kind_used = resolve_kind(remote, config.kind.as_deref())?;
    let object_name = resolve_free_name(remote, &config.base_name)?;
    let scene = snapshot::current_scene(remote)?;

    let mut create = Map::new();
    create.insert("sceneName".to_string(), json!(scene));
    create.insert("inputName".to_string(), json!(object_name));
    create.insert("inputKind".to_string(), json!(kind_used));
    create.insert("inputSettings".to_string(), json!({}));
    create.insert("sceneItemEnabled".to_string(), json!(true));
    remote
        .call("CreateInput", Some(create))
        .with_context(|| format!("failed to create capture object {object_name}"))?;

    let choices = enumerate_devices(remote, &object_name);
    if choices.is_empty() {
        return Err(ProvisionError::NoCaptureDevicesFound {
            object_name: object_name.clone(),
        }
        .into());
    }
    let chosen = pick_device(&choices, config.device_hint.as_deref());

    let mut device_settings = Map::new();
    device_settings.insert(
        chosen.property_key.clone(),
        Value::String(chosen.device_value.clone()),
    );
    let mut settings = Map::new();
    settings.insert("inputName".to_string(), json!(object_name));
    settings.insert(
        "inputSettings".to_string(),
        Value::Object(device_settings),
    );
    settings.insert("overlay".to_string(), json!(true));
    remote
        .call("SetInputSettings", Some(settings))
        .with_context(|| format!("failed to select device for {object_name}"))?;

    if config.chroma_key {
        attach_filter(
            remote,
            &object_name,
            "Chroma Key",
            CHROMA_KEY_FILTER_KIND,
            Map::new(),
        )?;
    }
    if config.color_correction {
        let mut filter_settings = Map::new();
        filter_settings.insert("saturation".to_string(), json!(config.saturation));
        filter_settings.insert("contrast".to_string(), json!(config.contrast));
        attach_filter(
            remote,
            &object_name,
            "Color Correction",
            COLOR_CORRECTION_FILTER_KIND,
            filter_settings,
        )?;
    }

    let mut payload = LogPayload::new();
    payload.insert("object".to_string(), json!(object_name));
    payload.insert("kind".to_string(), json!(kind_used));
    payload.insert("device".to_string(), json!(chosen.display_name));
    payload.insert("scene".to_string(), json!(scene));
    let _ = log.emit("webcam_provisioned", payload);

    Ok(ProvisionSummary {
        object_name,
        kind_used,
        device_chosen: chosen.display_name.clone(),
    })
}

fn resolve_kind(remote: &mut dyn RemoteCall, explicit: Option<&str>) -> Result<String> {
    if let Some(kind) = explicit.map(str::trim).filter(|kind| !kind.is_empty()) {
        return Ok(kind.to_string());
    }
    let response = remote.call("GetInputKindList", None)?;
    let kinds: Vec<String> = response
        .get("inputKinds")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for preferred in CAPTURE_KIND_PREFERENCE {
        if kinds.iter().any(|kind| kind == preferred) {
            return Ok((*preferred).to_string());
        }
    }
    kinds
        .into_iter()
        .find(|kind| kind.contains("capture"))
        .ok_or_else(|| ProvisionError::NoCaptureKindFound.into())
}

/// Base name as-is when globally free, else `base-2`, `base-3`, ...
/// until a free name is found. Never reuses an existing object.
fn resolve_free_name(remote: &mut dyn RemoteCall, base: &str) -> Result<String> {
    let taken = snapshot::all_object_names(remote)?;
    if !taken.contains(base) {
        return Ok(base.to_string());
    }
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

/// Probe the candidate property keys in order; the first key with a
/// non-empty choice list wins and the rest are never tried.
fn enumerate_devices(remote: &mut dyn RemoteCall, object_name: &str) -> Vec<DeviceChoice> {
    for property_key in DEVICE_PROPERTY_CANDIDATES {
        let mut data = Map::new();
        data.insert("inputName".to_string(), json!(object_name));
        data.insert("propertyName".to_string(), json!(property_key));
        let Ok(response) = remote.call("GetInputPropertiesListPropertyItems", Some(data)) else {
            continue;
        };
        let choices: Vec<DeviceChoice> = response
            .get("propertyItems")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let display_name =
                            item.get("itemName").and_then(Value::as_str)?.to_string();
                        let device_value = match item.get("itemValue") {
                            Some(Value::String(value)) => value.clone(),
                            Some(other) => other.to_string(),
                            None => return None,
                        };
                        Some(DeviceChoice {
                            property_key: (*property_key).to_string(),
                            display_name,
                            device_value,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !choices.is_empty() {
            return choices;
        }
    }
    Vec::new()
}

/// Hint match first (case-insensitive substring over name, value and
/// property key), then the ranked name preference, then the first
/// enumerated choice.
fn pick_device<'a>(choices: &'a [DeviceChoice], hint: Option<&str>) -> &'a DeviceChoice {
    if let Some(hint) = hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        let needle = hint.to_lowercase();
        if let Some(found) = choices.iter().find(|choice| {
            format!(
                "{} {} {}",
                choice.display_name, choice.device_value, choice.property_key
            )
            .to_lowercase()
            .contains(&needle)
        }) {
            return found;
        }
    }
    for preferred in DEVICE_NAME_PREFERENCE {
        if let Some(found) = choices
            .iter()
            .find(|choice| choice.display_name.to_lowercase().contains(preferred))
        {
            return found;
        }
    }
    &choices[0]
}

fn attach_filter(
    remote: &mut dyn RemoteCall,
    source: &str,
    filter_name: &str,
    filter_kind: &str,
    filter_settings: Map<String, Value>,
) -> Result<()> {
    let mut data = Map::new();
    data.insert("sourceName".to_string(), json!(source));
    data.insert("filterName".to_string(), json!(filter_name));
    data.insert("filterKind".to_string(), json!(filter_kind));
    data.insert("filterSettings".to_string(), Value::Object(filter_settings));
    remote
        .call("CreateSourceFilter", Some(data))
        .map(|_| ())
        .with_context(|| format!("failed to attach {filter_name} to {source}"))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};
    use stagehand_contracts::session_log::SessionLog;

    use crate::remote::testing::FakeRemote;

    use super::{provision_webcam, ProvisionError, WebcamConfig};

    fn capture_remote() -> FakeRemote {
        let mut remote = FakeRemote::new();
        remote.kinds = vec![
            "image_source".to_string(),
            "av_capture_input_v2".to_string(),
        ];
        remote.property_items.insert(
            "device".to_string(),
            vec![
                ("FaceTime HD Camera".to_string(), "0x01".to_string()),
                ("iPhone Camera".to_string(), "0x02".to_string()),
                ("Studio Display Camera".to_string(), "0x03".to_string()),
            ],
        );
        remote
    }

    #[test]
    fn provisions_with_preferred_kind_and_device() {
        let mut remote = capture_remote();
        let summary = provision_webcam(
            &mut remote,
            &SessionLog::disabled(),
            &WebcamConfig::default(),
        )
        .unwrap();

        assert_eq!(summary.object_name, "Webcam");
        assert_eq!(summary.kind_used, "av_capture_input_v2");
        assert_eq!(summary.device_chosen, "iPhone Camera");
        assert_eq!(remote.inputs["Webcam"].settings["device"], json!("0x02"));
    }

    #[test]
    fn name_suffix_scans_to_first_free() {
        let mut remote = capture_remote();
        remote.add_input("Cam", "av_capture_input_v2", Map::new());
        remote.add_input("Cam-2", "av_capture_input_v2", Map::new());

        let config = WebcamConfig {
            base_name: "Cam".to_string(),
            ..WebcamConfig::default()
        };
        let summary =
            provision_webcam(&mut remote, &SessionLog::disabled(), &config).unwrap();
        assert_eq!(summary.object_name, "Cam-3");
    }

    #[test]
    fn device_hint_overrides_preference() {
        let mut remote = capture_remote();
        let config = WebcamConfig {
            device_hint: Some("studio".to_string()),
            ..WebcamConfig::default()
        };
        let summary =
            provision_webcam(&mut remote, &SessionLog::disabled(), &config).unwrap();
        assert_eq!(summary.device_chosen, "Studio Display Camera");
    }

    #[test]
    fn probe_stops_at_first_non_empty_property() {
        let mut remote = capture_remote();
        remote.property_items.insert(
            "device_id".to_string(),
            vec![("USB Camera".to_string(), "usb-1".to_string())],
        );

        let summary = provision_webcam(
            &mut remote,
            &SessionLog::disabled(),
            &WebcamConfig::default(),
        )
        .unwrap();
        // device_id precedes device in the probe order, so its single
        // choice wins and the later key is never consulted.
        assert_eq!(summary.device_chosen, "USB Camera");
        assert_eq!(remote.inputs["Webcam"].settings["device_id"], json!("usb-1"));
        assert_eq!(
            remote.calls_of_type("GetInputPropertiesListPropertyItems"),
            2
        );
    }

    #[test]
    fn explicit_kind_skips_discovery() {
        let mut remote = capture_remote();
        let config = WebcamConfig {
            kind: Some("v4l2_input".to_string()),
            ..WebcamConfig::default()
        };
        let summary =
            provision_webcam(&mut remote, &SessionLog::disabled(), &config).unwrap();
        assert_eq!(summary.kind_used, "v4l2_input");
        assert_eq!(remote.calls_of_type("GetInputKindList"), 0);
    }

    #[test]
    fn capture_substring_is_the_kind_fallback() {
        let mut remote = capture_remote();
        remote.kinds = vec!["browser_source".to_string(), "screen_capture".to_string()];

        let summary = provision_webcam(
            &mut remote,
            &SessionLog::disabled(),
            &WebcamConfig::default(),
        )
        .unwrap();
        assert_eq!(summary.kind_used, "screen_capture");
    }

    #[test]
    fn no_capture_kind_creates_nothing() {
        let mut remote = capture_remote();
        remote.kinds = vec!["browser_source".to_string()];

        let err = provision_webcam(
            &mut remote,
            &SessionLog::disabled(),
            &WebcamConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProvisionError>(),
            Some(&ProvisionError::NoCaptureKindFound)
        );
        assert_eq!(remote.calls_of_type("CreateInput"), 0);
    }

    #[test]
    fn no_devices_leaves_partial_object_in_place() {
        let mut remote = capture_remote();
        remote.property_items.clear();

        let err = provision_webcam(
            &mut remote,
            &SessionLog::disabled(),
            &WebcamConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::NoCaptureDevicesFound { .. })
        ));
        // Partial creation is not rolled back.
        assert!(remote.inputs.contains_key("Webcam"));
        assert_eq!(remote.calls_of_type("SetInputSettings"), 0);
    }

    #[test]
    fn non_finite_parameters_fail_before_any_remote_call() {
        let mut remote = capture_remote();
        let config = WebcamConfig {
            color_correction: true,
            saturation: f64::NAN,
            ..WebcamConfig::default()
        };
        let err = provision_webcam(&mut remote, &SessionLog::disabled(), &config).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProvisionError>(),
            Some(&ProvisionError::InvalidNumericParameter {
                parameter: "saturation"
            })
        );
        assert!(remote.calls.is_empty());
    }

    #[test]
    fn filters_attach_in_order_with_settings() {
        let mut remote = capture_remote();
        let config = WebcamConfig {
            chroma_key: true,
            color_correction: true,
            saturation: 1.2,
            contrast: 0.1,
            ..WebcamConfig::default()
        };
        provision_webcam(&mut remote, &SessionLog::disabled(), &config).unwrap();

        let filters = &remote.filters["Webcam"];
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].1, "chroma_key_filter_v2");
        assert!(filters[0].2.is_empty());
        assert_eq!(filters[1].1, "color_correction_filter_v2");
        assert_eq!(filters[1].2["saturation"], json!(1.2));
        assert_eq!(filters[1].2["contrast"], json!(0.1));
    }
}
