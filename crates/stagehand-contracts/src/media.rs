use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

/// File extensions the image layer pipeline accepts, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tga"];

/// One image file the target scene should contain, recomputed fresh on
/// every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredImage {
    pub file_name: String,
    pub absolute_path: String,
}

/// List the image files in `dir`, filtered by extension and sorted by
/// file name (case-insensitive, raw name as tiebreak). Subdirectories
/// and non-image files are ignored.
pub fn list_images(dir: &Path) -> Result<Vec<DesiredImage>> {
    let root = fs::canonicalize(dir)
        .with_context(|| format!("failed to resolve directory {}", dir.display()))?;
    let entries = fs::read_dir(&root)
        .with_context(|| format!("failed to read directory {}", root.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        let Some(extension) = extension else {
            continue;
        };
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().to_string())
        else {
            continue;
        };
        images.push(DesiredImage {
            file_name,
            absolute_path: path.to_string_lossy().to_string(),
        });
    }

    images.sort_by(|a, b| {
        let left = a.file_name.to_lowercase();
        let right = b.file_name.to_lowercase();
        left.cmp(&right).then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(images)
}

/// Placement that centers an object and scales it to fill the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FitTransform {
    pub fn for_canvas(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            x: f64::from(canvas_width) / 2.0,
            y: f64::from(canvas_height) / 2.0,
            width: f64::from(canvas_width),
            height: f64::from(canvas_height),
        }
    }

    /// Wire form for a set-placement request.
    pub fn to_request_data(self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("positionX".to_string(), json!(self.x));
        data.insert("positionY".to_string(), json!(self.y));
        data.insert("alignment".to_string(), json!(0));
        data.insert(
            "boundsType".to_string(),
            Value::String("OBS_BOUNDS_SCALE_INNER".to_string()),
        );
        data.insert("boundsAlignment".to_string(), json!(0));
        data.insert("boundsWidth".to_string(), json!(self.width));
        data.insert("boundsHeight".to_string(), json!(self.height));
        data
    }
}
