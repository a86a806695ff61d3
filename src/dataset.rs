//! Reads the per-frame keypoint files written by the pose estimator.
//!
//! Layout: `root/<action>/<frame>.json`, optionally with one subdirectory per
//! take (`root/<action>/<take>/<frame>.json`). Every frame file looks like
//! `{"keypoints": [[x, y, confidence], ...]}` with `null` when nobody was
//! detected.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ActionError, Result},
    training::TrainingClip,
    types::{Keypoint, KeypointFrame, KeypointSequence},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FrameFile {
    #[serde(default)]
    keypoints: Option<Vec<Vec<f32>>>,
}

/// A directory holding the frame files of one clip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipDir {
    pub clip_id: String,
    /// Name of the top-level directory, used as the label for training.
    pub group: String,
    pub path: PathBuf,
}

pub fn read_frame_file(path: &Path) -> Result<KeypointFrame> {
    let content = fs::read_to_string(path)?;
    let parsed: FrameFile = serde_json::from_str(&content)
        .map_err(|err| ActionError::Data(format!("{}: {err}", path.display())))?;

    let Some(rows) = parsed.keypoints else {
        return Ok(KeypointFrame::missing());
    };
    let joints = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| match row.as_slice() {
            [x, y, c] => Ok(Keypoint::new(*x, *y, *c)),
            _ => Err(ActionError::Data(format!(
                "{}: joint {idx} has {} values, expected 3",
                path.display(),
                row.len()
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(KeypointFrame::new(joints))
}

pub fn write_frame_file(path: &Path, frame: &KeypointFrame) -> Result<()> {
    let file = FrameFile {
        keypoints: frame
            .joints
            .as_ref()
            .map(|joints| joints.iter().map(|k| vec![k.x, k.y, k.confidence]).collect()),
    };
    fs::write(path, serde_json::to_string(&file)?)?;
    Ok(())
}

fn frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && !is_hidden(&path) && has_json_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !is_hidden(&path) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn has_json_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads every frame file in `dir`, in file-name order.
pub fn load_clip_dir(dir: &Path) -> Result<KeypointSequence> {
    let files = frame_files(dir)?;
    if files.is_empty() {
        return Err(ActionError::Data(format!(
            "no keypoint files found in {}",
            dir.display()
        )));
    }
    let frames = files
        .par_iter()
        .map(|path| read_frame_file(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(KeypointSequence::new(frames))
}

/// Finds the clip directories under `root`, sorted by clip id.
pub fn discover_clips(root: &Path) -> Result<Vec<ClipDir>> {
    if !root.is_dir() {
        return Err(ActionError::Data(format!(
            "keypoint root {} is not a directory",
            root.display()
        )));
    }

    let mut clips = Vec::new();
    for group_dir in subdirectories(root)? {
        let group = dir_name(&group_dir);
        let mut found = 0;
        if !frame_files(&group_dir)?.is_empty() {
            clips.push(ClipDir {
                clip_id: group.clone(),
                group: group.clone(),
                path: group_dir.clone(),
            });
            found += 1;
        }
        for take_dir in subdirectories(&group_dir)? {
            if frame_files(&take_dir)?.is_empty() {
                continue;
            }
            clips.push(ClipDir {
                clip_id: format!("{group}/{}", dir_name(&take_dir)),
                group: group.clone(),
                path: take_dir,
            });
            found += 1;
        }
        if found == 0 {
            log::warn!("no keypoint files under {}, skipping", group_dir.display());
        }
    }
    clips.sort_by(|a, b| a.clip_id.cmp(&b.clip_id));
    Ok(clips)
}

/// Loads every clip under `root` keyed by clip id.
pub fn load_clips(root: &Path) -> Result<BTreeMap<String, KeypointSequence>> {
    let mut clips = BTreeMap::new();
    for clip in discover_clips(root)? {
        let sequence = load_clip_dir(&clip.path).map_err(|err| err.in_clip(&clip.clip_id))?;
        log::debug!("loaded clip '{}' ({} frames)", clip.clip_id, sequence.len());
        clips.insert(clip.clip_id, sequence);
    }
    log::info!("loaded {} clips from {}", clips.len(), root.display());
    Ok(clips)
}

/// Like [`load_clips`], labelling each clip with its top-level directory
/// name.
pub fn load_labelled_clips(root: &Path) -> Result<BTreeMap<String, TrainingClip>> {
    let mut clips = BTreeMap::new();
    for clip in discover_clips(root)? {
        let sequence = load_clip_dir(&clip.path).map_err(|err| err.in_clip(&clip.clip_id))?;
        clips.insert(clip.clip_id, TrainingClip::new(sequence, clip.group));
    }
    log::info!("loaded {} labelled clips from {}", clips.len(), root.display());
    Ok(clips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_JOINTS;
    use tempfile::TempDir;

    fn pose(offset: f32) -> KeypointFrame {
        KeypointFrame::new(
            (0..NUM_JOINTS)
                .map(|j| Keypoint::new(offset + j as f32, offset, 0.8))
                .collect(),
        )
    }

    fn write_clip(dir: &Path, frames: &[KeypointFrame]) {
        fs::create_dir_all(dir).unwrap();
        for (idx, frame) in frames.iter().enumerate() {
            write_frame_file(&dir.join(format!("frame_{idx:04}.json")), frame).unwrap();
        }
    }

    #[test]
    fn frame_file_roundtrip_and_null_keypoints() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.json");
        write_frame_file(&path, &pose(3.0)).unwrap();
        assert_eq!(read_frame_file(&path).unwrap(), pose(3.0));

        fs::write(&path, r#"{"keypoints": null}"#).unwrap();
        assert!(read_frame_file(&path).unwrap().is_missing());

        fs::write(&path, r#"{}"#).unwrap();
        assert!(read_frame_file(&path).unwrap().is_missing());
    }

    #[test]
    fn rows_without_confidence_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("xy_only.json");
        fs::write(&path, r#"{"keypoints": [[1.0, 2.0], [3.0, 4.0, 0.5]]}"#).unwrap();
        let err = read_frame_file(&path).unwrap_err();
        assert!(matches!(err, ActionError::Data(_)));
        let msg = err.to_string();
        assert!(msg.contains("xy_only.json") && msg.contains("expected 3"), "{msg}");
    }

    #[test]
    fn malformed_row_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"keypoints": [[1.0]]}"#).unwrap();
        let err = read_frame_file(&path).unwrap_err();
        assert!(matches!(err, ActionError::Data(_)));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn clip_dir_is_read_in_name_order_ignoring_hidden_files() {
        let dir = TempDir::new().unwrap();
        let frames: Vec<_> = (0..12).map(|i| pose(i as f32)).collect();
        write_clip(dir.path(), &frames);
        fs::write(dir.path().join(".DS_Store.json"), "garbage").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let seq = load_clip_dir(dir.path()).unwrap();
        assert_eq!(seq.frames, frames);
    }

    #[test]
    fn discovers_action_dirs_and_takes() {
        let root = TempDir::new().unwrap();
        write_clip(&root.path().join("open_door"), &[pose(0.0), pose(1.0)]);
        write_clip(&root.path().join("pour_water").join("take1"), &[pose(2.0)]);
        write_clip(&root.path().join("pour_water").join("take2"), &[pose(3.0)]);
        fs::create_dir_all(root.path().join("empty_action")).unwrap();
        fs::create_dir_all(root.path().join(".hidden")).unwrap();

        let ids: Vec<String> = discover_clips(root.path())
            .unwrap()
            .into_iter()
            .map(|c| c.clip_id)
            .collect();
        assert_eq!(ids, vec!["open_door", "pour_water/take1", "pour_water/take2"]);

        let labelled = load_labelled_clips(root.path()).unwrap();
        assert_eq!(labelled["pour_water/take2"].label, "pour_water");
        assert_eq!(labelled["open_door"].sequence.len(), 2);

        let clips = load_clips(root.path()).unwrap();
        assert_eq!(clips.len(), 3);
    }

    #[test]
    fn missing_root_is_a_data_error() {
        let root = TempDir::new().unwrap();
        let err = discover_clips(&root.path().join("nope")).unwrap_err();
        assert!(matches!(err, ActionError::Data(_)));
    }
}
