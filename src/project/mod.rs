// Project data for playback
// Plain serde structures supplied by the caller; reading a JSON file is a convenience

pub mod types;

use std::collections::HashSet;
use std::path::Path;

pub use types::{
    AudioLane, BlockId, Lane, LaneId, LaneKind, MidiBlock, MidiLane, MidiMessageType, Project,
};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid project structure: {0}")]
    InvalidStructure(String),
}

/// Read a project from a JSON file.
/// Relative audio paths are resolved against the project file's directory.
pub fn load_project(path: impl AsRef<Path>) -> Result<Project, ProjectError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let mut project: Project = serde_json::from_str(&json)?;

    if let Some(dir) = path.parent() {
        for lane in &mut project.lanes {
            if let LaneKind::Audio(audio) = &mut lane.kind
                && let Some(file) = audio.audio_file_path.as_mut()
                && file.is_relative()
            {
                *file = dir.join(&*file);
            }
        }
    }

    validate_project(&project)?;
    log::info!(
        "Loaded project '{}' ({} lanes, {} song parts)",
        project.name,
        project.lanes.len(),
        project.tempo_map.parts().len()
    );
    Ok(project)
}

/// Lane ids must be unique, and block ids unique within their lane.
/// Runtime state is keyed by lane id and by (lane, block).
pub fn validate_project(project: &Project) -> Result<(), ProjectError> {
    let mut lanes = HashSet::new();
    for lane in &project.lanes {
        if !lanes.insert(lane.id) {
            return Err(ProjectError::InvalidStructure(format!(
                "Duplicate lane id {} ({})",
                lane.id, lane.name
            )));
        }

        let Some(midi) = lane.as_midi() else {
            continue;
        };
        let mut blocks = HashSet::new();
        for block in &midi.blocks {
            if !blocks.insert(block.id) {
                return Err(ProjectError::InvalidStructure(format!(
                    "Duplicate block id {} in lane '{}'",
                    block.id, lane.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_project_resolves_relative_audio() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.json");
        std::fs::write(
            &path,
            r#"{"name": "Set", "lanes": [{"type": "audio", "name": "Click", "audio_file_path": "click.wav"}]}"#,
        )
        .unwrap();

        let project = load_project(&path).unwrap();
        let audio = project.lanes[0].as_audio().unwrap();
        assert_eq!(audio.audio_file_path.as_deref(), Some(dir.path().join("click.wav").as_path()));
    }

    #[test]
    fn test_load_project_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_project(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ProjectError::Io(_))));
    }

    #[test]
    fn test_duplicate_lane_ids_rejected() {
        let mut project = Project::new("Dup");
        let lane = Lane::midi("A", 1);
        project.lanes.push(lane.clone());
        project.lanes.push(lane);
        assert!(matches!(
            validate_project(&project),
            Err(ProjectError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_duplicate_block_ids_rejected_within_a_lane() {
        let block = MidiBlock::program_change(0.0, 1.0, 5);
        let mut lane = Lane::midi("Rig", 1);
        if let Some(midi) = lane.as_midi_mut() {
            midi.add_block(block.clone());
            midi.add_block(block.clone());
        }
        let mut project = Project::new("Dup blocks");
        project.lanes.push(lane);
        assert!(matches!(
            validate_project(&project),
            Err(ProjectError::InvalidStructure(_))
        ));

        // The same block on two lanes is fine
        let mut first = Lane::midi("A", 1);
        let mut second = Lane::midi("B", 2);
        for lane in [&mut first, &mut second] {
            if let Some(midi) = lane.as_midi_mut() {
                midi.add_block(block.clone());
            }
        }
        let mut project = Project::new("Shared block");
        project.lanes = vec![first, second];
        assert!(validate_project(&project).is_ok());
    }
}
