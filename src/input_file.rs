use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use conclave_core::types::{RunInput, TaskDescriptor};
use conclave_engine::{project_input, InputForm};

/// The two accepted shapes of `--input`.
///
/// A form carries shared values plus file paths and is projected onto each
/// task's fields; anything else is read as a ready-made per-task map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputFile {
    Form {
        #[serde(default)]
        fields: HashMap<String, String>,
        files: HashMap<String, PathBuf>,
    },
    PerTask(RunInput),
}

/// Read a run input from a JSON file. Relative file paths in a form are
/// resolved against the input file's directory.
pub fn load(path: &Path, descriptors: &[TaskDescriptor]) -> anyhow::Result<RunInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading input file {}", path.display()))?;
    let parsed: InputFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing input file {}", path.display()))?;

    match parsed {
        InputFile::PerTask(input) => Ok(input),
        InputFile::Form { fields, files } => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            let mut form = InputForm {
                fields,
                ..Default::default()
            };
            for (field_id, file) in files {
                let file = if file.is_absolute() { file } else { base.join(file) };
                let bytes = std::fs::read(&file)
                    .with_context(|| format!("reading {} for field '{}'", file.display(), field_id))?;
                form.files.insert(field_id, bytes);
            }
            Ok(project_input(descriptors, &form))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::types::{FieldKind, FieldSpec};
    use std::io::Write;

    fn palm() -> Vec<TaskDescriptor> {
        vec![TaskDescriptor::new("palm", "Palm Reader", "p")
            .with_field(FieldSpec::new("name", FieldKind::Text, "Name"))
            .with_field(FieldSpec::new("photo", FieldKind::Image, "Palm photo"))]
    }

    #[test]
    fn test_per_task_map() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(br#"{"palm": {"name": "Ada"}}"#).unwrap();

        let input = load(tmp.path(), &palm()).unwrap();
        assert_eq!(input.get("palm", "name"), Some("Ada"));
    }

    #[test]
    fn test_form_with_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hand.jpg"), b"ABC").unwrap();
        let input_path = dir.path().join("input.json");
        std::fs::write(
            &input_path,
            r#"{"fields": {"name": "Ada"}, "files": {"photo": "hand.jpg"}}"#,
        )
        .unwrap();

        let input = load(&input_path, &palm()).unwrap();
        assert_eq!(input.get("palm", "name"), Some("Ada"));
        assert_eq!(input.get("palm", "photo"), Some("QUJD"));
    }

    #[test]
    fn test_missing_referenced_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.json");
        std::fs::write(&input_path, r#"{"files": {"photo": "nope.jpg"}}"#).unwrap();

        let err = load(&input_path, &palm()).unwrap_err();
        assert!(err.to_string().contains("photo"));
    }
}
