//! Working directories for uploaded input files.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use super::wire::UploadFile;
use super::RpcError;

/// Files written for one run handle.
#[derive(Debug, Clone)]
pub struct StagedRun {
    pub dir: PathBuf,
    /// The first uploaded file.
    pub primary: PathBuf,
}

/// A bare file name: one normal path component, nothing else.
pub fn validate_name(name: &str) -> Result<(), RpcError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(RpcError::bad_request(format!(
            "invalid file name '{name}': path components are not allowed"
        ))),
    }
}

/// Write `files` under `root/<handle>/`.
pub async fn stage(root: &Path, handle: Uuid, files: &[UploadFile]) -> Result<StagedRun, RpcError> {
    let first = files
        .first()
        .ok_or_else(|| RpcError::bad_request("at least one file is required"))?;
    for file in files {
        validate_name(&file.name)?;
    }

    let dir = root.join(handle.to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| RpcError::internal(format!("cannot create {}: {}", dir.display(), e)))?;
    for file in files {
        let path = dir.join(&file.name);
        tokio::fs::write(&path, file.contents.as_bytes())
            .await
            .map_err(|e| RpcError::internal(format!("cannot write {}: {}", path.display(), e)))?;
    }
    tracing::debug!(run = %handle, dir = %dir.display(), files = files.len(), "files staged");

    Ok(StagedRun {
        primary: dir.join(&first.name),
        dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn plain_names_accepted() {
        assert!(validate_name("rc.cir").is_ok());
        assert!(validate_name("model.lib").is_ok());
    }

    #[test]
    fn path_components_rejected() {
        for name in ["", ".", "..", "../x.cir", "a/b.cir", "/etc/passwd", "a\\b.cir"] {
            let err = validate_name(name).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{name}");
        }
    }

    #[tokio::test]
    async fn stage_writes_files_and_picks_first() {
        let root = tempfile::tempdir().unwrap();
        let handle = Uuid::new_v4();
        let files = vec![
            UploadFile {
                name: "top.cir".into(),
                contents: "V1 1 0 1\n".into(),
            },
            UploadFile {
                name: "extra.inc".into(),
                contents: "* nothing\n".into(),
            },
        ];
        let staged = stage(root.path(), handle, &files).await.unwrap();
        assert_eq!(staged.primary, root.path().join(handle.to_string()).join("top.cir"));
        assert_eq!(std::fs::read_to_string(&staged.primary).unwrap(), "V1 1 0 1\n");
        assert!(staged.dir.join("extra.inc").exists());
    }

    #[tokio::test]
    async fn stage_rejects_empty_list() {
        let root = tempfile::tempdir().unwrap();
        let err = stage(root.path(), Uuid::new_v4(), &[]).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
