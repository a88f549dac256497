use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Store, StoreError};
use crate::entities::{Project, User};

/// JSON snapshot of users and projects, used to seed or export a store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("read state file failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse state file failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("write state file failed: {0}")]
    Write(std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StateFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateFileError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StateFileError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(StateFileError::Write)?;
        }

        let payload = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &payload).map_err(StateFileError::Write)?;
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StateFileError::Write(err));
        }
        Ok(())
    }

    /// Writes every user and project, plus each project's endpoint mapping.
    pub async fn seed(&self, store: &Store) -> Result<(), StateFileError> {
        for user in &self.users {
            store.save(user).await?;
        }
        for project in &self.projects {
            store.save(project).await?;
            store.save(&project.endpoint_mapping()).await?;
        }
        Ok(())
    }

    pub async fn export(store: &Store) -> Result<Self, StateFileError> {
        Ok(Self {
            users: store.find::<User, _>(None, |_| true).await?,
            projects: store.find::<Project, _>(None, |_| true).await?,
        })
    }
}
