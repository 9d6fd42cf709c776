use futures::TryStreamExt;
use tracing::debug;

use super::connection::ImapSession;
use crate::types::error::{MonitorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub attributes: Vec<String>,
}

impl FolderInfo {
    /// Folders flagged \Noselect are containers and cannot be examined
    pub fn is_selectable(&self) -> bool {
        !self.attributes.iter().any(|a| a.contains("NoSelect"))
    }
}

pub async fn list_folders(session: &mut ImapSession) -> Result<Vec<FolderInfo>> {
    let folders: Vec<_> = session
        .list(None, Some("*"))
        .await
        .map_err(|e| MonitorError::Mailbox(format!("LIST failed: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| MonitorError::Mailbox(format!("Failed to collect folders: {}", e)))?;

    let folder_infos: Vec<FolderInfo> = folders
        .iter()
        .map(|f| FolderInfo {
            name: f.name().to_string(),
            attributes: f.attributes().iter().map(|a| format!("{:?}", a)).collect(),
        })
        .collect();

    debug!("Listed {} IMAP folders", folder_infos.len());
    Ok(folder_infos)
}

/// Names of selectable folders, in server order
pub fn selectable_names(folders: &[FolderInfo]) -> Vec<String> {
    folders
        .iter()
        .filter(|f| f.is_selectable())
        .map(|f| f.name.clone())
        .collect()
}
